use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::order::PaymentMethod;

// ============================================================================
// Payment Gateway boundary
// ============================================================================
//
// Opaque external call: the engine only sees approve/decline and a
// transaction reference. Transport errors are reported as declines so the
// checkout path has exactly one failure branch to compensate.
//
// `refund` gives back an approved charge whose order was never created.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub buyer_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("refund of {transaction_id} failed: {reason}")]
pub struct RefundFailed {
    pub transaction_id: String,
    pub reason: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: PaymentRequest) -> PaymentOutcome;

    /// Refund the full amount of `transaction_id`; returns the refund reference
    async fn refund(&self, order_id: Uuid, transaction_id: &str) -> Result<String, RefundFailed>;
}

/// Gateway stand-in for development and tests
#[derive(Debug, Clone, Default)]
pub struct MockPaymentGateway {
    decline_reason: Option<String>,
    refund_failure: Option<String>,
}

impl MockPaymentGateway {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn declining(reason: impl Into<String>) -> Self {
        Self {
            decline_reason: Some(reason.into()),
            refund_failure: None,
        }
    }

    /// Refunds are refused with `reason`
    pub fn with_failing_refunds(mut self, reason: impl Into<String>) -> Self {
        self.refund_failure = Some(reason.into());
        self
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(&self, request: PaymentRequest) -> PaymentOutcome {
        match &self.decline_reason {
            Some(reason) => {
                tracing::info!(order_id = %request.order_id, reason = %reason, "Mock payment declined");
                PaymentOutcome::Declined { reason: reason.clone() }
            }
            None => {
                let transaction_id = format!("mock_txn_{}", Uuid::new_v4());
                tracing::info!(
                    order_id = %request.order_id,
                    amount = %request.amount,
                    transaction_id = %transaction_id,
                    "Mock payment processed successfully"
                );
                PaymentOutcome::Approved { transaction_id }
            }
        }
    }

    async fn refund(&self, order_id: Uuid, transaction_id: &str) -> Result<String, RefundFailed> {
        if let Some(reason) = &self.refund_failure {
            return Err(RefundFailed {
                transaction_id: transaction_id.to_string(),
                reason: reason.clone(),
            });
        }

        let refund_id = format!("mock_refund_{}", Uuid::new_v4());
        tracing::info!(
            order_id = %order_id,
            transaction_id = %transaction_id,
            refund_id = %refund_id,
            "Mock refund processed successfully"
        );
        Ok(refund_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            amount: Decimal::from(100),
            method: PaymentMethod {
                kind: "card".to_string(),
                last4: Some("4242".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_mock_payment_success() {
        match MockPaymentGateway::approving().charge(request()).await {
            PaymentOutcome::Approved { transaction_id } => assert!(transaction_id.starts_with("mock_txn_")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_payment_decline() {
        let outcome = MockPaymentGateway::declining("card expired").charge(request()).await;
        assert_eq!(
            outcome,
            PaymentOutcome::Declined {
                reason: "card expired".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_mock_refund() {
        let refund = MockPaymentGateway::approving().refund(Uuid::new_v4(), "txn_123").await.unwrap();
        assert!(refund.starts_with("mock_refund_"));

        let err = MockPaymentGateway::approving()
            .with_failing_refunds("gateway unavailable")
            .refund(Uuid::new_v4(), "txn_123")
            .await
            .unwrap_err();
        assert_eq!(err.transaction_id, "txn_123");
    }
}
