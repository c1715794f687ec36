use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::{OrderError, OrderStatus};
use crate::domain::shared::ProductId;

// ============================================================================
// Engine Error Taxonomy
// ============================================================================
//
// Returned by every operation exposed to the API layer.
//
// Expected outcomes (returned, never retried by the engine):
//   EmptySelection, InsufficientStock, InvalidTransition, PaymentDeclined,
//   Rejected, NotFound, StaleOrder
//
// Unexpected outcomes (logged at error level where they are raised):
//   InternalInconsistency, Storage
//
// ============================================================================

/// A product that could not be reserved in the requested quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortage {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("scylla error: {0}")]
    Scylla(String),

    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn scylla(err: impl std::fmt::Display) -> Self {
        StorageError::Scylla(err.to_string())
    }

    pub fn redis(err: impl std::fmt::Display) -> Self {
        StorageError::Redis(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no in-stock cart entries are selected for checkout")]
    EmptySelection,

    #[error("insufficient stock for {}", describe_shortages(.shortages))]
    InsufficientStock { shortages: Vec<StockShortage> },

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("order {order_id} was modified concurrently")]
    StaleOrder { order_id: Uuid },

    #[error("payment declined: {reason}")]
    PaymentDeclined { reason: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Stable machine-readable name, used in API payloads and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::EmptySelection => "EmptySelection",
            EngineError::InsufficientStock { .. } => "InsufficientStock",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::InternalInconsistency(_) => "InternalInconsistency",
            EngineError::NotFound(_) => "NotFound",
            EngineError::StaleOrder { .. } => "StaleOrder",
            EngineError::PaymentDeclined { .. } => "PaymentDeclined",
            EngineError::Rejected(_) => "Rejected",
            EngineError::Storage(_) => "Storage",
        }
    }

    pub fn insufficient(product_id: ProductId, requested: u32, available: u32) -> Self {
        EngineError::InsufficientStock {
            shortages: vec![StockShortage {
                product_id,
                requested,
                available,
            }],
        }
    }
}

fn describe_shortages(shortages: &[StockShortage]) -> String {
    shortages
        .iter()
        .map(|s| format!("{} (requested {}, available {})", s.product_id, s.requested, s.available))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<OrderError> for EngineError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { from, to } => EngineError::InvalidTransition { from, to },
            OrderError::NotInitialized | OrderError::CorruptHistory(_) => {
                EngineError::InternalInconsistency(err.to_string())
            }
            other => EngineError::Rejected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_names_products() {
        let err = EngineError::InsufficientStock {
            shortages: vec![
                StockShortage {
                    product_id: ProductId::new("B"),
                    requested: 1,
                    available: 0,
                },
                StockShortage {
                    product_id: ProductId::new("C"),
                    requested: 3,
                    available: 2,
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("B (requested 1, available 0)"));
        assert!(message.contains("C (requested 3, available 2)"));
        assert_eq!(err.kind(), "InsufficientStock");
    }

    #[test]
    fn test_order_error_mapping() {
        let err: EngineError = OrderError::InvalidTransition {
            from: OrderStatus::Shipped,
            to: OrderStatus::Pending,
        }
        .into();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Pending
            }
        ));

        let err: EngineError = OrderError::TrackingRequired.into();
        assert_eq!(err.kind(), "Rejected");
    }
}
