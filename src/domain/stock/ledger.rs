use std::collections::BTreeMap;
use std::sync::Arc;

use super::errors::StockError;
use super::repository::StockRepository;
use super::value_objects::{StockAvailability, StockRecord};
use crate::domain::shared::ProductId;
use crate::error::{EngineError, StockShortage};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Stock Ledger
// ============================================================================
//
// The only component that moves quantities between `available` and
// `reserved`. Each operation is a load / mutate / compare-and-swap cycle on
// a single product record:
//
//   load(v) -> next = f(record) -> CAS(expected = v, next.version = v + 1)
//
// A lost CAS is retried with bounded exponential backoff. Operations on
// different products never contend; operations on the same product are
// linearized by the version check.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StockOp {
    Reserve,
    Release,
    Commit,
    RevertCommit,
    Restock,
}

impl StockOp {
    fn as_str(&self) -> &'static str {
        match self {
            StockOp::Reserve => "reserve",
            StockOp::Release => "release",
            StockOp::Commit => "commit",
            StockOp::RevertCommit => "revert_commit",
            StockOp::Restock => "restock",
        }
    }
}

pub struct StockLedger {
    repo: Arc<dyn StockRepository>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl StockLedger {
    pub fn new(repo: Arc<dyn StockRepository>, retry: RetryConfig) -> Self {
        Self {
            repo,
            retry,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Create the stock record for a new product
    pub async fn register_product(&self, product_id: ProductId, initial: u32) -> Result<StockRecord, StockError> {
        let record = StockRecord::new(product_id, initial);

        if !self.repo.insert(&record).await? {
            return Err(StockError::AlreadyRegistered(record.product_id));
        }

        tracing::info!(product_id = %record.product_id, available = initial, "Registered product stock");
        Ok(record)
    }

    pub async fn restock(&self, product_id: &ProductId, quantity: u32) -> Result<StockRecord, StockError> {
        self.update(StockOp::Restock, product_id, quantity, |record| record.restocked(quantity))
            .await
    }

    /// Hold `quantity` for an order being placed.
    ///
    /// If the record stays contended through every retry the caller gets
    /// `Insufficient` carrying the last observed availability, never an
    /// unbounded wait.
    pub async fn reserve(&self, product_id: &ProductId, quantity: u32) -> Result<StockRecord, StockError> {
        match self
            .update(StockOp::Reserve, product_id, quantity, |record| record.reserved(quantity))
            .await
        {
            Err(StockError::Contention { .. }) => {
                let available = self.record(product_id).await.map(|r| r.available).unwrap_or(0);
                Err(StockError::Insufficient {
                    product_id: product_id.clone(),
                    requested: quantity,
                    available,
                })
            }
            other => other,
        }
    }

    pub async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<StockRecord, StockError> {
        self.update(StockOp::Release, product_id, quantity, |record| record.released(quantity))
            .await
    }

    pub async fn commit(&self, product_id: &ProductId, quantity: u32) -> Result<StockRecord, StockError> {
        self.update(StockOp::Commit, product_id, quantity, |record| record.committed(quantity))
            .await
    }

    /// Put committed quantity back into reserved.
    ///
    /// Only used to compensate a shipment whose order event could not be
    /// appended after the commit already went through.
    pub(crate) async fn revert_commit(&self, product_id: &ProductId, quantity: u32) -> Result<StockRecord, StockError> {
        self.update(StockOp::RevertCommit, product_id, quantity, |record| record.uncommitted(quantity))
            .await
    }

    pub async fn record(&self, product_id: &ProductId) -> Result<StockRecord, StockError> {
        self.repo
            .load(product_id)
            .await?
            .ok_or_else(|| StockError::UnknownProduct(product_id.clone()))
    }

    pub async fn availability(&self, product_id: &ProductId) -> Result<StockAvailability, StockError> {
        self.record(product_id).await.map(|record| StockAvailability::from(&record))
    }

    /// Reserve every line or nothing.
    ///
    /// Lines are visited in ascending product order. All lines are attempted
    /// so the caller learns every shortage at once; whatever was acquired is
    /// released again before the shortages are returned.
    pub async fn reserve_all(&self, lines: &BTreeMap<ProductId, u32>) -> Result<(), EngineError> {
        let mut acquired: Vec<(&ProductId, u32)> = Vec::with_capacity(lines.len());
        let mut shortages = Vec::new();
        let mut fatal: Option<EngineError> = None;

        for (product_id, &quantity) in lines {
            match self.reserve(product_id, quantity).await {
                Ok(_) => acquired.push((product_id, quantity)),
                Err(StockError::Insufficient {
                    product_id,
                    requested,
                    available,
                }) => shortages.push(StockShortage {
                    product_id,
                    requested,
                    available,
                }),
                Err(StockError::UnknownProduct(product_id)) => shortages.push(StockShortage {
                    product_id,
                    requested: quantity,
                    available: 0,
                }),
                Err(other) => {
                    fatal = Some(other.into());
                    break;
                }
            }
        }

        if shortages.is_empty() && fatal.is_none() {
            return Ok(());
        }

        let lines_acquired: BTreeMap<ProductId, u32> =
            acquired.into_iter().map(|(product_id, quantity)| (product_id.clone(), quantity)).collect();
        self.release_all(&lines_acquired).await?;

        match fatal {
            Some(err) => Err(err),
            None => Err(EngineError::InsufficientStock { shortages }),
        }
    }

    /// Release every line, continuing past failures.
    ///
    /// Any failure here means stock and orders disagree; it is logged and
    /// surfaced as `InternalInconsistency` after the remaining lines ran.
    pub async fn release_all(&self, lines: &BTreeMap<ProductId, u32>) -> Result<(), EngineError> {
        let mut failures = Vec::new();

        for (product_id, &quantity) in lines {
            if let Err(e) = self.release(product_id, quantity).await {
                tracing::error!(
                    product_id = %product_id,
                    quantity,
                    error = %e,
                    "Failed to release reserved stock"
                );
                failures.push(format!("{product_id}: {e}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::InternalInconsistency(format!(
                "stock release failed for {}",
                failures.join("; ")
            )))
        }
    }

    async fn update<F>(
        &self,
        op: StockOp,
        product_id: &ProductId,
        quantity: u32,
        mutate: F,
    ) -> Result<StockRecord, StockError>
    where
        F: Fn(&StockRecord) -> Result<StockRecord, StockError> + Sync,
    {
        let mutate = &mutate;
        let metrics = self.metrics.as_deref();

        let result = retry_on_transient(self.retry.clone(), op.as_str(), move |attempt| {
            if attempt > 1 {
                if let Some(metrics) = metrics {
                    metrics.record_stock_retry(op.as_str());
                }
            }
            self.try_update(product_id, mutate)
        })
        .await;

        let exhausted = result.is_exhausted();
        let result = result.into_result();

        let outcome = match &result {
            Ok(_) => "ok",
            Err(StockError::Insufficient { .. }) => "insufficient",
            Err(StockError::Contention { .. }) => "contention",
            Err(_) => "error",
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_stock_operation(op.as_str(), outcome);
        }

        match &result {
            Ok(record) => tracing::debug!(
                op = op.as_str(),
                product_id = %product_id,
                quantity,
                available = record.available,
                reserved = record.reserved,
                version = record.version,
                "Stock updated"
            ),
            Err(e) if exhausted => tracing::warn!(
                op = op.as_str(),
                product_id = %product_id,
                quantity,
                attempts = self.retry.max_attempts,
                error = %e,
                "Stock update gave up under contention"
            ),
            Err(_) => {}
        }

        result
    }

    async fn try_update<F>(&self, product_id: &ProductId, mutate: &F) -> Result<StockRecord, StockError>
    where
        F: Fn(&StockRecord) -> Result<StockRecord, StockError> + Sync,
    {
        let current = self.record(product_id).await?;
        let next = mutate(&current)?;

        if self.repo.compare_and_swap(current.version, &next).await? {
            Ok(next)
        } else {
            Err(StockError::Contention {
                product_id: product_id.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStockRepository;
    use std::time::Duration;

    fn ledger() -> StockLedger {
        StockLedger::new(
            Arc::new(InMemoryStockRepository::new()),
            RetryConfig::stock_cas(64, Duration::from_millis(1)),
        )
    }

    fn pid(id: &str) -> ProductId {
        ProductId::new(id)
    }

    #[tokio::test]
    async fn test_reserve_and_commit() {
        let ledger = ledger();
        ledger.register_product(pid("A"), 5).await.unwrap();

        ledger.reserve(&pid("A"), 2).await.unwrap();
        let record = ledger.record(&pid("A")).await.unwrap();
        assert_eq!((record.available, record.reserved), (3, 2));

        ledger.commit(&pid("A"), 2).await.unwrap();
        let record = ledger.record(&pid("A")).await.unwrap();
        assert_eq!((record.available, record.reserved), (3, 0));
    }

    #[tokio::test]
    async fn test_reserve_unknown_product() {
        let ledger = ledger();
        let err = ledger.reserve(&pid("missing"), 1).await.unwrap_err();
        assert!(matches!(err, StockError::UnknownProduct(_)));
    }

    #[tokio::test]
    async fn test_register_twice_is_rejected() {
        let ledger = ledger();
        ledger.register_product(pid("A"), 5).await.unwrap();
        let err = ledger.register_product(pid("A"), 9).await.unwrap_err();
        assert!(matches!(err, StockError::AlreadyRegistered(_)));
        assert_eq!(ledger.record(&pid("A")).await.unwrap().available, 5);
    }

    #[tokio::test]
    async fn test_reserve_all_rolls_back_on_shortage() {
        let ledger = ledger();
        ledger.register_product(pid("A"), 5).await.unwrap();
        ledger.register_product(pid("B"), 0).await.unwrap();

        let lines = BTreeMap::from([(pid("A"), 2), (pid("B"), 1)]);
        let err = ledger.reserve_all(&lines).await.unwrap_err();

        match err {
            EngineError::InsufficientStock { shortages } => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].product_id, pid("B"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let a = ledger.record(&pid("A")).await.unwrap();
        assert_eq!((a.available, a.reserved), (5, 0));
    }

    #[tokio::test]
    async fn test_release_more_than_reserved_is_inconsistent() {
        let ledger = ledger();
        ledger.register_product(pid("A"), 5).await.unwrap();
        ledger.reserve(&pid("A"), 1).await.unwrap();

        let err: EngineError = ledger.release(&pid("A"), 2).await.unwrap_err().into();
        assert!(matches!(err, EngineError::InternalInconsistency(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversell() {
        let ledger = Arc::new(ledger());
        ledger.register_product(pid("A"), 10).await.unwrap();

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.reserve(&pid("A"), 1).await.is_ok() })
            })
            .collect();

        let results = futures_util::future::join_all(handles).await;
        let succeeded = results.into_iter().filter(|r| matches!(r, Ok(true))).count();

        let record = ledger.record(&pid("A")).await.unwrap();
        assert_eq!(succeeded as u32, record.reserved);
        assert_eq!(record.available + record.reserved, 10);
        assert!(record.reserved <= 10);
    }
}
