use async_trait::async_trait;

use super::value_objects::StockRecord;
use crate::domain::shared::ProductId;
use crate::error::StorageError;

/// Persistence for stock records.
///
/// Implementations must make `compare_and_swap` atomic: the write succeeds
/// only if the stored version still equals `expected_version`. That single
/// primitive is what makes reserve/release/commit linearizable per product.
#[async_trait]
pub trait StockRepository: Send + Sync {
    async fn load(&self, product_id: &ProductId) -> Result<Option<StockRecord>, StorageError>;

    /// Insert a brand new record; `false` if one already exists
    async fn insert(&self, record: &StockRecord) -> Result<bool, StorageError>;

    /// Replace the stored record if its version is still `expected_version`
    async fn compare_and_swap(&self, expected_version: i64, next: &StockRecord) -> Result<bool, StorageError>;
}
