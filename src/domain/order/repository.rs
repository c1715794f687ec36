use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;

/// Buyer -> orders lookup kept next to the event store.
///
/// The event store is keyed by order id only; this index is what makes
/// "my orders" listings possible without scanning every stream.
#[async_trait]
pub trait OrderIndex: Send + Sync {
    async fn record(&self, buyer_id: Uuid, order_id: Uuid, order_date: DateTime<Utc>) -> Result<(), StorageError>;

    /// Order ids for `buyer_id`, newest first
    async fn orders_for(&self, buyer_id: Uuid, limit: usize) -> Result<Vec<Uuid>, StorageError>;
}
