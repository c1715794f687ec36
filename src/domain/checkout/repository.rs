use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClaim {
    /// The token now points at the order being placed
    Claimed,
    /// Another attempt already claimed the token for this order
    Existing(Uuid),
}

/// `(buyer_id, token) -> order_id` mapping behind checkout idempotency.
///
/// `claim` must be atomic (insert-if-absent) so that two attempts with the
/// same token can never both win, even from different processes.
#[async_trait]
pub trait CheckoutTokenStore: Send + Sync {
    async fn lookup(&self, buyer_id: Uuid, token: &str) -> Result<Option<Uuid>, StorageError>;

    async fn claim(&self, buyer_id: Uuid, token: &str, order_id: Uuid) -> Result<TokenClaim, StorageError>;

    /// Drop a claim whose order was never created; no-op if it points elsewhere
    async fn release(&self, buyer_id: Uuid, token: &str, order_id: Uuid) -> Result<(), StorageError>;
}
