use async_trait::async_trait;
use uuid::Uuid;

use super::value_objects::{CartEntry, CartKey};
use crate::error::StorageError;

/// Per-buyer cart persistence. Entries are unique per `CartKey`.
#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn entries(&self, buyer_id: Uuid) -> Result<Vec<CartEntry>, StorageError>;

    async fn get(&self, buyer_id: Uuid, key: &CartKey) -> Result<Option<CartEntry>, StorageError>;

    /// Insert or replace
    async fn put(&self, entry: &CartEntry) -> Result<(), StorageError>;

    /// `false` if there was nothing to delete
    async fn delete(&self, buyer_id: Uuid, key: &CartKey) -> Result<bool, StorageError>;

    async fn delete_many(&self, buyer_id: Uuid, keys: &[CartKey]) -> Result<(), StorageError>;
}
