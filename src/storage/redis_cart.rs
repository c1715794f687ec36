use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::cart::{CartEntry, CartKey, CartRepository};
use crate::error::StorageError;

// ============================================================================
// Redis cart backend
// ============================================================================
//
// One hash per buyer:
//
//   cart:{buyer_id}   field "{product_id}|{variant}" -> CartEntry as JSON
//
// Every write refreshes the hash TTL, so an abandoned cart expires as a
// whole while an active one survives the session.
//
// ============================================================================

pub struct RedisCartRepository {
    conn_manager: ConnectionManager,
    ttl: Duration,
}

impl RedisCartRepository {
    pub async fn new(redis_url: &str, ttl: Duration) -> Result<Self, StorageError> {
        let client = Client::open(redis_url).map_err(StorageError::redis)?;
        let conn_manager = ConnectionManager::new(client).await.map_err(StorageError::redis)?;

        tracing::info!(redis_url, ttl_secs = ttl.as_secs(), "Connected cart store to Redis");
        Ok(Self { conn_manager, ttl })
    }

    fn cart_key(buyer_id: Uuid) -> String {
        format!("cart:{buyer_id}")
    }

    fn ttl_seconds(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX).max(1)
    }
}

#[async_trait]
impl CartRepository for RedisCartRepository {
    async fn entries(&self, buyer_id: Uuid) -> Result<Vec<CartEntry>, StorageError> {
        let mut conn = self.conn_manager.clone();
        let raw: HashMap<String, String> = conn
            .hgetall(Self::cart_key(buyer_id))
            .await
            .map_err(StorageError::redis)?;

        raw.values()
            .map(|json| serde_json::from_str(json).map_err(StorageError::from))
            .collect()
    }

    async fn get(&self, buyer_id: Uuid, key: &CartKey) -> Result<Option<CartEntry>, StorageError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn
            .hget(Self::cart_key(buyer_id), key.field())
            .await
            .map_err(StorageError::redis)?;

        raw.map(|json| serde_json::from_str(&json).map_err(StorageError::from))
            .transpose()
    }

    async fn put(&self, entry: &CartEntry) -> Result<(), StorageError> {
        let mut conn = self.conn_manager.clone();
        let cart_key = Self::cart_key(entry.buyer_id);
        let json = serde_json::to_string(entry)?;

        let _: () = redis::pipe()
            .atomic()
            .hset(&cart_key, entry.key().field(), json)
            .ignore()
            .expire(&cart_key, self.ttl_seconds())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(StorageError::redis)?;

        Ok(())
    }

    async fn delete(&self, buyer_id: Uuid, key: &CartKey) -> Result<bool, StorageError> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn
            .hdel(Self::cart_key(buyer_id), key.field())
            .await
            .map_err(StorageError::redis)?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, buyer_id: Uuid, keys: &[CartKey]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn_manager.clone();
        let fields: Vec<String> = keys.iter().map(CartKey::field).collect();
        let _: i64 = conn
            .hdel(Self::cart_key(buyer_id), fields)
            .await
            .map_err(StorageError::redis)?;
        Ok(())
    }
}
