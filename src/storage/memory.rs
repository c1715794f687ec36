use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::cart::{CartEntry, CartKey, CartRepository};
use crate::domain::checkout::{CheckoutTokenStore, TokenClaim};
use crate::domain::order::OrderIndex;
use crate::domain::shared::ProductId;
use crate::domain::stock::{StockRecord, StockRepository};
use crate::error::StorageError;

// ============================================================================
// In-memory backends
// ============================================================================
//
// Each map sits behind one RwLock, so every trait method is atomic with
// respect to the others: `compare_and_swap` and `claim` check and write under
// the same write guard.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryStockRepository {
    records: RwLock<HashMap<ProductId, StockRecord>>,
}

impl InMemoryStockRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockRepository for InMemoryStockRepository {
    async fn load(&self, product_id: &ProductId) -> Result<Option<StockRecord>, StorageError> {
        Ok(self.records.read().await.get(product_id).cloned())
    }

    async fn insert(&self, record: &StockRecord) -> Result<bool, StorageError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.product_id) {
            return Ok(false);
        }
        records.insert(record.product_id.clone(), record.clone());
        Ok(true)
    }

    async fn compare_and_swap(&self, expected_version: i64, next: &StockRecord) -> Result<bool, StorageError> {
        let mut records = self.records.write().await;
        match records.get_mut(&next.product_id) {
            Some(current) if current.version == expected_version => {
                *current = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryCartRepository {
    carts: RwLock<HashMap<Uuid, BTreeMap<CartKey, CartEntry>>>,
}

impl InMemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn entries(&self, buyer_id: Uuid) -> Result<Vec<CartEntry>, StorageError> {
        Ok(self
            .carts
            .read()
            .await
            .get(&buyer_id)
            .map(|cart| cart.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, buyer_id: Uuid, key: &CartKey) -> Result<Option<CartEntry>, StorageError> {
        Ok(self
            .carts
            .read()
            .await
            .get(&buyer_id)
            .and_then(|cart| cart.get(key))
            .cloned())
    }

    async fn put(&self, entry: &CartEntry) -> Result<(), StorageError> {
        self.carts
            .write()
            .await
            .entry(entry.buyer_id)
            .or_default()
            .insert(entry.key(), entry.clone());
        Ok(())
    }

    async fn delete(&self, buyer_id: Uuid, key: &CartKey) -> Result<bool, StorageError> {
        Ok(self
            .carts
            .write()
            .await
            .get_mut(&buyer_id)
            .and_then(|cart| cart.remove(key))
            .is_some())
    }

    async fn delete_many(&self, buyer_id: Uuid, keys: &[CartKey]) -> Result<(), StorageError> {
        if let Some(cart) = self.carts.write().await.get_mut(&buyer_id) {
            for key in keys {
                cart.remove(key);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCheckoutTokens {
    tokens: RwLock<HashMap<(Uuid, String), Uuid>>,
}

impl InMemoryCheckoutTokens {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckoutTokenStore for InMemoryCheckoutTokens {
    async fn lookup(&self, buyer_id: Uuid, token: &str) -> Result<Option<Uuid>, StorageError> {
        Ok(self.tokens.read().await.get(&(buyer_id, token.to_string())).copied())
    }

    async fn claim(&self, buyer_id: Uuid, token: &str, order_id: Uuid) -> Result<TokenClaim, StorageError> {
        let mut tokens = self.tokens.write().await;
        match tokens.get(&(buyer_id, token.to_string())) {
            Some(existing) => Ok(TokenClaim::Existing(*existing)),
            None => {
                tokens.insert((buyer_id, token.to_string()), order_id);
                Ok(TokenClaim::Claimed)
            }
        }
    }

    async fn release(&self, buyer_id: Uuid, token: &str, order_id: Uuid) -> Result<(), StorageError> {
        let mut tokens = self.tokens.write().await;
        let key = (buyer_id, token.to_string());
        if tokens.get(&key) == Some(&order_id) {
            tokens.remove(&key);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderIndex {
    by_buyer: RwLock<HashMap<Uuid, Vec<(DateTime<Utc>, Uuid)>>>,
}

impl InMemoryOrderIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderIndex for InMemoryOrderIndex {
    async fn record(&self, buyer_id: Uuid, order_id: Uuid, order_date: DateTime<Utc>) -> Result<(), StorageError> {
        let mut by_buyer = self.by_buyer.write().await;
        let orders = by_buyer.entry(buyer_id).or_default();
        if !orders.iter().any(|(_, id)| *id == order_id) {
            orders.push((order_date, order_id));
        }
        Ok(())
    }

    async fn orders_for(&self, buyer_id: Uuid, limit: usize) -> Result<Vec<Uuid>, StorageError> {
        let by_buyer = self.by_buyer.read().await;
        let mut orders = by_buyer.get(&buyer_id).cloned().unwrap_or_default();
        orders.sort_by(|a, b| b.cmp(a));
        Ok(orders.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}
