use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use std::sync::Arc;
use uuid::Uuid;

use super::lwt_applied;
use crate::domain::checkout::{CheckoutTokenStore, TokenClaim};
use crate::domain::order::OrderIndex;
use crate::domain::shared::ProductId;
use crate::domain::stock::{StockRecord, StockRepository};
use crate::error::StorageError;

// ============================================================================
// ScyllaDB backends
// ============================================================================
//
// Every write that decides a race is a lightweight transaction:
//
//   stock_records    UPDATE ... IF version = ?      (compare-and-swap)
//   checkout_tokens  INSERT ... IF NOT EXISTS       (first claim wins)
//
// Counters are stored as bigint and narrowed to u32 on read.
//
// ============================================================================

pub const STOCK_RECORDS_CQL: &str = "CREATE TABLE IF NOT EXISTS stock_records (
    product_id text PRIMARY KEY,
    available bigint,
    reserved bigint,
    version bigint,
    updated_at timestamp
)";

pub const CHECKOUT_TOKENS_CQL: &str = "CREATE TABLE IF NOT EXISTS checkout_tokens (
    buyer_id uuid,
    token text,
    order_id uuid,
    created_at timestamp,
    PRIMARY KEY ((buyer_id), token)
)";

pub const ORDERS_BY_BUYER_CQL: &str = "CREATE TABLE IF NOT EXISTS orders_by_buyer (
    buyer_id uuid,
    order_date timestamp,
    order_id uuid,
    PRIMARY KEY ((buyer_id), order_date, order_id)
) WITH CLUSTERING ORDER BY (order_date DESC, order_id DESC)";

fn narrow(product_id: &str, column: &str, value: i64) -> Result<u32, StorageError> {
    u32::try_from(value)
        .map_err(|_| StorageError::Corrupt(format!("stock_records.{column} = {value} for {product_id}")))
}

pub struct ScyllaStockRepository {
    session: Arc<Session>,
}

impl ScyllaStockRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl StockRepository for ScyllaStockRepository {
    async fn load(&self, product_id: &ProductId) -> Result<Option<StockRecord>, StorageError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT available, reserved, version, updated_at FROM stock_records WHERE product_id = ?",
                (product_id.as_str(),),
            )
            .await
            .map_err(StorageError::scylla)?;

        let rows = result.into_rows_result().map_err(StorageError::scylla)?;
        let Some((available, reserved, version, updated_at)) = rows
            .maybe_first_row::<(i64, i64, i64, DateTime<Utc>)>()
            .map_err(StorageError::scylla)?
        else {
            return Ok(None);
        };

        Ok(Some(StockRecord {
            product_id: product_id.clone(),
            available: narrow(product_id.as_str(), "available", available)?,
            reserved: narrow(product_id.as_str(), "reserved", reserved)?,
            version,
            updated_at,
        }))
    }

    async fn insert(&self, record: &StockRecord) -> Result<bool, StorageError> {
        let result = self
            .session
            .query_unpaged(
                "INSERT INTO stock_records (product_id, available, reserved, version, updated_at)
                 VALUES (?, ?, ?, ?, ?) IF NOT EXISTS",
                (
                    record.product_id.as_str(),
                    i64::from(record.available),
                    i64::from(record.reserved),
                    record.version,
                    record.updated_at,
                ),
            )
            .await
            .map_err(StorageError::scylla)?;

        lwt_applied(result)
    }

    async fn compare_and_swap(&self, expected_version: i64, next: &StockRecord) -> Result<bool, StorageError> {
        let result = self
            .session
            .query_unpaged(
                "UPDATE stock_records SET available = ?, reserved = ?, version = ?, updated_at = ?
                 WHERE product_id = ? IF version = ?",
                (
                    i64::from(next.available),
                    i64::from(next.reserved),
                    next.version,
                    next.updated_at,
                    next.product_id.as_str(),
                    expected_version,
                ),
            )
            .await
            .map_err(StorageError::scylla)?;

        lwt_applied(result)
    }
}

pub struct ScyllaCheckoutTokens {
    session: Arc<Session>,
}

impl ScyllaCheckoutTokens {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl CheckoutTokenStore for ScyllaCheckoutTokens {
    async fn lookup(&self, buyer_id: Uuid, token: &str) -> Result<Option<Uuid>, StorageError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT order_id FROM checkout_tokens WHERE buyer_id = ? AND token = ?",
                (buyer_id, token),
            )
            .await
            .map_err(StorageError::scylla)?;

        let rows = result.into_rows_result().map_err(StorageError::scylla)?;
        Ok(rows
            .maybe_first_row::<(Uuid,)>()
            .map_err(StorageError::scylla)?
            .map(|(order_id,)| order_id))
    }

    async fn claim(&self, buyer_id: Uuid, token: &str, order_id: Uuid) -> Result<TokenClaim, StorageError> {
        let result = self
            .session
            .query_unpaged(
                "INSERT INTO checkout_tokens (buyer_id, token, order_id, created_at)
                 VALUES (?, ?, ?, ?) IF NOT EXISTS",
                (buyer_id, token, order_id, Utc::now()),
            )
            .await
            .map_err(StorageError::scylla)?;

        if lwt_applied(result)? {
            return Ok(TokenClaim::Claimed);
        }

        self.lookup(buyer_id, token)
            .await?
            .map(TokenClaim::Existing)
            .ok_or_else(|| StorageError::Corrupt(format!("checkout token {token} claimed but not readable")))
    }

    async fn release(&self, buyer_id: Uuid, token: &str, order_id: Uuid) -> Result<(), StorageError> {
        self.session
            .query_unpaged(
                "DELETE FROM checkout_tokens WHERE buyer_id = ? AND token = ? IF order_id = ?",
                (buyer_id, token, order_id),
            )
            .await
            .map_err(StorageError::scylla)?;
        Ok(())
    }
}

pub struct ScyllaOrderIndex {
    session: Arc<Session>,
}

impl ScyllaOrderIndex {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl OrderIndex for ScyllaOrderIndex {
    async fn record(&self, buyer_id: Uuid, order_id: Uuid, order_date: DateTime<Utc>) -> Result<(), StorageError> {
        self.session
            .query_unpaged(
                "INSERT INTO orders_by_buyer (buyer_id, order_date, order_id) VALUES (?, ?, ?)",
                (buyer_id, order_date, order_id),
            )
            .await
            .map_err(StorageError::scylla)?;
        Ok(())
    }

    async fn orders_for(&self, buyer_id: Uuid, limit: usize) -> Result<Vec<Uuid>, StorageError> {
        let query = format!("SELECT order_id FROM orders_by_buyer WHERE buyer_id = ? LIMIT {limit}");
        let result = self
            .session
            .query_unpaged(query, (buyer_id,))
            .await
            .map_err(StorageError::scylla)?;

        let rows = result.into_rows_result().map_err(StorageError::scylla)?;
        let mut ids = Vec::new();
        for row in rows.rows::<(Uuid,)>().map_err(StorageError::scylla)? {
            let (order_id,) = row.map_err(StorageError::scylla)?;
            ids.push(order_id);
        }
        Ok(ids)
    }
}
