// ============================================================================
// Storage Backends
// ============================================================================
//
// - memory: process-local maps, used by tests and the default binary setup
// - scylla_store: stock records (LWT compare-and-swap), checkout tokens,
//   buyer order index and schema bootstrap
// - redis_cart: TTL-bound cart hashes
//
// The order event stream itself lives in crate::event_sourcing.
//
// ============================================================================

pub mod memory;
pub mod redis_cart;
pub mod scylla_store;

use scylla::client::session::Session;
use scylla::response::query_result::QueryResult;
use scylla::value::Row;

use crate::error::StorageError;
use crate::event_sourcing::ScyllaEventStore;
use crate::domain::order::OrderEvent;

pub use memory::{InMemoryCartRepository, InMemoryCheckoutTokens, InMemoryOrderIndex, InMemoryStockRepository};
pub use redis_cart::RedisCartRepository;
pub use scylla_store::{ScyllaCheckoutTokens, ScyllaOrderIndex, ScyllaStockRepository};

pub const ORDER_EVENTS_TABLE: &str = "order_events";

/// Read the `[applied]` column of a lightweight-transaction result.
///
/// A rejected conditional write also returns the current row, so the result
/// is read untyped and only the first column is inspected.
pub(crate) fn lwt_applied(result: QueryResult) -> Result<bool, StorageError> {
    let rows = result.into_rows_result().map_err(StorageError::scylla)?;
    let row = rows.maybe_first_row::<Row>().map_err(StorageError::scylla)?;

    let applied = row
        .and_then(|row| row.columns.into_iter().next().flatten())
        .ok_or_else(|| StorageError::Corrupt("conditional write returned no [applied] column".to_string()))?;

    applied
        .as_boolean()
        .ok_or_else(|| StorageError::Corrupt("[applied] column is not a boolean".to_string()))
}

/// Create the keyspace and every table the engine uses, then switch to it
pub async fn ensure_schema(session: &Session, keyspace: &str) -> Result<(), StorageError> {
    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}"
            ),
            &[],
        )
        .await
        .map_err(StorageError::scylla)?;

    session.use_keyspace(keyspace, false).await.map_err(StorageError::scylla)?;

    let statements = [
        ScyllaEventStore::<OrderEvent>::create_table_cql(ORDER_EVENTS_TABLE),
        scylla_store::STOCK_RECORDS_CQL.to_string(),
        scylla_store::CHECKOUT_TOKENS_CQL.to_string(),
        scylla_store::ORDERS_BY_BUYER_CQL.to_string(),
    ];

    for statement in statements {
        session.query_unpaged(statement, &[]).await.map_err(StorageError::scylla)?;
    }

    tracing::info!(keyspace, "ScyllaDB schema ready");
    Ok(())
}
