use crate::domain::shared::ProductId;
use crate::error::{EngineError, StockShortage, StorageError};
use crate::utils::IsTransient;

// ============================================================================
// Stock Ledger Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    Insufficient {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("no stock record for product {0}")]
    UnknownProduct(ProductId),

    #[error("stock record for {0} already exists")]
    AlreadyRegistered(ProductId),

    #[error("release of {requested} for {product_id} exceeds reserved {reserved}")]
    OverRelease {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    #[error("commit of {requested} for {product_id} exceeds reserved {reserved}")]
    OverCommit {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    #[error("stock counter overflow for {product_id}")]
    Overflow { product_id: ProductId },

    #[error("lost compare-and-swap race on {product_id}")]
    Contention { product_id: ProductId },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IsTransient for StockError {
    fn is_transient(&self) -> bool {
        matches!(self, StockError::Contention { .. })
    }
}

impl From<StockError> for EngineError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::Insufficient {
                product_id,
                requested,
                available,
            } => EngineError::InsufficientStock {
                shortages: vec![StockShortage {
                    product_id,
                    requested,
                    available,
                }],
            },
            StockError::UnknownProduct(product_id) => EngineError::NotFound(format!("product {product_id}")),
            StockError::AlreadyRegistered(product_id) => {
                EngineError::Rejected(format!("product {product_id} already has a stock record"))
            }
            StockError::Storage(e) => EngineError::Storage(e),
            other @ (StockError::OverRelease { .. }
            | StockError::OverCommit { .. }
            | StockError::Overflow { .. }
            | StockError::Contention { .. }) => EngineError::InternalInconsistency(other.to_string()),
        }
    }
}
