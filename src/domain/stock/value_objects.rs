use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StockError;
use crate::domain::shared::ProductId;

// ============================================================================
// Stock Value Objects
// ============================================================================

/// Authoritative stock counters for one product.
///
/// Quantities are unsigned, so the non-negativity invariants hold by
/// construction. Every mutation goes through `reserved`, `released` or
/// `committed`, which return the next record with `version + 1`; the
/// repository only accepts it if nobody else bumped the version meanwhile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    pub fn new(product_id: ProductId, available: u32) -> Self {
        Self {
            product_id,
            available,
            reserved: 0,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    pub fn is_in_stock(&self) -> bool {
        self.available > 0
    }

    /// Move `quantity` from available to reserved
    pub fn reserved(&self, quantity: u32) -> Result<Self, StockError> {
        if quantity == 0 || self.available < quantity {
            return Err(StockError::Insufficient {
                product_id: self.product_id.clone(),
                requested: quantity,
                available: self.available,
            });
        }

        Ok(self.next(self.available - quantity, self.reserved + quantity))
    }

    /// Move `quantity` from reserved back to available
    pub fn released(&self, quantity: u32) -> Result<Self, StockError> {
        if self.reserved < quantity {
            return Err(StockError::OverRelease {
                product_id: self.product_id.clone(),
                requested: quantity,
                reserved: self.reserved,
            });
        }

        let available = self.available.checked_add(quantity).ok_or_else(|| StockError::Overflow {
            product_id: self.product_id.clone(),
        })?;

        Ok(self.next(available, self.reserved - quantity))
    }

    /// Consume `quantity` of reserved stock for good
    pub fn committed(&self, quantity: u32) -> Result<Self, StockError> {
        if self.reserved < quantity {
            return Err(StockError::OverCommit {
                product_id: self.product_id.clone(),
                requested: quantity,
                reserved: self.reserved,
            });
        }

        Ok(self.next(self.available, self.reserved - quantity))
    }

    /// Undo a commit whose order transition was not recorded
    pub fn uncommitted(&self, quantity: u32) -> Result<Self, StockError> {
        let reserved = self.reserved.checked_add(quantity).ok_or_else(|| StockError::Overflow {
            product_id: self.product_id.clone(),
        })?;

        Ok(self.next(self.available, reserved))
    }

    /// Add newly received stock to available
    pub fn restocked(&self, quantity: u32) -> Result<Self, StockError> {
        let available = self.available.checked_add(quantity).ok_or_else(|| StockError::Overflow {
            product_id: self.product_id.clone(),
        })?;

        Ok(self.next(available, self.reserved))
    }

    fn next(&self, available: u32, reserved: u32) -> Self {
        Self {
            product_id: self.product_id.clone(),
            available,
            reserved,
            version: self.version + 1,
            updated_at: Utc::now(),
        }
    }
}

/// Read-only view handed to buyers and the cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAvailability {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u32,
    pub in_stock: bool,
}

impl From<&StockRecord> for StockAvailability {
    fn from(record: &StockRecord) -> Self {
        Self {
            product_id: record.product_id.clone(),
            available: record.available,
            reserved: record.reserved,
            in_stock: record.is_in_stock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(available: u32) -> StockRecord {
        StockRecord::new(ProductId::new("A"), available)
    }

    #[test]
    fn test_reserve_moves_quantity() {
        let next = record(5).reserved(2).unwrap();
        assert_eq!(next.available, 3);
        assert_eq!(next.reserved, 2);
        assert_eq!(next.version, 2);
    }

    #[test]
    fn test_reserve_more_than_available_fails() {
        let err = record(1).reserved(2).unwrap_err();
        assert!(matches!(err, StockError::Insufficient { requested: 2, available: 1, .. }));
    }

    #[test]
    fn test_reserve_zero_is_rejected() {
        assert!(record(5).reserved(0).is_err());
    }

    #[test]
    fn test_release_cannot_invent_stock() {
        let reserved = record(5).reserved(2).unwrap();

        let err = reserved.released(3).unwrap_err();
        assert!(matches!(err, StockError::OverRelease { requested: 3, reserved: 2, .. }));

        let released = reserved.released(2).unwrap();
        assert_eq!(released.available, 5);
        assert_eq!(released.reserved, 0);
    }

    #[test]
    fn test_commit_leaves_available_untouched() {
        let committed = record(5).reserved(2).unwrap().committed(2).unwrap();
        assert_eq!(committed.available, 3);
        assert_eq!(committed.reserved, 0);
    }

    #[test]
    fn test_double_commit_is_detected() {
        let committed = record(5).reserved(2).unwrap().committed(2).unwrap();
        assert!(matches!(committed.committed(2), Err(StockError::OverCommit { .. })));
    }

    #[test]
    fn test_total_is_conserved_across_reserve_and_release() {
        let start = record(7);
        let total = start.available + start.reserved;

        let after = start.reserved(4).unwrap().released(1).unwrap().reserved(2).unwrap();
        assert_eq!(after.available + after.reserved, total);
    }
}
