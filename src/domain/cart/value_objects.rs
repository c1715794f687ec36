use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::shared::ProductId;

// ============================================================================
// Cart Value Objects
// ============================================================================

/// Identity of an entry inside one buyer's cart
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CartKey {
    pub product_id: ProductId,
    pub variant: Option<String>,
}

impl CartKey {
    pub fn new(product_id: ProductId, variant: Option<String>) -> Self {
        Self { product_id, variant }
    }

    /// Flat form used as a hash field: `{product_id}|{variant}`
    pub fn field(&self) -> String {
        format!("{}|{}", self.product_id, self.variant.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartEntry {
    pub buyer_id: Uuid,
    pub product_id: ProductId,
    pub variant: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub selected: bool,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartEntry {
    pub fn new(buyer_id: Uuid, key: CartKey, quantity: u32) -> Self {
        let now = Utc::now();
        Self {
            buyer_id,
            product_id: key.product_id,
            variant: key.variant,
            quantity,
            selected: false,
            added_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> CartKey {
        CartKey::new(self.product_id.clone(), self.variant.clone())
    }
}

/// Result of `CartStore::upsert`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Stored {
        entry: CartEntry,
        /// Requested quantity was cut down to what is in stock
        clamped: bool,
    },
    Removed,
}

/// A cart entry with its current stock position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    #[serde(flatten)]
    pub entry: CartEntry,
    pub available: u32,
    pub in_stock: bool,
}

/// What checkout may consume right now
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionSnapshot {
    /// Selected and in stock
    pub eligible: Vec<CartEntry>,
    /// Selected but out of stock or no longer stocked at all
    pub ineligible: Vec<CartLine>,
}

impl SelectionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty() && self.ineligible.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_field_format() {
        let key = CartKey::new(ProductId::new("sku-1"), Some("XL".to_string()));
        assert_eq!(key.field(), "sku-1|XL");

        let key = CartKey::new(ProductId::new("sku-1"), None);
        assert_eq!(key.field(), "sku-1|");
    }

    #[test]
    fn test_entry_defaults_to_unselected() {
        let json = r#"{
            "buyer_id": "00000000-0000-0000-0000-000000000001",
            "product_id": "A",
            "variant": null,
            "quantity": 2,
            "added_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let entry: CartEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.selected);
        assert_eq!(entry.key(), CartKey::new(ProductId::new("A"), None));
    }
}
