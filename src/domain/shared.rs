use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Shared Kernel - identifiers used by every component
// ============================================================================

/// Opaque catalog identifier. Ordering is used to fix the stock lock order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who asked for a lifecycle change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    Buyer,
    Retailer,
    System,
}

impl Initiator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Initiator::Buyer => "buyer",
            Initiator::Retailer => "retailer",
            Initiator::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_ids_sort_lexicographically() {
        let mut ids = vec![ProductId::new("sku-b"), ProductId::new("sku-a"), ProductId::new("sku-c")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "sku-a");
        assert_eq!(ids[2].as_str(), "sku-c");
    }

    #[test]
    fn test_product_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ProductId::new("sku-1")).unwrap();
        assert_eq!(json, "\"sku-1\"");
    }
}
