use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::order::ProductSnapshot;
use crate::domain::shared::ProductId;

/// Price and name lookup used to snapshot order items
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn snapshot(&self, product_id: &ProductId) -> Option<ProductSnapshot>;
}

/// Catalog held in memory; products are added at startup or by tests
#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, ProductSnapshot>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, product_id: ProductId, name: impl Into<String>, unit_price: Decimal, image: Option<String>) {
        let snapshot = ProductSnapshot {
            product_id: product_id.clone(),
            name: name.into(),
            unit_price,
            image,
        };
        self.products
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(product_id, snapshot);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn snapshot(&self, product_id: &ProductId) -> Option<ProductSnapshot> {
        self.products
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(product_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_price_change_does_not_touch_taken_snapshot() {
        let catalog = InMemoryCatalog::new();
        catalog.upsert(ProductId::new("A"), "Widget", Decimal::from(10), None);

        let before = catalog.snapshot(&ProductId::new("A")).await.unwrap();
        catalog.upsert(ProductId::new("A"), "Widget", Decimal::from(99), None);

        assert_eq!(before.unit_price, Decimal::from(10));
        assert_eq!(
            catalog.snapshot(&ProductId::new("A")).await.unwrap().unit_price,
            Decimal::from(99)
        );
        assert!(catalog.snapshot(&ProductId::new("B")).await.is_none());
    }
}
