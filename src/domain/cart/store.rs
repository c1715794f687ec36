use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::repository::CartRepository;
use super::value_objects::{CartEntry, CartKey, CartLine, SelectionSnapshot, UpsertOutcome};
use crate::domain::shared::ProductId;
use crate::domain::stock::{StockError, StockLedger};
use crate::error::EngineError;
use crate::utils::KeyedLocks;

// ============================================================================
// Cart Store
// ============================================================================
//
// Staging area only: nothing here reserves or releases stock. Quantities are
// clamped against the ledger's current availability at write time, and
// eligibility for checkout is re-derived from the ledger on every read.
//
// Read-modify-write on a buyer's cart is serialized per buyer.
//
// ============================================================================

pub struct CartStore {
    repo: Arc<dyn CartRepository>,
    ledger: Arc<StockLedger>,
    locks: KeyedLocks<Uuid>,
}

impl CartStore {
    pub fn new(repo: Arc<dyn CartRepository>, ledger: Arc<StockLedger>) -> Self {
        Self {
            repo,
            ledger,
            locks: KeyedLocks::new(),
        }
    }

    /// Create or adjust an entry by `delta`.
    ///
    /// The result is clamped to `[1, available]`; a result of zero or less
    /// deletes the entry. Adding to a product with nothing available fails
    /// with `InsufficientStock` and leaves the cart as it was.
    pub async fn upsert(
        &self,
        buyer_id: Uuid,
        product_id: ProductId,
        variant: Option<String>,
        delta: i64,
    ) -> Result<UpsertOutcome, EngineError> {
        let _guard = self.locks.lock(&buyer_id).await;
        let key = CartKey::new(product_id, variant);

        let existing = self.repo.get(buyer_id, &key).await?;
        let current = existing.as_ref().map(|e| i64::from(e.quantity)).unwrap_or(0);
        let wanted = current.saturating_add(delta);

        if wanted <= 0 {
            if existing.is_some() {
                self.repo.delete(buyer_id, &key).await?;
                tracing::info!(buyer_id = %buyer_id, product_id = %key.product_id, "Removed cart entry");
            }
            return Ok(UpsertOutcome::Removed);
        }

        let available = self.ledger.availability(&key.product_id).await?.available;
        let wanted = u32::try_from(wanted).unwrap_or(u32::MAX);

        let quantity = if available == 0 {
            if delta > 0 {
                tracing::debug!(buyer_id = %buyer_id, product_id = %key.product_id, "Cart add refused, out of stock");
                return Err(EngineError::insufficient(key.product_id, wanted, 0));
            }
            // Shrinking an out-of-stock entry is still allowed
            wanted
        } else {
            wanted.min(available)
        };
        let clamped = quantity < wanted;

        let entry = match existing {
            Some(mut entry) => {
                entry.quantity = quantity;
                entry.updated_at = chrono::Utc::now();
                entry
            }
            None => CartEntry::new(buyer_id, key, quantity),
        };
        self.repo.put(&entry).await?;

        tracing::info!(
            buyer_id = %buyer_id,
            product_id = %entry.product_id,
            variant = entry.variant.as_deref(),
            quantity,
            clamped,
            "Cart entry stored"
        );

        Ok(UpsertOutcome::Stored { entry, clamped })
    }

    pub async fn set_selected(
        &self,
        buyer_id: Uuid,
        product_id: ProductId,
        variant: Option<String>,
        selected: bool,
    ) -> Result<CartEntry, EngineError> {
        let _guard = self.locks.lock(&buyer_id).await;
        let key = CartKey::new(product_id, variant);

        let mut entry = self
            .repo
            .get(buyer_id, &key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("cart entry {}", key.field())))?;

        if entry.selected != selected {
            entry.selected = selected;
            entry.updated_at = chrono::Utc::now();
            self.repo.put(&entry).await?;
        }

        tracing::debug!(buyer_id = %buyer_id, product_id = %entry.product_id, selected, "Cart selection changed");
        Ok(entry)
    }

    pub async fn remove(&self, buyer_id: Uuid, product_id: ProductId, variant: Option<String>) -> Result<bool, EngineError> {
        let _guard = self.locks.lock(&buyer_id).await;
        let key = CartKey::new(product_id, variant);
        Ok(self.repo.delete(buyer_id, &key).await?)
    }

    /// Selected entries split by whether their product is in stock right now
    pub async fn list_selected(&self, buyer_id: Uuid) -> Result<SelectionSnapshot, EngineError> {
        let selected: Vec<CartEntry> = self
            .repo
            .entries(buyer_id)
            .await?
            .into_iter()
            .filter(|entry| entry.selected)
            .collect();

        let stock = self.stock_levels(selected.iter().map(|e| &e.product_id)).await?;

        let mut snapshot = SelectionSnapshot::default();
        for entry in selected {
            let available = stock.get(&entry.product_id).copied().unwrap_or(0);
            if available > 0 {
                snapshot.eligible.push(entry);
            } else {
                snapshot.ineligible.push(CartLine {
                    entry,
                    available,
                    in_stock: false,
                });
            }
        }

        Ok(snapshot)
    }

    /// Every entry with its current availability, oldest first
    pub async fn view(&self, buyer_id: Uuid) -> Result<Vec<CartLine>, EngineError> {
        let mut entries = self.repo.entries(buyer_id).await?;
        entries.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.key().cmp(&b.key())));

        let stock = self.stock_levels(entries.iter().map(|e| &e.product_id)).await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let available = stock.get(&entry.product_id).copied().unwrap_or(0);
                CartLine {
                    entry,
                    available,
                    in_stock: available > 0,
                }
            })
            .collect())
    }

    /// Take what a successful checkout consumed out of the cart.
    ///
    /// `consumed` is the selection as checkout saw it. An entry the buyer
    /// grew after that snapshot keeps the quantity beyond what was ordered.
    pub(crate) async fn remove_consumed(&self, buyer_id: Uuid, consumed: &[CartEntry]) -> Result<(), EngineError> {
        let _guard = self.locks.lock(&buyer_id).await;

        let mut removed: Vec<CartKey> = Vec::new();
        let mut kept = 0usize;

        for snapshot in consumed {
            let key = snapshot.key();
            let Some(mut current) = self.repo.get(buyer_id, &key).await? else {
                continue;
            };

            if current == *snapshot || current.quantity <= snapshot.quantity {
                removed.push(key);
                continue;
            }

            current.quantity -= snapshot.quantity;
            current.updated_at = chrono::Utc::now();
            self.repo.put(&current).await?;
            kept += 1;

            tracing::debug!(
                buyer_id = %buyer_id,
                product_id = %current.product_id,
                remaining = current.quantity,
                "Cart entry grew during checkout, kept the remainder"
            );
        }

        if !removed.is_empty() {
            self.repo.delete_many(buyer_id, &removed).await?;
        }
        tracing::debug!(buyer_id = %buyer_id, removed = removed.len(), kept, "Removed consumed cart entries");
        Ok(())
    }

    async fn stock_levels<'a>(
        &self,
        products: impl Iterator<Item = &'a ProductId>,
    ) -> Result<HashMap<ProductId, u32>, EngineError> {
        let mut levels = HashMap::new();

        for product_id in products {
            if levels.contains_key(product_id) {
                continue;
            }
            let available = match self.ledger.availability(product_id).await {
                Ok(availability) => availability.available,
                Err(StockError::UnknownProduct(_)) => 0,
                Err(e) => return Err(e.into()),
            };
            levels.insert(product_id.clone(), available);
        }

        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{InMemoryCartRepository, InMemoryStockRepository};
    use crate::utils::RetryConfig;
    use std::time::Duration;

    async fn store_with_stock(stock: &[(&str, u32)]) -> CartStore {
        let ledger = Arc::new(StockLedger::new(
            Arc::new(InMemoryStockRepository::new()),
            RetryConfig::stock_cas(8, Duration::from_millis(1)),
        ));
        for (id, available) in stock {
            ledger.register_product(ProductId::new(*id), *available).await.unwrap();
        }
        CartStore::new(Arc::new(InMemoryCartRepository::new()), ledger)
    }

    fn pid(id: &str) -> ProductId {
        ProductId::new(id)
    }

    #[tokio::test]
    async fn test_upsert_clamps_to_available() {
        let store = store_with_stock(&[("A", 3)]).await;
        let buyer = Uuid::new_v4();

        let outcome = store.upsert(buyer, pid("A"), None, 5).await.unwrap();
        match outcome {
            UpsertOutcome::Stored { entry, clamped } => {
                assert_eq!(entry.quantity, 3);
                assert!(clamped);
                assert!(!entry.selected);
            }
            UpsertOutcome::Removed => panic!("entry should be stored"),
        }
    }

    #[tokio::test]
    async fn test_upsert_to_zero_deletes() {
        let store = store_with_stock(&[("A", 3)]).await;
        let buyer = Uuid::new_v4();

        store.upsert(buyer, pid("A"), None, 2).await.unwrap();
        let outcome = store.upsert(buyer, pid("A"), None, -2).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::Removed);
        assert!(store.view(buyer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_variants_are_separate_entries() {
        let store = store_with_stock(&[("A", 10)]).await;
        let buyer = Uuid::new_v4();

        store.upsert(buyer, pid("A"), Some("S".into()), 1).await.unwrap();
        store.upsert(buyer, pid("A"), Some("L".into()), 2).await.unwrap();

        assert_eq!(store.view(buyer).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_out_of_stock_product_is_refused() {
        let store = store_with_stock(&[("B", 0)]).await;
        let buyer = Uuid::new_v4();

        let err = store.upsert(buyer, pid("B"), None, 1).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { .. }));
        assert!(store.view(buyer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let store = store_with_stock(&[]).await;
        let err = store.upsert(Uuid::new_v4(), pid("ghost"), None, 1).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_selected_surfaces_out_of_stock() {
        let store = store_with_stock(&[("A", 5), ("B", 1), ("C", 5)]).await;
        let buyer = Uuid::new_v4();

        store.upsert(buyer, pid("A"), None, 2).await.unwrap();
        store.upsert(buyer, pid("B"), None, 1).await.unwrap();
        store.upsert(buyer, pid("C"), None, 1).await.unwrap();
        store.set_selected(buyer, pid("A"), None, true).await.unwrap();
        store.set_selected(buyer, pid("B"), None, true).await.unwrap();

        // B sells out after it was selected
        store.ledger.reserve(&pid("B"), 1).await.unwrap();

        let snapshot = store.list_selected(buyer).await.unwrap();
        assert_eq!(snapshot.eligible.len(), 1);
        assert_eq!(snapshot.eligible[0].product_id, pid("A"));
        assert_eq!(snapshot.ineligible.len(), 1);
        assert_eq!(snapshot.ineligible[0].entry.product_id, pid("B"));
        assert!(!snapshot.ineligible[0].in_stock);
    }

    #[tokio::test]
    async fn test_view_reports_stock() {
        let store = store_with_stock(&[("A", 4)]).await;
        let buyer = Uuid::new_v4();
        store.upsert(buyer, pid("A"), None, 1).await.unwrap();

        let lines = store.view(buyer).await.unwrap();
        assert_eq!(lines[0].available, 4);
        assert!(lines[0].in_stock);
    }

    #[tokio::test]
    async fn test_set_selected_on_missing_entry() {
        let store = store_with_stock(&[("A", 4)]).await;
        let err = store.set_selected(Uuid::new_v4(), pid("A"), None, true).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_consumed_keeps_later_additions() {
        let store = store_with_stock(&[("A", 10), ("B", 10)]).await;
        let buyer = Uuid::new_v4();

        store.upsert(buyer, pid("A"), None, 1).await.unwrap();
        store.upsert(buyer, pid("B"), None, 2).await.unwrap();
        store.set_selected(buyer, pid("A"), None, true).await.unwrap();
        store.set_selected(buyer, pid("B"), None, true).await.unwrap();
        let snapshot = store.list_selected(buyer).await.unwrap();

        // The buyer adds three more A while checkout is running
        store.upsert(buyer, pid("A"), None, 3).await.unwrap();

        store.remove_consumed(buyer, &snapshot.eligible).await.unwrap();

        let cart = store.view(buyer).await.unwrap();
        assert_eq!(cart.len(), 1);
        assert_eq!(cart[0].entry.product_id, pid("A"));
        assert_eq!(cart[0].entry.quantity, 3);
    }
}
