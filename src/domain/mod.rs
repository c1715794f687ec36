// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// One subdirectory per component:
// - stock: per-product availability ledger (reserve / release / commit)
// - cart: per-buyer staging area, clamped against stock
// - checkout: selection -> reservations -> exactly one order per token
// - order: event-sourced order aggregate and its lifecycle manager
//
// Persistence lives behind the repository traits each component declares;
// concrete backends are in crate::storage.
//
// ============================================================================

pub mod cart;
pub mod checkout;
pub mod order;
pub mod shared;
pub mod stock;
