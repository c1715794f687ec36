// ============================================================================
// External collaborators, known only by their boundary
// ============================================================================

mod catalog;
mod payment;

pub use catalog::{InMemoryCatalog, ProductCatalog};
pub use payment::{MockPaymentGateway, PaymentGateway, PaymentOutcome, PaymentRequest, RefundFailed};
