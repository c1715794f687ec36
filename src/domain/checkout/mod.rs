mod orchestrator;
mod repository;

pub use orchestrator::{CheckoutOrchestrator, CheckoutOutcome, CheckoutRequest};
pub use repository::{CheckoutTokenStore, TokenClaim};
