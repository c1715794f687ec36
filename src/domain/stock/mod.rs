mod errors;
mod ledger;
mod repository;
mod value_objects;

pub use errors::StockError;
pub use ledger::StockLedger;
pub use repository::StockRepository;
pub use value_objects::{StockAvailability, StockRecord};
