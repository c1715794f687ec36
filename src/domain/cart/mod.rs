mod repository;
mod store;
mod value_objects;

pub use repository::CartRepository;
pub use store::CartStore;
pub use value_objects::{CartEntry, CartKey, CartLine, SelectionSnapshot, UpsertOutcome};
