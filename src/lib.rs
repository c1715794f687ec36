pub mod api;
pub mod audit;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod event_sourcing;
pub mod health;
pub mod messaging;
pub mod metrics;
pub mod storage;
pub mod utils;

pub use engine::{Backends, Engine, EngineOptions};
pub use error::{EngineError, StorageError};
