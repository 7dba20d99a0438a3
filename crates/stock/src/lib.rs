//! Stock engine: applies batched inventory intents under optimistic
//! locking. Either every stock row in a batch moves together or none do.

pub mod engine;
pub mod store;

pub use engine::StockEngine;
pub use store::{CatalogStore, Item, PendingChange, StockChange, StockStore};
