//! Payment engine: moves funds between an account and the platform under
//! optimistic locking, with all comparisons in integer cents.

pub mod engine;
pub mod store;

pub use engine::PaymentEngine;
pub use store::{Payment, PaymentStore, PendingPayment};
