//! Order model and the saga coordinator.
//!
//! The coordinator is stateless: every routing decision is a function of
//! the incoming status message plus the order row. Forward steps hand an
//! order from stock reservation to payment to courier slot; compensating
//! steps unwind in reverse, always by inserting new intent rows.

pub mod coordinator;
pub mod store;
pub mod types;

pub use coordinator::{
    Coordinator, PaymentStatusHandler, ReserveStatusHandler, StockStatusHandler,
};
pub use store::{Created, NewOrder, SagaStore};
pub use types::{Order, OrderItem, OrderStatus};
