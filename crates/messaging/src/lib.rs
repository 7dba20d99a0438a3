//! Message bus abstraction and processor runtime.
//!
//! A processor is a long-running task pair bound to one pair of topics:
//! a consumer loop that dispatches decoded messages to a handler, and a
//! producer loop that drains a bounded queue onto the output topic.
//! At-least-once delivery is the contract everywhere; handlers must be
//! idempotent.

pub mod bus;
pub mod memory;
pub mod message;
pub mod processor;
pub mod topic;

pub use bus::{MessageBus, Subscription};
pub use memory::InMemoryBus;
pub use message::{
    CourReserveMessage, IntentStatus, NotificationMessage, PaymentAction, PaymentMessage,
    ReserveAction, SagaMessage, StockAction, StockChangeMessage,
};
pub use processor::{outbound_queue, spawn_consumer, spawn_producer, MessageHandler, Outbound};
