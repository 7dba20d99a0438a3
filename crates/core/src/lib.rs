//! Core domain primitives: identifiers, errors, money, hour masks, retry.

pub mod error;
pub mod hour_mask;
pub mod id;
pub mod money;
pub mod retry;
pub mod shutdown;

pub use error::{truncate_error, DomainError, DomainResult, StoreError};
pub use hour_mask::HourMask;
pub use id::{
    AccountId, CourierId, ItemId, OrderId, PaymentId, ReservationId, StockChangeId, StockId,
    UserId,
};
pub use retry::{retry, Attempt, RetryPolicy};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownHandle};
