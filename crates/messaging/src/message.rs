//! Wire messages.
//!
//! UTF-8 JSON objects with small-integer enums; unknown fields are
//! ignored, absent optional fields default. The saga message carries every
//! id picked up along the pipeline so compensating steps need no lookup
//! beyond the order row.

use serde::{Deserialize, Serialize};

use mercato_core::{OrderId, PaymentId, ReservationId, StockChangeId, UserId};

macro_rules! int_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(into = "i8", try_from = "i8")]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl From<$name> for i8 {
            fn from(value: $name) -> i8 {
                match value {
                    $($name::$variant => $value),+
                }
            }
        }

        impl TryFrom<i8> for $name {
            type Error = String;

            fn try_from(value: i8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!(
                        "unknown {} value: {}", stringify!($name), other
                    )),
                }
            }
        }
    };
}

int_enum! {
    /// Intent outcome carried on every topic pair.
    IntentStatus { Pending = 0, Ok = 1, Failed = 2 }
}

int_enum! {
    /// Stock mutation direction. `Add` rows are the rollback pair of
    /// earlier `Remove` rows.
    StockAction { Add = 0, Remove = 1 }
}

int_enum! {
    /// Money movement direction. `Deposit` reverts an earlier `Pay`.
    PaymentAction { Deposit = 0, Pay = 1 }
}

int_enum! {
    /// Courier-slot bit flip direction.
    ReserveAction { RevertReserve = 0, Reserve = 1 }
}

impl StockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockAction::Add => "add",
            StockAction::Remove => "remove",
        }
    }
}

impl PaymentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentAction::Deposit => "deposit",
            PaymentAction::Pay => "pay",
        }
    }
}

impl ReserveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReserveAction::RevertReserve => "revert_reserve",
            ReserveAction::Reserve => "reserve",
        }
    }
}

/// The single durable context flowing between processors. The `action`
/// type parameter pins the enum the owning topic pair interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaMessage<A> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,

    pub order_id: OrderId,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stock_change_ids: Vec<StockChangeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cour_reservation_id: Option<ReservationId>,

    pub action: A,

    #[serde(default)]
    pub status: IntentStatus,

    #[serde(default)]
    pub retry_count: u32,
}

pub type StockChangeMessage = SagaMessage<StockAction>;
pub type PaymentMessage = SagaMessage<PaymentAction>;
pub type CourReserveMessage = SagaMessage<ReserveAction>;

impl<A> SagaMessage<A> {
    /// Flip to a terminal status, keeping every other field.
    pub fn with_status(mut self, status: IntentStatus) -> Self {
        self.status = status;
        self
    }
}

/// One-way user-facing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub user_id: UserId,
    pub order_id: OrderId,
    pub message: String,
}
