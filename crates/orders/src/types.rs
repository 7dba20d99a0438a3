//! Order rows and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mercato_core::{HourMask, ItemId, OrderId, UserId};

/// Order lifecycle. Transitions are monotonic except `Canceled`, which is
/// terminal from any non-terminal state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Approved,
    Delivery,
    Delivered,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Delivery => "delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Canceled)
    }

    /// Whether moving to `next` respects the lifecycle.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            OrderStatus::Canceled => true,
            OrderStatus::Pending => false,
            OrderStatus::Approved => matches!(self, OrderStatus::Pending),
            OrderStatus::Delivery => {
                matches!(self, OrderStatus::Pending | OrderStatus::Approved)
            }
            OrderStatus::Delivered => matches!(self, OrderStatus::Delivery),
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub item_id: ItemId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub address: String,
    pub hour_mask: HourMask,
    pub status: OrderStatus,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_is_reachable_from_any_live_state() {
        for s in [OrderStatus::Pending, OrderStatus::Approved, OrderStatus::Delivery] {
            assert!(s.can_transition_to(OrderStatus::Canceled));
        }
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Canceled));
        assert!(!OrderStatus::Canceled.can_transition_to(OrderStatus::Delivery));
    }

    #[test]
    fn forward_transitions_are_monotonic() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Delivery));
        assert!(OrderStatus::Delivery.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivery.can_transition_to(OrderStatus::Approved));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Delivery).unwrap(),
            "\"delivery\""
        );
    }
}
