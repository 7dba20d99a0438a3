//! Reservation store contract and courier operations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use mercato_core::{CourierId, HourMask, OrderId, ReservationId, StoreError, UserId};
use mercato_messaging::{IntentStatus, ReserveAction};

/// Pending reservation joined with the courier's schedule for its work
/// date, as one load.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReservation {
    pub courier_id: CourierId,
    pub work_date: NaiveDate,
    /// Hours the reservation asks for.
    pub requested: HourMask,
    /// Hours already taken in the schedule.
    pub schedule: HourMask,
    /// Schedule-row optimistic-lock token.
    pub version: DateTime<Utc>,
}

/// Full reservation row, as returned to the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourierReservation {
    pub id: ReservationId,
    pub order_id: OrderId,
    pub courier_id: CourierId,
    pub action: ReserveAction,
    pub work_date: NaiveDate,
    pub hour_mask: HourMask,
    pub status: IntentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    /// Load the pending reservation and its schedule row. `None` means no
    /// pending row — a settled redelivery.
    async fn load_pending(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<PendingReservation>, StoreError>;

    /// Flip the requested bits, predicated on the schedule version token.
    /// Returns `StoreError::Conflict` when the schedule moved concurrently.
    async fn apply(
        &self,
        courier_id: CourierId,
        work_date: NaiveDate,
        mask: HourMask,
        action: ReserveAction,
        version: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_ok(&self, reservation_id: ReservationId) -> Result<(), StoreError>;

    async fn mark_failed(&self, reservation_id: ReservationId, error: &str)
        -> Result<(), StoreError>;

    // Courier operations for the HTTP surface.

    /// Register the user as a courier (idempotent).
    async fn create_courier(&self, user_id: UserId) -> Result<CourierId, StoreError>;

    /// Open today's schedule with the given busy mask; fails if one exists.
    async fn create_schedule_today(&self, user_id: UserId, mask: HourMask)
        -> Result<(), StoreError>;

    async fn reservations_by_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<CourierReservation>, StoreError>;

    /// Courier acknowledges the hand-off: order moves to `delivery`.
    async fn confirm_delivery(&self, user_id: UserId, order_id: OrderId)
        -> Result<(), StoreError>;

    /// Courier completes the drop-off: order moves to `delivered`.
    async fn confirm_delivered(&self, user_id: UserId, order_id: OrderId)
        -> Result<(), StoreError>;
}
