//! Saga store contract: everything the coordinator and the order intake
//! path persist.
//!
//! Creators are idempotent: asked twice for the same logical intent they
//! return the already-existing row instead of inserting a duplicate, so a
//! redelivered status message cannot fork the saga.

use async_trait::async_trait;

use mercato_core::{
    HourMask, OrderId, PaymentId, ReservationId, StockChangeId, StoreError, UserId,
};

use crate::types::{Order, OrderItem, OrderStatus};

/// Outcome of an idempotent creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created<T> {
    New(T),
    /// The intent already exists (redelivered trigger); do not re-emit.
    Existing(T),
}

impl<T> Created<T> {
    pub fn into_inner(self) -> T {
        match self {
            Created::New(value) | Created::Existing(value) => value,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }
}

impl<T: Copy> Created<T> {
    pub fn id(&self) -> T {
        match self {
            Created::New(id) | Created::Existing(id) => *id,
        }
    }
}

/// Validated order submission.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub items: Vec<OrderItem>,
    pub address: String,
    pub hour_mask: HourMask,
}

#[async_trait]
pub trait SagaStore: Send + Sync + 'static {
    /// Validate every item and insert the order in `pending`.
    async fn create_order(&self, user_id: UserId, order: NewOrder) -> Result<OrderId, StoreError>;

    /// Insert one `remove` stock_change per order item, resolving each
    /// item to its stock row. Returns the new intent ids.
    async fn create_stock_changes(&self, order_id: OrderId)
        -> Result<Vec<StockChangeId>, StoreError>;

    /// Guarded status update; terminal states never regress.
    async fn set_order_status(&self, order_id: OrderId, status: OrderStatus)
        -> Result<(), StoreError>;

    async fn order_user(&self, order_id: OrderId) -> Result<UserId, StoreError>;

    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;

    /// Price the batch and insert a `pay` payment for the order. Existing
    /// non-failed pay payment short-circuits to `Existing`.
    async fn create_payment(
        &self,
        order_id: OrderId,
        stock_change_ids: &[StockChangeId],
    ) -> Result<Created<PaymentId>, StoreError>;

    /// Insert a `deposit` of the same amount as the given pay payment.
    async fn revert_payment(&self, payment_id: PaymentId)
        -> Result<Created<PaymentId>, StoreError>;

    /// Pick a courier with the order's hours free (lowest id wins) and
    /// insert a `reserve` reservation. `DomainError::SlotUnavailable` when
    /// no courier qualifies. An existing non-failed reserve reservation
    /// short-circuits to `Existing`.
    async fn create_cour_reserve(
        &self,
        order_id: OrderId,
    ) -> Result<Created<ReservationId>, StoreError>;

    /// Insert a `revert_reserve` against the same courier and mask.
    async fn revert_cour_reserve(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Created<ReservationId>, StoreError>;

    /// For each original `remove`, insert a matching `add` row; returns
    /// the new ids.
    async fn revert_stock_changes(
        &self,
        stock_change_ids: &[StockChangeId],
    ) -> Result<Created<Vec<StockChangeId>>, StoreError>;
}
