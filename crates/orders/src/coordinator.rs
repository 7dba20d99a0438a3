//! The saga coordinator.
//!
//! Consumes the three `_status` topics and decides the next forward or
//! compensating step. Termination: every finite sequence of engine
//! outcomes ends with the order in `delivery` or `canceled`.
//!
//! The unwind chain on a dead reservation is
//! deposit → revert_reserve → stock(add) → canceled, so the worst case
//! emits `reserve_retry_budget + 4` messages (retries, refund, slot
//! cleanup, inventory return, notification).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use mercato_core::{DomainError, OrderId, StockChangeId, StoreError};
use mercato_messaging::{
    CourReserveMessage, IntentStatus, MessageHandler, Outbound, PaymentAction, PaymentMessage,
    ReserveAction, StockAction, StockChangeMessage,
};
use mercato_notify::Notifier;

use crate::store::SagaStore;
use crate::types::OrderStatus;

pub struct Coordinator<S> {
    store: Arc<S>,
    stock_out: Outbound<StockChangeMessage>,
    payment_out: Outbound<PaymentMessage>,
    reserve_out: Outbound<CourReserveMessage>,
    notifier: Notifier,
    /// How many times a failed reservation is re-attempted with a freshly
    /// picked courier before the saga rolls back.
    reserve_retry_budget: u32,
}

impl<S: SagaStore> Coordinator<S> {
    pub fn new(
        store: Arc<S>,
        stock_out: Outbound<StockChangeMessage>,
        payment_out: Outbound<PaymentMessage>,
        reserve_out: Outbound<CourReserveMessage>,
        notifier: Notifier,
        reserve_retry_budget: u32,
    ) -> Self {
        Self {
            store,
            stock_out,
            payment_out,
            reserve_out,
            notifier,
            reserve_retry_budget,
        }
    }

    pub async fn on_stock_status(&self, msg: StockChangeMessage) {
        if msg.status == IntentStatus::Pending
            || msg.order_id.is_nil()
            || msg.stock_change_ids.is_empty()
        {
            warn!(
                order_id = %msg.order_id,
                stock_change_ids = ?msg.stock_change_ids,
                status = ?msg.status,
                "received bad stock_change message"
            );
            return;
        }

        match (msg.status, msg.action) {
            // Goods reserved on the shelf; charge the customer.
            (IntentStatus::Ok, StockAction::Remove) => {
                match self
                    .store
                    .create_payment(msg.order_id, &msg.stock_change_ids)
                    .await
                {
                    Ok(created) if created.is_new() => {
                        self.payment_out
                            .push(PaymentMessage {
                                payment_id: Some(created.id()),
                                order_id: msg.order_id,
                                stock_change_ids: msg.stock_change_ids,
                                cour_reservation_id: None,
                                action: PaymentAction::Pay,
                                status: IntentStatus::Pending,
                                retry_count: 0,
                            })
                            .await;
                    }
                    Ok(created) => {
                        debug!(order_id = %msg.order_id, payment_id = %created.id(), "pay payment already exists, skipping");
                    }
                    Err(err) => {
                        error!(%err, order_id = %msg.order_id, "create payment failed, reverting stock");
                        self.start_stock_revert(msg.order_id, &msg.stock_change_ids)
                            .await;
                    }
                }
            }
            // Inventory returned; the saga is fully unwound.
            (IntentStatus::Ok, StockAction::Add) => self.cancel_order(msg.order_id).await,
            // Reservation never took hold (or the return itself died):
            // the order cannot proceed.
            (IntentStatus::Failed, _) => self.cancel_order(msg.order_id).await,
            (IntentStatus::Pending, _) => unreachable!("validated above"),
        }
    }

    pub async fn on_payment_status(&self, msg: PaymentMessage) {
        let Some(payment_id) = msg.payment_id.filter(|id| !id.is_nil()) else {
            warn!(order_id = %msg.order_id, status = ?msg.status, "received bad payment message");
            return;
        };
        if msg.status == IntentStatus::Pending || msg.order_id.is_nil() {
            warn!(%payment_id, order_id = %msg.order_id, status = ?msg.status, "received bad payment message");
            return;
        }

        match (msg.status, msg.action) {
            // Money captured; book a courier slot.
            (IntentStatus::Ok, PaymentAction::Pay) => {
                self.start_reservation(&msg, 0).await;
            }
            // Refund landed; release the courier slot next.
            (IntentStatus::Ok, PaymentAction::Deposit) => {
                match msg.cour_reservation_id.filter(|id| !id.is_nil()) {
                    Some(reservation_id) => {
                        match self.store.revert_cour_reserve(reservation_id).await {
                            Ok(created) if created.is_new() => {
                                self.reserve_out
                                    .push(CourReserveMessage {
                                        payment_id: msg.payment_id,
                                        order_id: msg.order_id,
                                        stock_change_ids: msg.stock_change_ids,
                                        cour_reservation_id: Some(created.id()),
                                        action: ReserveAction::RevertReserve,
                                        status: IntentStatus::Pending,
                                        retry_count: 0,
                                    })
                                    .await;
                            }
                            Ok(created) => {
                                debug!(reservation_id = %created.id(), "revert reservation already exists, skipping");
                            }
                            Err(err) => {
                                error!(%err, %reservation_id, "failed to revert cour_reserve, returning stock");
                                self.start_stock_revert(msg.order_id, &msg.stock_change_ids)
                                    .await;
                            }
                        }
                    }
                    // No reservation was ever created; go straight to the
                    // inventory return.
                    None => {
                        self.start_stock_revert(msg.order_id, &msg.stock_change_ids)
                            .await;
                    }
                }
            }
            // Charge rejected; put the goods back.
            (IntentStatus::Failed, PaymentAction::Pay) => {
                self.start_stock_revert(msg.order_id, &msg.stock_change_ids)
                    .await;
            }
            // Refund rejected: money needs an operator, inventory still
            // returns and the order still cancels.
            (IntentStatus::Failed, PaymentAction::Deposit) => {
                error!(%payment_id, order_id = %msg.order_id, "deposit failed; refund requires manual intervention");
                self.start_stock_revert(msg.order_id, &msg.stock_change_ids)
                    .await;
            }
            (IntentStatus::Pending, _) => unreachable!("validated above"),
        }
    }

    pub async fn on_reserve_status(&self, msg: CourReserveMessage) {
        let Some(reservation_id) = msg.cour_reservation_id.filter(|id| !id.is_nil()) else {
            warn!(order_id = %msg.order_id, status = ?msg.status, "received bad cour_reserve message");
            return;
        };
        if msg.status == IntentStatus::Pending || msg.order_id.is_nil() {
            warn!(%reservation_id, order_id = %msg.order_id, status = ?msg.status, "received bad cour_reserve message");
            return;
        }

        match (msg.status, msg.action) {
            // Slot booked: the order is on its way.
            (IntentStatus::Ok, ReserveAction::Reserve) => self.deliver_order(msg.order_id).await,
            // Slot released during unwind; return the inventory.
            (IntentStatus::Ok, ReserveAction::RevertReserve) => {
                self.start_stock_revert(msg.order_id, &msg.stock_change_ids)
                    .await;
            }
            (IntentStatus::Failed, ReserveAction::Reserve) => {
                let ctx = payment_context(&msg);
                if msg.retry_count < self.reserve_retry_budget {
                    self.start_reservation(&ctx, msg.retry_count + 1).await;
                } else {
                    info!(order_id = %msg.order_id, retries = msg.retry_count, "reservation retries exhausted, refunding");
                    self.start_refund(&ctx).await;
                }
            }
            // Slot cleanup failed (DB trouble); keep unwinding so the
            // order still reaches a terminal state.
            (IntentStatus::Failed, ReserveAction::RevertReserve) => {
                error!(%reservation_id, order_id = %msg.order_id, "revert_reserve failed; schedule needs manual check");
                self.start_stock_revert(msg.order_id, &msg.stock_change_ids)
                    .await;
            }
            (IntentStatus::Pending, _) => unreachable!("validated above"),
        }
    }

    /// Create (or re-find) a reservation for the order and emit the
    /// reserve command. Falls through to the refund chain when no courier
    /// has the slot free.
    async fn start_reservation(&self, ctx: &PaymentMessage, retry_count: u32) {
        match self.store.create_cour_reserve(ctx.order_id).await {
            Ok(created) if created.is_new() => {
                self.reserve_out
                    .push(CourReserveMessage {
                        payment_id: ctx.payment_id,
                        order_id: ctx.order_id,
                        stock_change_ids: ctx.stock_change_ids.clone(),
                        cour_reservation_id: Some(created.id()),
                        action: ReserveAction::Reserve,
                        status: IntentStatus::Pending,
                        retry_count,
                    })
                    .await;
            }
            Ok(created) => {
                debug!(order_id = %ctx.order_id, reservation_id = %created.id(), "reservation already exists, skipping");
            }
            Err(StoreError::Domain(DomainError::SlotUnavailable)) => {
                warn!(order_id = %ctx.order_id, "no free courier, refunding");
                self.start_refund(ctx).await;
            }
            Err(err) => {
                error!(%err, order_id = %ctx.order_id, "create cour_reserve error");
            }
        }
    }

    /// Create (or re-find) the reverting deposit and emit the payment
    /// command; the last reservation id rides along for slot cleanup.
    async fn start_refund(&self, ctx: &PaymentMessage) {
        let Some(payment_id) = ctx.payment_id.filter(|id| !id.is_nil()) else {
            error!(order_id = %ctx.order_id, "cannot refund without payment id, returning stock");
            self.start_stock_revert(ctx.order_id, &ctx.stock_change_ids)
                .await;
            return;
        };

        match self.store.revert_payment(payment_id).await {
            Ok(created) if created.is_new() => {
                self.payment_out
                    .push(PaymentMessage {
                        payment_id: Some(created.id()),
                        order_id: ctx.order_id,
                        stock_change_ids: ctx.stock_change_ids.clone(),
                        cour_reservation_id: ctx.cour_reservation_id,
                        action: PaymentAction::Deposit,
                        status: IntentStatus::Pending,
                        retry_count: 0,
                    })
                    .await;
            }
            Ok(created) => {
                debug!(order_id = %ctx.order_id, payment_id = %created.id(), "deposit already exists, skipping");
            }
            Err(err) => {
                error!(%err, %payment_id, "failed to revert payment");
            }
        }
    }

    /// Insert `add` rows mirroring the original removals and emit the
    /// stock command.
    async fn start_stock_revert(&self, order_id: OrderId, ids: &[StockChangeId]) {
        match self.store.revert_stock_changes(ids).await {
            Ok(created) if created.is_new() => {
                let new_ids = created.into_inner();
                self.stock_out
                    .push(StockChangeMessage {
                        payment_id: None,
                        order_id,
                        stock_change_ids: new_ids,
                        cour_reservation_id: None,
                        action: StockAction::Add,
                        status: IntentStatus::Pending,
                        retry_count: 0,
                    })
                    .await;
            }
            Ok(_) => {
                debug!(%order_id, "stock revert already exists, skipping");
            }
            Err(err) => {
                error!(%err, %order_id, "failed to revert stock changes");
            }
        }
    }

    async fn cancel_order(&self, order_id: OrderId) {
        if let Err(err) = self
            .store
            .set_order_status(order_id, OrderStatus::Canceled)
            .await
        {
            error!(%err, %order_id, "failed to cancel order");
        }
        info!(%order_id, "order canceled");
        self.notify(order_id, OrderStatus::Canceled).await;
    }

    async fn deliver_order(&self, order_id: OrderId) {
        if let Err(err) = self
            .store
            .set_order_status(order_id, OrderStatus::Delivery)
            .await
        {
            error!(%err, %order_id, "failed to set order status 'delivery'");
        }
        info!(%order_id, "order heading out for delivery");
        self.notify(order_id, OrderStatus::Delivery).await;
    }

    async fn notify(&self, order_id: OrderId, status: OrderStatus) {
        match self.store.order_user(order_id).await {
            Ok(user_id) => {
                self.notifier
                    .order_status(user_id, order_id, status.as_str())
                    .await;
            }
            Err(err) => warn!(%err, %order_id, "cannot notify: order user lookup failed"),
        }
    }
}

/// View a reservation status message as payment context for the
/// retry/refund helpers.
fn payment_context(msg: &CourReserveMessage) -> PaymentMessage {
    PaymentMessage {
        payment_id: msg.payment_id,
        order_id: msg.order_id,
        stock_change_ids: msg.stock_change_ids.clone(),
        cour_reservation_id: msg.cour_reservation_id,
        action: PaymentAction::Pay,
        status: msg.status,
        retry_count: msg.retry_count,
    }
}

/// Consumer adapters: one per `_status` topic.
pub struct StockStatusHandler<S>(pub Arc<Coordinator<S>>);
pub struct PaymentStatusHandler<S>(pub Arc<Coordinator<S>>);
pub struct ReserveStatusHandler<S>(pub Arc<Coordinator<S>>);

#[async_trait]
impl<S: SagaStore> MessageHandler for StockStatusHandler<S> {
    type Incoming = StockChangeMessage;

    async fn handle(&self, msg: StockChangeMessage) {
        self.0.on_stock_status(msg).await;
    }
}

#[async_trait]
impl<S: SagaStore> MessageHandler for PaymentStatusHandler<S> {
    type Incoming = PaymentMessage;

    async fn handle(&self, msg: PaymentMessage) {
        self.0.on_payment_status(msg).await;
    }
}

#[async_trait]
impl<S: SagaStore> MessageHandler for ReserveStatusHandler<S> {
    type Incoming = CourReserveMessage;

    async fn handle(&self, msg: CourReserveMessage) {
        self.0.on_reserve_status(msg).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mercato_core::{PaymentId, ReservationId, UserId};
    use mercato_messaging::{outbound_queue, NotificationMessage};

    use super::*;
    use crate::store::{Created, NewOrder};
    use crate::types::Order;

    /// Scripted store: creators hand out sequential ids and record calls.
    #[derive(Default)]
    struct FakeStore {
        next_id: Mutex<i64>,
        statuses: Mutex<Vec<(OrderId, OrderStatus)>>,
        payment_exists: Mutex<bool>,
        reservation_exists: Mutex<bool>,
        no_courier: Mutex<bool>,
        reverted_stock: Mutex<Vec<Vec<StockChangeId>>>,
    }

    impl FakeStore {
        fn bump(&self) -> i64 {
            let mut id = self.next_id.lock().unwrap();
            *id += 1;
            *id
        }

        fn last_status(&self) -> Option<(OrderId, OrderStatus)> {
            self.statuses.lock().unwrap().last().copied()
        }
    }

    #[async_trait]
    impl SagaStore for FakeStore {
        async fn create_order(&self, _: UserId, _: NewOrder) -> Result<OrderId, StoreError> {
            unimplemented!("not exercised by the coordinator")
        }

        async fn create_stock_changes(
            &self,
            _: OrderId,
        ) -> Result<Vec<StockChangeId>, StoreError> {
            unimplemented!("not exercised by the coordinator")
        }

        async fn set_order_status(
            &self,
            order_id: OrderId,
            status: OrderStatus,
        ) -> Result<(), StoreError> {
            self.statuses.lock().unwrap().push((order_id, status));
            Ok(())
        }

        async fn order_user(&self, _: OrderId) -> Result<UserId, StoreError> {
            Ok(UserId::new(7))
        }

        async fn orders_by_user(&self, _: UserId) -> Result<Vec<Order>, StoreError> {
            Ok(Vec::new())
        }

        async fn create_payment(
            &self,
            _: OrderId,
            _: &[StockChangeId],
        ) -> Result<Created<PaymentId>, StoreError> {
            if *self.payment_exists.lock().unwrap() {
                return Ok(Created::Existing(PaymentId::new(99)));
            }
            Ok(Created::New(PaymentId::new(self.bump())))
        }

        async fn revert_payment(&self, _: PaymentId) -> Result<Created<PaymentId>, StoreError> {
            Ok(Created::New(PaymentId::new(self.bump())))
        }

        async fn create_cour_reserve(
            &self,
            _: OrderId,
        ) -> Result<Created<ReservationId>, StoreError> {
            if *self.no_courier.lock().unwrap() {
                return Err(StoreError::Domain(DomainError::SlotUnavailable));
            }
            if *self.reservation_exists.lock().unwrap() {
                return Ok(Created::Existing(ReservationId::new(99)));
            }
            Ok(Created::New(ReservationId::new(self.bump())))
        }

        async fn revert_cour_reserve(
            &self,
            _: ReservationId,
        ) -> Result<Created<ReservationId>, StoreError> {
            Ok(Created::New(ReservationId::new(self.bump())))
        }

        async fn revert_stock_changes(
            &self,
            ids: &[StockChangeId],
        ) -> Result<Created<Vec<StockChangeId>>, StoreError> {
            self.reverted_stock.lock().unwrap().push(ids.to_vec());
            let new_ids = ids
                .iter()
                .map(|_| StockChangeId::new(self.bump()))
                .collect();
            Ok(Created::New(new_ids))
        }
    }

    struct Harness {
        store: Arc<FakeStore>,
        coordinator: Coordinator<FakeStore>,
        stock_rx: tokio::sync::mpsc::Receiver<StockChangeMessage>,
        payment_rx: tokio::sync::mpsc::Receiver<PaymentMessage>,
        reserve_rx: tokio::sync::mpsc::Receiver<CourReserveMessage>,
        notify_rx: tokio::sync::mpsc::Receiver<NotificationMessage>,
    }

    fn harness() -> Harness {
        let store = Arc::new(FakeStore::default());
        let (stock_out, stock_rx) = outbound_queue(16);
        let (payment_out, payment_rx) = outbound_queue(16);
        let (reserve_out, reserve_rx) = outbound_queue(16);
        let (notify_out, notify_rx) = outbound_queue(16);

        let coordinator = Coordinator::new(
            store.clone(),
            stock_out,
            payment_out,
            reserve_out,
            Notifier::new(notify_out),
            2,
        );

        Harness {
            store,
            coordinator,
            stock_rx,
            payment_rx,
            reserve_rx,
            notify_rx,
        }
    }

    fn change_ids() -> Vec<StockChangeId> {
        vec![StockChangeId::new(101), StockChangeId::new(102)]
    }

    fn stock_ok() -> StockChangeMessage {
        StockChangeMessage {
            payment_id: None,
            order_id: OrderId::new(3),
            stock_change_ids: change_ids(),
            cour_reservation_id: None,
            action: StockAction::Remove,
            status: IntentStatus::Ok,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn stock_removed_creates_payment() {
        let mut h = harness();
        h.coordinator.on_stock_status(stock_ok()).await;

        let msg = h.payment_rx.recv().await.unwrap();
        assert_eq!(msg.action, PaymentAction::Pay);
        assert_eq!(msg.status, IntentStatus::Pending);
        assert_eq!(msg.payment_id, Some(PaymentId::new(1)));
        assert_eq!(msg.stock_change_ids, change_ids());
    }

    #[tokio::test]
    async fn redelivered_stock_ok_does_not_fork_the_saga() {
        let mut h = harness();
        *h.store.payment_exists.lock().unwrap() = true;

        h.coordinator.on_stock_status(stock_ok()).await;

        assert!(h.payment_rx.try_recv().is_err());
        assert!(h.stock_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stock_failure_cancels_and_notifies() {
        let mut h = harness();
        let mut msg = stock_ok();
        msg.status = IntentStatus::Failed;

        h.coordinator.on_stock_status(msg).await;

        assert_eq!(
            h.store.last_status(),
            Some((OrderId::new(3), OrderStatus::Canceled))
        );
        let note = h.notify_rx.recv().await.unwrap();
        assert_eq!(note.message, "Order #3 status: canceled");
    }

    #[tokio::test]
    async fn stock_returned_completes_the_unwind() {
        let mut h = harness();
        let mut msg = stock_ok();
        msg.action = StockAction::Add;

        h.coordinator.on_stock_status(msg).await;

        assert_eq!(
            h.store.last_status(),
            Some((OrderId::new(3), OrderStatus::Canceled))
        );
    }

    fn pay_ok() -> PaymentMessage {
        PaymentMessage {
            payment_id: Some(PaymentId::new(11)),
            order_id: OrderId::new(3),
            stock_change_ids: change_ids(),
            cour_reservation_id: None,
            action: PaymentAction::Pay,
            status: IntentStatus::Ok,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn payment_ok_books_a_courier() {
        let mut h = harness();
        h.coordinator.on_payment_status(pay_ok()).await;

        let msg = h.reserve_rx.recv().await.unwrap();
        assert_eq!(msg.action, ReserveAction::Reserve);
        assert_eq!(msg.retry_count, 0);
        assert_eq!(msg.payment_id, Some(PaymentId::new(11)));
        assert!(msg.cour_reservation_id.is_some());
    }

    #[tokio::test]
    async fn payment_ok_without_free_courier_goes_straight_to_refund() {
        let mut h = harness();
        *h.store.no_courier.lock().unwrap() = true;

        h.coordinator.on_payment_status(pay_ok()).await;

        let msg = h.payment_rx.recv().await.unwrap();
        assert_eq!(msg.action, PaymentAction::Deposit);
        assert_eq!(msg.status, IntentStatus::Pending);
        assert!(h.reserve_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn payment_failure_returns_inventory_with_fresh_ids() {
        let mut h = harness();
        let mut msg = pay_ok();
        msg.status = IntentStatus::Failed;

        h.coordinator.on_payment_status(msg).await;

        let emitted = h.stock_rx.recv().await.unwrap();
        assert_eq!(emitted.action, StockAction::Add);
        assert_eq!(emitted.status, IntentStatus::Pending);
        // Compensation inserts new rows; the ids must differ from the
        // original removals.
        assert_ne!(emitted.stock_change_ids, change_ids());
        assert_eq!(
            h.store.reverted_stock.lock().unwrap().as_slice(),
            &[change_ids()]
        );
    }

    #[tokio::test]
    async fn deposit_ok_releases_the_courier_slot() {
        let mut h = harness();
        let mut msg = pay_ok();
        msg.action = PaymentAction::Deposit;
        msg.cour_reservation_id = Some(ReservationId::new(44));

        h.coordinator.on_payment_status(msg).await;

        let emitted = h.reserve_rx.recv().await.unwrap();
        assert_eq!(emitted.action, ReserveAction::RevertReserve);
        assert_eq!(emitted.status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn deposit_ok_without_reservation_returns_stock() {
        let mut h = harness();
        let mut msg = pay_ok();
        msg.action = PaymentAction::Deposit;

        h.coordinator.on_payment_status(msg).await;

        let emitted = h.stock_rx.recv().await.unwrap();
        assert_eq!(emitted.action, StockAction::Add);
    }

    fn reserve_msg(status: IntentStatus, action: ReserveAction, retry: u32) -> CourReserveMessage {
        CourReserveMessage {
            payment_id: Some(PaymentId::new(11)),
            order_id: OrderId::new(3),
            stock_change_ids: change_ids(),
            cour_reservation_id: Some(ReservationId::new(5)),
            action,
            status,
            retry_count: retry,
        }
    }

    #[tokio::test]
    async fn reserve_ok_sets_delivery_and_notifies() {
        let mut h = harness();
        h.coordinator
            .on_reserve_status(reserve_msg(IntentStatus::Ok, ReserveAction::Reserve, 0))
            .await;

        assert_eq!(
            h.store.last_status(),
            Some((OrderId::new(3), OrderStatus::Delivery))
        );
        let note = h.notify_rx.recv().await.unwrap();
        assert_eq!(note.message, "Order #3 status: delivery");
    }

    #[tokio::test]
    async fn reserve_failure_retries_with_new_reservation() {
        let mut h = harness();
        h.coordinator
            .on_reserve_status(reserve_msg(IntentStatus::Failed, ReserveAction::Reserve, 0))
            .await;

        let emitted = h.reserve_rx.recv().await.unwrap();
        assert_eq!(emitted.action, ReserveAction::Reserve);
        assert_eq!(emitted.retry_count, 1);
        // A fresh reservation is created for each retry.
        assert_ne!(emitted.cour_reservation_id, Some(ReservationId::new(5)));
    }

    #[tokio::test]
    async fn reserve_exhaustion_starts_the_refund() {
        let mut h = harness();
        h.coordinator
            .on_reserve_status(reserve_msg(IntentStatus::Failed, ReserveAction::Reserve, 2))
            .await;

        let emitted = h.payment_rx.recv().await.unwrap();
        assert_eq!(emitted.action, PaymentAction::Deposit);
        // The dead reservation rides along for later slot cleanup.
        assert_eq!(emitted.cour_reservation_id, Some(ReservationId::new(5)));
        assert!(h.reserve_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn revert_reserve_ok_returns_inventory() {
        let mut h = harness();
        h.coordinator
            .on_reserve_status(reserve_msg(IntentStatus::Ok, ReserveAction::RevertReserve, 0))
            .await;

        let emitted = h.stock_rx.recv().await.unwrap();
        assert_eq!(emitted.action, StockAction::Add);
        assert_eq!(emitted.status, IntentStatus::Pending);
    }

    #[tokio::test]
    async fn malformed_messages_are_dropped() {
        let mut h = harness();

        let mut msg = stock_ok();
        msg.status = IntentStatus::Pending;
        h.coordinator.on_stock_status(msg).await;

        let mut msg = pay_ok();
        msg.payment_id = None;
        h.coordinator.on_payment_status(msg).await;

        assert!(h.stock_rx.try_recv().is_err());
        assert!(h.payment_rx.try_recv().is_err());
        assert!(h.reserve_rx.try_recv().is_err());
        assert!(h.store.statuses.lock().unwrap().is_empty());
    }
}
