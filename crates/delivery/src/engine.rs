//! Courier reservation processor handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use mercato_core::{
    retry, truncate_error, Attempt, DomainError, ReservationId, RetryPolicy, Shutdown, StoreError,
};
use mercato_messaging::{
    CourReserveMessage, IntentStatus, MessageHandler, Outbound, ReserveAction,
};

use crate::store::ReservationStore;

enum Applied {
    Done,
    AlreadySettled,
}

#[derive(Debug, thiserror::Error)]
enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("busy resource: {0}")]
    Busy(String),

    #[error(transparent)]
    Store(StoreError),
}

pub struct CourierSlotEngine<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    shutdown: Shutdown,
    out: Outbound<CourReserveMessage>,
}

impl<S: ReservationStore> CourierSlotEngine<S> {
    pub fn new(
        store: Arc<S>,
        policy: RetryPolicy,
        shutdown: Shutdown,
        out: Outbound<CourReserveMessage>,
    ) -> Self {
        Self {
            store,
            policy,
            shutdown,
            out,
        }
    }

    async fn process(
        &self,
        reservation_id: ReservationId,
        action: ReserveAction,
    ) -> Result<Applied, EngineError> {
        retry(self.policy, &self.shutdown, || async move {
            let pending = self
                .store
                .load_pending(reservation_id)
                .await
                .map_err(|e| Attempt::Terminal(EngineError::Store(e)))?;

            let Some(res) = pending else {
                return Ok(Applied::AlreadySettled);
            };

            // Another saga may have taken the slot between courier pick and
            // bit flip.
            if action == ReserveAction::Reserve && res.schedule.overlaps(res.requested) {
                return Err(Attempt::Terminal(DomainError::SlotReserved.into()));
            }

            match self
                .store
                .apply(res.courier_id, res.work_date, res.requested, action, res.version)
                .await
            {
                Ok(()) => Ok(Applied::Done),
                Err(err) if err.is_conflict() => {
                    warn!(
                        %reservation_id,
                        courier_id = %res.courier_id,
                        hour_mask = %res.requested,
                        "optimistic lock conflict, retrying"
                    );
                    Err(Attempt::Retryable(EngineError::Busy(err.to_string())))
                }
                Err(err) => Err(Attempt::Terminal(EngineError::Store(err))),
            }
        })
        .await
    }
}

#[async_trait]
impl<S: ReservationStore> MessageHandler for CourierSlotEngine<S> {
    type Incoming = CourReserveMessage;

    async fn handle(&self, msg: CourReserveMessage) {
        let Some(reservation_id) = msg.cour_reservation_id.filter(|id| !id.is_nil()) else {
            warn!(order_id = %msg.order_id, status = ?msg.status, "received bad cour_reserve message");
            return;
        };
        if msg.status != IntentStatus::Pending || msg.order_id.is_nil() {
            warn!(
                %reservation_id,
                order_id = %msg.order_id,
                status = ?msg.status,
                "received bad cour_reserve message"
            );
            return;
        }

        match self.process(reservation_id, msg.action).await {
            Ok(Applied::Done) => {
                if let Err(err) = self.store.mark_ok(reservation_id).await {
                    warn!(%err, %reservation_id, "failed to approve cour_reserve");
                }
                info!(%reservation_id, action = msg.action.as_str(), "cour_reserve processed");
                self.out.push(msg.with_status(IntentStatus::Ok)).await;
            }
            Ok(Applied::AlreadySettled) => {
                info!(%reservation_id, "reservation already settled, skipping");
            }
            Err(err) => {
                let reason = truncate_error(&err.to_string());
                if let Err(mark_err) = self.store.mark_failed(reservation_id, &reason).await {
                    warn!(%mark_err, %reservation_id, "failed to reject cour_reserve");
                }
                warn!(%reservation_id, action = msg.action.as_str(), reason, "cour_reserve rejected");
                self.out.push(msg.with_status(IntentStatus::Failed)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use mercato_core::{CourierId, HourMask, OrderId, UserId};
    use mercato_messaging::outbound_queue;

    use super::*;
    use crate::store::{CourierReservation, PendingReservation};

    #[derive(Debug, Clone)]
    struct ScheduleRow {
        mask: HourMask,
        version: chrono::DateTime<Utc>,
    }

    #[derive(Debug, Clone)]
    struct ReservationRow {
        courier_id: CourierId,
        mask: HourMask,
        status: IntentStatus,
    }

    #[derive(Default)]
    struct FakeStore {
        schedules: Mutex<BTreeMap<CourierId, ScheduleRow>>,
        reservations: Mutex<BTreeMap<ReservationId, ReservationRow>>,
    }

    fn today() -> chrono::NaiveDate {
        Utc::now().date_naive()
    }

    impl FakeStore {
        fn seed(schedule_mask: u32, requested_hour: u32) -> Self {
            let store = Self::default();
            store.schedules.lock().unwrap().insert(
                CourierId::new(3),
                ScheduleRow {
                    mask: HourMask::new(schedule_mask),
                    version: Utc::now(),
                },
            );
            store.reservations.lock().unwrap().insert(
                ReservationId::new(5),
                ReservationRow {
                    courier_id: CourierId::new(3),
                    mask: HourMask::from_hour(requested_hour).unwrap(),
                    status: IntentStatus::Pending,
                },
            );
            store
        }

        fn schedule_mask(&self) -> HourMask {
            self.schedules.lock().unwrap()[&CourierId::new(3)].mask
        }
    }

    #[async_trait]
    impl ReservationStore for FakeStore {
        async fn load_pending(
            &self,
            reservation_id: ReservationId,
        ) -> Result<Option<PendingReservation>, StoreError> {
            let reservations = self.reservations.lock().unwrap();
            let schedules = self.schedules.lock().unwrap();
            Ok(reservations
                .get(&reservation_id)
                .filter(|r| r.status == IntentStatus::Pending)
                .map(|r| {
                    let s = &schedules[&r.courier_id];
                    PendingReservation {
                        courier_id: r.courier_id,
                        work_date: today(),
                        requested: r.mask,
                        schedule: s.mask,
                        version: s.version,
                    }
                }))
        }

        async fn apply(
            &self,
            courier_id: CourierId,
            _work_date: chrono::NaiveDate,
            mask: HourMask,
            action: ReserveAction,
            version: chrono::DateTime<Utc>,
        ) -> Result<(), StoreError> {
            let mut schedules = self.schedules.lock().unwrap();
            let row = schedules.get_mut(&courier_id).unwrap();
            if row.version != version {
                return Err(StoreError::conflict(format!("schedule {courier_id}")));
            }
            row.mask = match action {
                ReserveAction::Reserve => row.mask.reserve(mask),
                ReserveAction::RevertReserve => row.mask.release(mask),
            };
            row.version = Utc::now();
            Ok(())
        }

        async fn mark_ok(&self, reservation_id: ReservationId) -> Result<(), StoreError> {
            self.reservations
                .lock()
                .unwrap()
                .get_mut(&reservation_id)
                .unwrap()
                .status = IntentStatus::Ok;
            Ok(())
        }

        async fn mark_failed(
            &self,
            reservation_id: ReservationId,
            _error: &str,
        ) -> Result<(), StoreError> {
            self.reservations
                .lock()
                .unwrap()
                .get_mut(&reservation_id)
                .unwrap()
                .status = IntentStatus::Failed;
            Ok(())
        }

        async fn create_courier(&self, _user_id: UserId) -> Result<CourierId, StoreError> {
            unimplemented!("not exercised by the engine")
        }

        async fn create_schedule_today(
            &self,
            _user_id: UserId,
            _mask: HourMask,
        ) -> Result<(), StoreError> {
            unimplemented!("not exercised by the engine")
        }

        async fn reservations_by_order(
            &self,
            _order_id: OrderId,
        ) -> Result<Vec<CourierReservation>, StoreError> {
            Ok(Vec::new())
        }

        async fn confirm_delivery(
            &self,
            _user_id: UserId,
            _order_id: OrderId,
        ) -> Result<(), StoreError> {
            unimplemented!("not exercised by the engine")
        }

        async fn confirm_delivered(
            &self,
            _user_id: UserId,
            _order_id: OrderId,
        ) -> Result<(), StoreError> {
            unimplemented!("not exercised by the engine")
        }
    }

    fn reserve_msg() -> CourReserveMessage {
        CourReserveMessage {
            payment_id: None,
            order_id: OrderId::new(3),
            stock_change_ids: vec![],
            cour_reservation_id: Some(ReservationId::new(5)),
            action: ReserveAction::Reserve,
            status: IntentStatus::Pending,
            retry_count: 0,
        }
    }

    fn engine(
        store: Arc<FakeStore>,
    ) -> (
        CourierSlotEngine<FakeStore>,
        tokio::sync::mpsc::Receiver<CourReserveMessage>,
    ) {
        let (out, rx) = outbound_queue(16);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        (
            CourierSlotEngine::new(store, policy, Shutdown::disarmed(), out),
            rx,
        )
    }

    #[tokio::test]
    async fn reserve_flips_the_hour_bit() {
        let store = Arc::new(FakeStore::seed(0, 14));
        let (engine, mut rx) = engine(store.clone());

        engine.handle(reserve_msg()).await;

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.status, IntentStatus::Ok);
        assert_eq!(store.schedule_mask().bits(), 0x4000);
    }

    #[tokio::test]
    async fn taken_slot_fails_terminal() {
        let store = Arc::new(FakeStore::seed(0x4000, 14));
        let (engine, mut rx) = engine(store.clone());

        engine.handle(reserve_msg()).await;

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.status, IntentStatus::Failed);
        assert_eq!(store.schedule_mask().bits(), 0x4000);
    }

    #[tokio::test]
    async fn revert_clears_the_bit_and_is_noop_safe() {
        let store = Arc::new(FakeStore::seed(0x4000, 14));
        let mut msg = reserve_msg();
        msg.action = ReserveAction::RevertReserve;

        let (engine, mut rx) = engine(store.clone());
        engine.handle(msg.clone()).await;

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.status, IntentStatus::Ok);
        assert_eq!(store.schedule_mask().bits(), 0);

        // Reverting an already-clear bit still succeeds.
        store
            .reservations
            .lock()
            .unwrap()
            .get_mut(&ReservationId::new(5))
            .unwrap()
            .status = IntentStatus::Pending;
        engine.handle(msg).await;
        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.status, IntentStatus::Ok);
        assert_eq!(store.schedule_mask().bits(), 0);
    }

    #[tokio::test]
    async fn settled_redelivery_is_silent() {
        let store = Arc::new(FakeStore::seed(0, 14));
        let (engine, mut rx) = engine(store.clone());

        engine.handle(reserve_msg()).await;
        let _ = rx.recv().await.unwrap();

        engine.handle(reserve_msg()).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(store.schedule_mask().bits(), 0x4000);
    }
}
