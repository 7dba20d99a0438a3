//! Stock change processor handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use mercato_core::{retry, truncate_error, Attempt, DomainError, RetryPolicy, Shutdown, StoreError};
use mercato_messaging::{
    IntentStatus, MessageHandler, Outbound, StockAction, StockChangeMessage,
};

use crate::store::StockStore;

enum Applied {
    Done,
    /// Nothing pending for the batch: a redelivery of settled work.
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

pub struct StockEngine<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    shutdown: Shutdown,
    out: Outbound<StockChangeMessage>,
}

impl<S: StockStore> StockEngine<S> {
    pub fn new(
        store: Arc<S>,
        policy: RetryPolicy,
        shutdown: Shutdown,
        out: Outbound<StockChangeMessage>,
    ) -> Self {
        Self {
            store,
            policy,
            shutdown,
            out,
        }
    }

    async fn process(&self, msg: &StockChangeMessage) -> Result<Applied, EngineError> {
        let ids = &msg.stock_change_ids;
        let action = msg.action;

        retry(self.policy, &self.shutdown, || async move {
            let changes = self
                .store
                .load_pending(ids)
                .await
                .map_err(|e| Attempt::Terminal(EngineError::Store(e)))?;

            if changes.is_empty() {
                return Ok(Applied::AlreadySettled);
            }

            if action == StockAction::Remove
                && changes.iter().any(|c| c.quantity > c.available)
            {
                return Err(Attempt::Terminal(DomainError::InsufficientStock.into()));
            }

            match self.store.apply(&changes, action).await {
                Ok(()) => Ok(Applied::Done),
                Err(err) if err.is_conflict() => {
                    warn!(stock_change_ids = ?ids, %err, "optimistic lock conflict, retrying");
                    Err(Attempt::Retryable(EngineError::Busy(err.to_string())))
                }
                Err(err) => Err(Attempt::Terminal(EngineError::Store(err))),
            }
        })
        .await
    }
}

#[async_trait]
impl<S: StockStore> MessageHandler for StockEngine<S> {
    type Incoming = StockChangeMessage;

    async fn handle(&self, msg: StockChangeMessage) {
        if msg.status != IntentStatus::Pending
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

        match self.process(&msg).await {
            Ok(Applied::Done) => {
                if let Err(err) = self.store.mark_ok(&msg.stock_change_ids).await {
                    warn!(%err, "failed to approve stock changes");
                }
                info!(
                    stock_change_ids = ?msg.stock_change_ids,
                    action = msg.action.as_str(),
                    "processed stock changes"
                );
                self.out.push(msg.with_status(IntentStatus::Ok)).await;
            }
            Ok(Applied::AlreadySettled) => {
                // Redelivery of an already-settled batch: ack silently so a
                // duplicate cannot start a spurious compensation.
                info!(stock_change_ids = ?msg.stock_change_ids, "stock batch already settled, skipping");
            }
            Err(err) => {
                let reason = truncate_error(&err.to_string());
                if let Err(mark_err) = self.store.mark_failed(&msg.stock_change_ids, &reason).await
                {
                    warn!(%mark_err, "failed to reject stock changes");
                }
                warn!(
                    stock_change_ids = ?msg.stock_change_ids,
                    action = msg.action.as_str(),
                    reason,
                    "rejected stock changes"
                );
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
    use mercato_core::{OrderId, StockChangeId, StockId};
    use mercato_messaging::outbound_queue;

    use super::*;
    use crate::store::PendingChange;

    #[derive(Debug, Clone)]
    struct StockRow {
        quantity: i64,
        version: chrono::DateTime<Utc>,
    }

    #[derive(Debug, Clone)]
    struct ChangeRow {
        stock_id: StockId,
        quantity: i64,
        status: IntentStatus,
    }

    #[derive(Default)]
    struct FakeStore {
        stocks: Mutex<BTreeMap<StockId, StockRow>>,
        changes: Mutex<BTreeMap<StockChangeId, ChangeRow>>,
        /// Force the first N applies to conflict.
        conflicts: Mutex<u32>,
    }

    impl FakeStore {
        fn seed(stock_qty: i64, change_qty: i64) -> Self {
            let store = Self::default();
            store.stocks.lock().unwrap().insert(
                StockId::new(10),
                StockRow { quantity: stock_qty, version: Utc::now() },
            );
            store.changes.lock().unwrap().insert(
                StockChangeId::new(1),
                ChangeRow {
                    stock_id: StockId::new(10),
                    quantity: change_qty,
                    status: IntentStatus::Pending,
                },
            );
            store
        }

        fn quantity(&self, id: StockId) -> i64 {
            self.stocks.lock().unwrap()[&id].quantity
        }

        fn status(&self, id: StockChangeId) -> IntentStatus {
            self.changes.lock().unwrap()[&id].status
        }
    }

    #[async_trait]
    impl StockStore for FakeStore {
        async fn load_pending(
            &self,
            ids: &[StockChangeId],
        ) -> Result<Vec<PendingChange>, StoreError> {
            let changes = self.changes.lock().unwrap();
            let stocks = self.stocks.lock().unwrap();
            Ok(ids
                .iter()
                .filter_map(|id| changes.get(id))
                .filter(|c| c.status == IntentStatus::Pending)
                .map(|c| {
                    let s = &stocks[&c.stock_id];
                    PendingChange {
                        stock_id: c.stock_id,
                        quantity: c.quantity,
                        available: s.quantity,
                        version: s.version,
                    }
                })
                .collect())
        }

        async fn apply(
            &self,
            changes: &[PendingChange],
            action: StockAction,
        ) -> Result<(), StoreError> {
            {
                let mut left = self.conflicts.lock().unwrap();
                if *left > 0 {
                    *left -= 1;
                    // Simulate a concurrent writer advancing the token.
                    let mut stocks = self.stocks.lock().unwrap();
                    for c in changes {
                        stocks.get_mut(&c.stock_id).unwrap().version = Utc::now();
                    }
                    return Err(StoreError::conflict("stock moved"));
                }
            }

            let mut stocks = self.stocks.lock().unwrap();
            for c in changes {
                let row = stocks.get_mut(&c.stock_id).unwrap();
                if row.version != c.version {
                    return Err(StoreError::conflict(format!("stock {}", c.stock_id)));
                }
            }
            for c in changes {
                let row = stocks.get_mut(&c.stock_id).unwrap();
                match action {
                    StockAction::Remove => row.quantity -= c.quantity,
                    StockAction::Add => row.quantity += c.quantity,
                }
                row.version = Utc::now();
            }
            Ok(())
        }

        async fn mark_ok(&self, ids: &[StockChangeId]) -> Result<(), StoreError> {
            let mut changes = self.changes.lock().unwrap();
            for id in ids {
                changes.get_mut(id).unwrap().status = IntentStatus::Ok;
            }
            Ok(())
        }

        async fn mark_failed(&self, ids: &[StockChangeId], _error: &str) -> Result<(), StoreError> {
            let mut changes = self.changes.lock().unwrap();
            for id in ids {
                changes.get_mut(id).unwrap().status = IntentStatus::Failed;
            }
            Ok(())
        }
    }

    fn remove_msg() -> StockChangeMessage {
        StockChangeMessage {
            payment_id: None,
            order_id: OrderId::new(3),
            stock_change_ids: vec![StockChangeId::new(1)],
            cour_reservation_id: None,
            action: StockAction::Remove,
            status: IntentStatus::Pending,
            retry_count: 0,
        }
    }

    fn engine(store: Arc<FakeStore>) -> (StockEngine<FakeStore>, tokio::sync::mpsc::Receiver<StockChangeMessage>) {
        let (out, rx) = outbound_queue(16);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        (StockEngine::new(store, policy, Shutdown::disarmed(), out), rx)
    }

    #[tokio::test]
    async fn remove_succeeds_and_reports_ok() {
        let store = Arc::new(FakeStore::seed(5, 2));
        let (engine, mut rx) = engine(store.clone());

        engine.handle(remove_msg()).await;

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.status, IntentStatus::Ok);
        assert_eq!(store.quantity(StockId::new(10)), 3);
        assert_eq!(store.status(StockChangeId::new(1)), IntentStatus::Ok);
    }

    #[tokio::test]
    async fn insufficient_stock_fails_without_mutation() {
        let store = Arc::new(FakeStore::seed(1, 2));
        let (engine, mut rx) = engine(store.clone());

        engine.handle(remove_msg()).await;

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.status, IntentStatus::Failed);
        assert_eq!(store.quantity(StockId::new(10)), 1);
        assert_eq!(store.status(StockChangeId::new(1)), IntentStatus::Failed);
    }

    #[tokio::test]
    async fn conflict_retries_within_budget() {
        let store = Arc::new(FakeStore::seed(5, 2));
        *store.conflicts.lock().unwrap() = 2;
        let (engine, mut rx) = engine(store.clone());

        engine.handle(remove_msg()).await;

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.status, IntentStatus::Ok);
        assert_eq!(store.quantity(StockId::new(10)), 3);
    }

    #[tokio::test]
    async fn conflict_exhaustion_marks_failed() {
        let store = Arc::new(FakeStore::seed(5, 2));
        *store.conflicts.lock().unwrap() = 10;
        let (engine, mut rx) = engine(store.clone());

        engine.handle(remove_msg()).await;

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.status, IntentStatus::Failed);
        assert_eq!(store.quantity(StockId::new(10)), 5);
    }

    #[tokio::test]
    async fn settled_redelivery_is_silently_acked() {
        let store = Arc::new(FakeStore::seed(5, 2));
        let (engine, mut rx) = engine(store.clone());

        engine.handle(remove_msg()).await;
        let _ = rx.recv().await.unwrap();

        // Same message again: batch no longer pending, nothing emitted.
        engine.handle(remove_msg()).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(store.quantity(StockId::new(10)), 3);
    }

    #[tokio::test]
    async fn pending_status_message_is_dropped() {
        let store = Arc::new(FakeStore::seed(5, 2));
        let (engine, mut rx) = engine(store.clone());

        let mut msg = remove_msg();
        msg.stock_change_ids.clear();
        engine.handle(msg).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(store.quantity(StockId::new(10)), 5);
    }
}
