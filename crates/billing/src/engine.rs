//! Payment processor handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use mercato_core::{
    money, retry, truncate_error, Attempt, DomainError, PaymentId, RetryPolicy, Shutdown,
    StoreError,
};
use mercato_messaging::{IntentStatus, MessageHandler, Outbound, PaymentAction, PaymentMessage};

use crate::store::PaymentStore;

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

pub struct PaymentEngine<S> {
    store: Arc<S>,
    policy: RetryPolicy,
    shutdown: Shutdown,
    out: Outbound<PaymentMessage>,
}

impl<S: PaymentStore> PaymentEngine<S> {
    pub fn new(
        store: Arc<S>,
        policy: RetryPolicy,
        shutdown: Shutdown,
        out: Outbound<PaymentMessage>,
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
        payment_id: PaymentId,
        action: PaymentAction,
    ) -> Result<Applied, EngineError> {
        retry(self.policy, &self.shutdown, || async move {
            let pending = self
                .store
                .load_pending(payment_id, action)
                .await
                .map_err(|e| Attempt::Terminal(EngineError::Store(e)))?;

            let Some(payment) = pending else {
                return Ok(Applied::AlreadySettled);
            };

            if action == PaymentAction::Pay && !money::covers(payment.balance, payment.amount) {
                return Err(Attempt::Terminal(DomainError::InsufficientFunds.into()));
            }

            match self
                .store
                .apply(payment.account_id, payment.amount, action, payment.version)
                .await
            {
                Ok(()) => Ok(Applied::Done),
                Err(err) if err.is_conflict() => {
                    warn!(%payment_id, account_id = %payment.account_id, "optimistic lock conflict, retrying");
                    Err(Attempt::Retryable(EngineError::Busy(err.to_string())))
                }
                Err(err) => Err(Attempt::Terminal(EngineError::Store(err))),
            }
        })
        .await
    }
}

#[async_trait]
impl<S: PaymentStore> MessageHandler for PaymentEngine<S> {
    type Incoming = PaymentMessage;

    async fn handle(&self, msg: PaymentMessage) {
        let Some(payment_id) = msg.payment_id.filter(|id| !id.is_nil()) else {
            warn!(order_id = %msg.order_id, status = ?msg.status, "received bad payment message");
            return;
        };
        if msg.status != IntentStatus::Pending || msg.order_id.is_nil() {
            warn!(%payment_id, order_id = %msg.order_id, status = ?msg.status, "received bad payment message");
            return;
        }

        match self.process(payment_id, msg.action).await {
            Ok(Applied::Done) => {
                if let Err(err) = self.store.mark_ok(payment_id).await {
                    warn!(%err, %payment_id, "failed to approve payment");
                }
                info!(%payment_id, action = msg.action.as_str(), "payment processed");
                self.out.push(msg.with_status(IntentStatus::Ok)).await;
            }
            Ok(Applied::AlreadySettled) => {
                info!(%payment_id, "payment already settled, skipping");
            }
            Err(err) => {
                let reason = truncate_error(&err.to_string());
                if let Err(mark_err) = self.store.mark_failed(payment_id, &reason).await {
                    warn!(%mark_err, %payment_id, "failed to reject payment");
                }
                warn!(%payment_id, action = msg.action.as_str(), reason, "payment rejected");
                self.out.push(msg.with_status(IntentStatus::Failed)).await;
            }
        }
    }
}
