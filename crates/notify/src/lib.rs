//! User-facing notifications.
//!
//! The emitter is produce-only: the coordinator pushes status events into
//! a bounded queue whose drain task publishes to the `notifications`
//! topic. Notifications are informational; duplicates are acceptable and
//! loss during shutdown is tolerated. A separate consumer persists them
//! for `get_notifications`.

use async_trait::async_trait;
use tracing::{info, warn};

use mercato_core::{OrderId, StoreError, UserId};
use mercato_messaging::{MessageHandler, NotificationMessage, Outbound};

/// Handle for emitting order-status notifications.
#[derive(Clone)]
pub struct Notifier {
    out: Outbound<NotificationMessage>,
}

impl Notifier {
    pub fn new(out: Outbound<NotificationMessage>) -> Self {
        Self { out }
    }

    /// Fan out "Order #N status: X" to the user.
    pub async fn order_status(&self, user_id: UserId, order_id: OrderId, status: &str) {
        info!(%user_id, %order_id, status, "notify user");
        self.out
            .push(NotificationMessage {
                user_id,
                order_id,
                message: format!("Order #{order_id} status: {status}"),
            })
            .await;
    }
}

/// Persistence seam for delivered notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    async fn append(&self, msg: &NotificationMessage) -> Result<(), StoreError>;

    async fn by_user(&self, user_id: UserId) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
impl<T> NotificationStore for std::sync::Arc<T>
where
    T: NotificationStore + ?Sized,
{
    async fn append(&self, msg: &NotificationMessage) -> Result<(), StoreError> {
        (**self).append(msg).await
    }

    async fn by_user(&self, user_id: UserId) -> Result<Vec<String>, StoreError> {
        (**self).by_user(user_id).await
    }
}

/// Consumer side: writes each notification down for later retrieval.
pub struct NotificationWriter<S> {
    store: S,
}

impl<S> NotificationWriter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: NotificationStore> MessageHandler for NotificationWriter<S> {
    type Incoming = NotificationMessage;

    async fn handle(&self, msg: NotificationMessage) {
        if msg.user_id.is_nil() || msg.order_id.is_nil() {
            warn!(user_id = %msg.user_id, order_id = %msg.order_id, "received bad notification message");
            return;
        }

        if let Err(err) = self.store.append(&msg).await {
            warn!(%err, order_id = %msg.order_id, "failed to store notification");
        }
    }
}
