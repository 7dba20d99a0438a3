//! Payment store contract and account operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use mercato_core::{AccountId, OrderId, PaymentId, StoreError, UserId};
use mercato_messaging::{IntentStatus, PaymentAction};

/// The pending payment joined with the paying account, as one load:
/// `payments × orders × accounts` filtered on `status = 'pending'` and the
/// requested action.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPayment {
    pub account_id: AccountId,
    pub balance: f64,
    pub amount: f64,
    /// Account-row optimistic-lock token.
    pub version: DateTime<Utc>,
}

/// Full payment row, as returned to the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub action: PaymentAction,
    pub amount: f64,
    pub status: IntentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentStore: Send + Sync + 'static {
    /// Load the pending payment and its account. `None` means there is no
    /// pending row for `(payment_id, action)` — a settled redelivery.
    async fn load_pending(
        &self,
        payment_id: PaymentId,
        action: PaymentAction,
    ) -> Result<Option<PendingPayment>, StoreError>;

    /// Move `amount` on the account, predicated on the version token.
    /// Returns `StoreError::Conflict` when the account moved concurrently.
    async fn apply(
        &self,
        account_id: AccountId,
        amount: f64,
        action: PaymentAction,
        version: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn mark_ok(&self, payment_id: PaymentId) -> Result<(), StoreError>;

    async fn mark_failed(&self, payment_id: PaymentId, error: &str) -> Result<(), StoreError>;

    // Account operations for the HTTP surface.

    async fn create_account(&self, user_id: UserId) -> Result<AccountId, StoreError>;

    /// Top up; the amount is rounded down to whole cents.
    async fn add_money(&self, user_id: UserId, amount: f64) -> Result<(), StoreError>;

    async fn balance(&self, user_id: UserId) -> Result<f64, StoreError>;

    async fn payments_by_order(&self, order_id: OrderId) -> Result<Vec<Payment>, StoreError>;
}
