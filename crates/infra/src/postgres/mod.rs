//! Postgres-backed store implementations.
//!
//! One pool serves every store contract. Optimistic locking follows the
//! shared policy: every mutable row carries `mtime`, updates predicate on
//! `mtime = $old RETURNING id`, and a zero-row return maps to
//! `StoreError::Conflict`.

mod billing;
mod delivery;
mod notify;
mod saga;
mod stock;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use mercato_core::StoreError;
use mercato_messaging::{IntentStatus, PaymentAction, ReserveAction};

#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await
            .map_err(|e| StoreError::storage(format!("connect database: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Apply the schema migrations at startup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::storage(format!("migrate: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn map_sqlx_error(op: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::storage(format!("{op}: {other}")),
    }
}

pub(crate) fn status_from_str(s: &str) -> IntentStatus {
    match s {
        "ok" => IntentStatus::Ok,
        "failed" => IntentStatus::Failed,
        _ => IntentStatus::Pending,
    }
}

pub(crate) fn payment_action_from_str(s: &str) -> PaymentAction {
    if s == "pay" {
        PaymentAction::Pay
    } else {
        PaymentAction::Deposit
    }
}

pub(crate) fn reserve_action_from_str(s: &str) -> ReserveAction {
    if s == "reserve" {
        ReserveAction::Reserve
    } else {
        ReserveAction::RevertReserve
    }
}

/// Empty-string errors in the schema surface as `None` to callers.
pub(crate) fn optional_error(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
