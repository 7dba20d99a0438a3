//! Payment store over Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use mercato_billing::store::{Payment, PaymentStore, PendingPayment};
use mercato_core::{money, AccountId, OrderId, PaymentId, StoreError, UserId};
use mercato_messaging::PaymentAction;

use super::{map_sqlx_error, optional_error, payment_action_from_str, status_from_str, PostgresDatabase};

#[async_trait]
impl PaymentStore for PostgresDatabase {
    async fn load_pending(
        &self,
        payment_id: PaymentId,
        action: PaymentAction,
    ) -> Result<Option<PendingPayment>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.balance, p.amount, a.mtime
            FROM payments p
            JOIN orders o ON p.order_id = o.id
            JOIN accounts a ON o.user_id = a.user_id
            WHERE p.id = $1 AND p.status = 'pending' AND p.action = $2
            "#,
        )
        .bind(payment_id.as_i64())
        .bind(action.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load pending payment", e))?;

        Ok(row.map(|row| PendingPayment {
            account_id: AccountId::new(row.get::<i64, _>("id")),
            balance: row.get("balance"),
            amount: row.get("amount"),
            version: row.get("mtime"),
        }))
    }

    async fn apply(
        &self,
        account_id: AccountId,
        amount: f64,
        action: PaymentAction,
        version: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let signed = match action {
            PaymentAction::Pay => -amount,
            PaymentAction::Deposit => amount,
        };

        let updated = sqlx::query(
            r#"
            UPDATE accounts SET balance = balance + $1, mtime = now()
            WHERE id = $2 AND mtime = $3
            RETURNING id
            "#,
        )
        .bind(signed)
        .bind(account_id.as_i64())
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update account balance", e))?;

        if updated.is_none() {
            return Err(StoreError::conflict(format!("account {account_id}")));
        }
        Ok(())
    }

    async fn mark_ok(&self, payment_id: PaymentId) -> Result<(), StoreError> {
        sqlx::query("UPDATE payments SET status = 'ok', mtime = now() WHERE id = $1")
            .bind(payment_id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("approve payment", e))?;
        Ok(())
    }

    async fn mark_failed(&self, payment_id: PaymentId, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE payments SET status = 'failed', error = $1, mtime = now() \
             WHERE id = $2 AND status = 'pending'",
        )
        .bind(error)
        .bind(payment_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reject payment", e))?;
        Ok(())
    }

    async fn create_account(&self, user_id: UserId) -> Result<AccountId, StoreError> {
        sqlx::query("INSERT INTO accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create account", e))?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM accounts WHERE user_id = $1")
            .bind(user_id.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create account", e))?;
        Ok(AccountId::new(id))
    }

    async fn add_money(&self, user_id: UserId, amount: f64) -> Result<(), StoreError> {
        let rounded = money::round_down_to_cents(amount);
        let updated = sqlx::query(
            "UPDATE accounts SET balance = balance + $1, mtime = now() \
             WHERE user_id = $2 RETURNING id",
        )
        .bind(rounded)
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("add money", e))?;

        if updated.is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn balance(&self, user_id: UserId) -> Result<f64, StoreError> {
        sqlx::query_scalar("SELECT balance FROM accounts WHERE user_id = $1")
            .bind(user_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get account balance", e))?
            .ok_or(StoreError::NotFound)
    }

    async fn payments_by_order(&self, order_id: OrderId) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, action, amount, status, error, ctime, mtime
            FROM payments
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get payments list", e))?;

        Ok(rows
            .into_iter()
            .map(|row| Payment {
                id: PaymentId::new(row.get::<i64, _>("id")),
                order_id: OrderId::new(row.get::<i64, _>("order_id")),
                action: payment_action_from_str(row.get("action")),
                amount: row.get("amount"),
                status: status_from_str(row.get("status")),
                error: optional_error(row.get("error")),
                ctime: row.get("ctime"),
                mtime: row.get("mtime"),
            })
            .collect())
    }
}
