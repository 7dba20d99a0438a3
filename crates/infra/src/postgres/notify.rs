//! Notification store over Postgres.

use async_trait::async_trait;

use mercato_core::{StoreError, UserId};
use mercato_messaging::NotificationMessage;
use mercato_notify::NotificationStore;

use super::{map_sqlx_error, PostgresDatabase};

#[async_trait]
impl NotificationStore for PostgresDatabase {
    async fn append(&self, msg: &NotificationMessage) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO notifications (user_id, order_id, message) VALUES ($1, $2, $3)")
            .bind(msg.user_id.as_i64())
            .bind(msg.order_id.as_i64())
            .bind(&msg.message)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert notification", e))?;
        Ok(())
    }

    async fn by_user(&self, user_id: UserId) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar("SELECT message FROM notifications WHERE user_id = $1 ORDER BY id")
            .bind(user_id.as_i64())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get notifications", e))
    }
}
