//! Reservation store over Postgres.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

use mercato_core::{CourierId, DomainError, HourMask, OrderId, ReservationId, StoreError, UserId};
use mercato_delivery::store::{CourierReservation, PendingReservation, ReservationStore};
use mercato_messaging::ReserveAction;
use mercato_orders::types::OrderStatus;

use super::{map_sqlx_error, optional_error, reserve_action_from_str, status_from_str, PostgresDatabase};

#[async_trait]
impl ReservationStore for PostgresDatabase {
    async fn load_pending(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<PendingReservation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT r.courier_id, r.work_date, r.hour_mask AS requested,
                   s.hour_mask AS schedule, s.mtime
            FROM courier_reservation r
            JOIN courier_schedule s
              ON s.courier_id = r.courier_id AND s.work_date = r.work_date
            WHERE r.id = $1 AND r.status = 'pending'
            "#,
        )
        .bind(reservation_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load pending cour_reserve", e))?;

        Ok(row.map(|row| PendingReservation {
            courier_id: CourierId::new(row.get::<i64, _>("courier_id")),
            work_date: row.get("work_date"),
            requested: HourMask::new(row.get::<i32, _>("requested") as u32),
            schedule: HourMask::new(row.get::<i32, _>("schedule") as u32),
            version: row.get("mtime"),
        }))
    }

    async fn apply(
        &self,
        courier_id: CourierId,
        work_date: NaiveDate,
        mask: HourMask,
        action: ReserveAction,
        version: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = match action {
            ReserveAction::Reserve => {
                "UPDATE courier_schedule SET hour_mask = hour_mask | $1, mtime = now() \
                 WHERE courier_id = $2 AND work_date = $3 AND mtime = $4 RETURNING id"
            }
            ReserveAction::RevertReserve => {
                "UPDATE courier_schedule SET hour_mask = hour_mask & ~$1, mtime = now() \
                 WHERE courier_id = $2 AND work_date = $3 AND mtime = $4 RETURNING id"
            }
        };

        let updated = sqlx::query(query)
            .bind(mask.bits() as i32)
            .bind(courier_id.as_i64())
            .bind(work_date)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update courier schedule", e))?;

        if updated.is_none() {
            return Err(StoreError::conflict(format!(
                "schedule {courier_id}/{work_date}"
            )));
        }
        Ok(())
    }

    async fn mark_ok(&self, reservation_id: ReservationId) -> Result<(), StoreError> {
        sqlx::query("UPDATE courier_reservation SET status = 'ok', mtime = now() WHERE id = $1")
            .bind(reservation_id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("approve cour_reserve", e))?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        reservation_id: ReservationId,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE courier_reservation SET status = 'failed', error = $1, mtime = now() \
             WHERE id = $2",
        )
        .bind(error)
        .bind(reservation_id.as_i64())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reject cour_reserve", e))?;
        Ok(())
    }

    async fn create_courier(&self, user_id: UserId) -> Result<CourierId, StoreError> {
        sqlx::query("INSERT INTO couriers (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.as_i64())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create courier", e))?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM couriers WHERE user_id = $1")
            .bind(user_id.as_i64())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create courier", e))?;
        Ok(CourierId::new(id))
    }

    async fn create_schedule_today(
        &self,
        user_id: UserId,
        mask: HourMask,
    ) -> Result<(), StoreError> {
        let courier_id: i64 = sqlx::query_scalar("SELECT id FROM couriers WHERE user_id = $1")
            .bind(user_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get courier", e))?
            .ok_or(StoreError::NotFound)?;

        let inserted = sqlx::query(
            "INSERT INTO courier_schedule (courier_id, work_date, hour_mask) \
             VALUES ($1, CURRENT_DATE, $2) \
             ON CONFLICT (courier_id, work_date) DO NOTHING RETURNING id",
        )
        .bind(courier_id)
        .bind(mask.bits() as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create schedule for today", e))?;

        if inserted.is_none() {
            return Err(DomainError::validation("schedule for today exists already").into());
        }
        Ok(())
    }

    async fn reservations_by_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<CourierReservation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, courier_id, action, work_date, hour_mask,
                   status, error, ctime, mtime
            FROM courier_reservation
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get cour reservation list", e))?;

        Ok(rows
            .into_iter()
            .map(|row| CourierReservation {
                id: ReservationId::new(row.get::<i64, _>("id")),
                order_id: OrderId::new(row.get::<i64, _>("order_id")),
                courier_id: CourierId::new(row.get::<i64, _>("courier_id")),
                action: reserve_action_from_str(row.get("action")),
                work_date: row.get("work_date"),
                hour_mask: HourMask::new(row.get::<i32, _>("hour_mask") as u32),
                status: status_from_str(row.get("status")),
                error: optional_error(row.get("error")),
                ctime: row.get("ctime"),
                mtime: row.get("mtime"),
            })
            .collect())
    }

    async fn confirm_delivery(&self, user_id: UserId, order_id: OrderId)
        -> Result<(), StoreError> {
        self.courier_confirm(user_id, order_id, OrderStatus::Delivery)
            .await
    }

    async fn confirm_delivered(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<(), StoreError> {
        self.courier_confirm(user_id, order_id, OrderStatus::Delivered)
            .await
    }
}

impl PostgresDatabase {
    async fn courier_confirm(
        &self,
        user_id: UserId,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<(), StoreError> {
        // States the order may currently be in; the target itself makes
        // the confirmation idempotent.
        let allowed: &[&str] = match next {
            OrderStatus::Delivery => &["pending", "approved", "delivery"],
            OrderStatus::Delivered => &["delivery", "delivered"],
            _ => return Err(DomainError::validation("unsupported confirmation").into()),
        };
        let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();

        let updated = sqlx::query(
            r#"
            UPDATE orders o
            SET status = $1, mtime = now()
            FROM courier_reservation cr
            JOIN couriers c ON cr.courier_id = c.id
            WHERE o.id = cr.order_id
              AND c.user_id = $2
              AND o.id = $3
              AND cr.action = 'reserve'
              AND cr.status = 'ok'
              AND o.status = ANY($4)
            RETURNING o.id
            "#,
        )
        .bind(next.as_str())
        .bind(user_id.as_i64())
        .bind(order_id.as_i64())
        .bind(&allowed)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("confirm order", e))?;

        if updated.is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
