//! Saga store over Postgres: order intake, intent creators, status
//! updates. Creators insert new rows and never mutate old intents; each
//! is guarded by an existence probe so redelivered triggers find the
//! earlier row instead of forking the saga.

use async_trait::async_trait;
use sqlx::Row;

use mercato_core::{
    money, DomainError, HourMask, OrderId, PaymentId, ReservationId, StockChangeId, StoreError,
    UserId,
};
use mercato_orders::store::{Created, NewOrder, SagaStore};
use mercato_orders::types::{Order, OrderItem, OrderStatus};

use super::{map_sqlx_error, PostgresDatabase};

#[async_trait]
impl SagaStore for PostgresDatabase {
    async fn create_order(&self, user_id: UserId, order: NewOrder) -> Result<OrderId, StoreError> {
        if order.items.is_empty() {
            return Err(DomainError::validation("empty order").into());
        }
        for item in &order.items {
            if item.quantity < 1 {
                return Err(DomainError::validation(format!(
                    "item {} quantity is non-positive",
                    item.item_id
                ))
                .into());
            }
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM items WHERE id = $1)")
                    .bind(item.item_id.as_i64())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("validate item", e))?;
            if !exists {
                return Err(
                    DomainError::validation(format!("item {} not exists", item.item_id)).into(),
                );
            }
        }

        let packed = serde_json::to_string(&order.items)
            .map_err(|e| StoreError::storage(format!("pack items: {e}")))?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO orders (user_id, items, address, hour_mask) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(user_id.as_i64())
        .bind(packed)
        .bind(&order.address)
        .bind(order.hour_mask.bits() as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create order", e))?;

        Ok(OrderId::new(id))
    }

    async fn create_stock_changes(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StockChangeId>, StoreError> {
        let packed: String = sqlx::query_scalar("SELECT items FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get order items", e))?
            .ok_or(StoreError::NotFound)?;
        let items: Vec<OrderItem> = serde_json::from_str(&packed)
            .map_err(|e| StoreError::storage(format!("unpack items: {e}")))?;

        let item_ids: Vec<i64> = items.iter().map(|i| i.item_id.as_i64()).collect();
        let rows = sqlx::query("SELECT id, item_id FROM stock WHERE item_id = ANY($1)")
            .bind(&item_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get items from stock", e))?;

        let mut resolved = Vec::with_capacity(items.len());
        for item in &items {
            let stock_id = rows
                .iter()
                .find(|r| r.get::<i64, _>("item_id") == item.item_id.as_i64())
                .map(|r| r.get::<i64, _>("id"))
                .ok_or_else(|| {
                    StoreError::from(DomainError::validation(format!(
                        "missing item {} in stock",
                        item.item_id
                    )))
                })?;
            resolved.push((stock_id, item.quantity));
        }

        // One VALUES tuple per item, placeholders throughout.
        let mut tuples = Vec::with_capacity(resolved.len());
        let mut position = 1usize;
        for _ in &resolved {
            tuples.push(format!(
                "($1, ${s}, 'remove', ${q})",
                s = position + 1,
                q = position + 2
            ));
            position += 2;
        }
        let query = format!(
            "INSERT INTO stock_changes (order_id, stock_id, action, quantity) VALUES {} RETURNING id",
            tuples.join(", "),
        );

        let mut prepared = sqlx::query(&query).bind(order_id.as_i64());
        for (stock_id, quantity) in &resolved {
            prepared = prepared.bind(stock_id).bind(quantity);
        }

        let rows = prepared
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert stock_changes", e))?;

        Ok(rows
            .into_iter()
            .map(|r| StockChangeId::new(r.get::<i64, _>("id")))
            .collect())
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        let current: String = sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get order status", e))?
            .ok_or(StoreError::NotFound)?;

        let current = order_status_from_str(&current)?;
        if current == status {
            return Ok(());
        }
        if !current.can_transition_to(status) {
            return Err(DomainError::validation(format!(
                "order {order_id} cannot move from {current} to {status}"
            ))
            .into());
        }

        // Predicate on the observed status; a concurrent mover wins and
        // this update becomes a no-op.
        sqlx::query("UPDATE orders SET status = $1, mtime = now() WHERE id = $2 AND status = $3")
            .bind(status.as_str())
            .bind(order_id.as_i64())
            .bind(current.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set order status", e))?;
        Ok(())
    }

    async fn order_user(&self, order_id: OrderId) -> Result<UserId, StoreError> {
        let user_id: i64 = sqlx::query_scalar("SELECT user_id FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get order user", e))?
            .ok_or(StoreError::NotFound)?;
        Ok(UserId::new(user_id))
    }

    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, items, address, hour_mask, status, ctime, mtime \
             FROM orders WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get orders", e))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let items: Vec<OrderItem> = serde_json::from_str(row.get("items"))
                .map_err(|e| StoreError::storage(format!("unpack items: {e}")))?;
            orders.push(Order {
                id: OrderId::new(row.get::<i64, _>("id")),
                user_id: UserId::new(row.get::<i64, _>("user_id")),
                items,
                address: row.get("address"),
                hour_mask: HourMask::new(row.get::<i32, _>("hour_mask") as u32),
                status: order_status_from_str(row.get("status"))?,
                ctime: row.get("ctime"),
                mtime: row.get("mtime"),
            });
        }
        Ok(orders)
    }

    async fn create_payment(
        &self,
        order_id: OrderId,
        stock_change_ids: &[StockChangeId],
    ) -> Result<Created<PaymentId>, StoreError> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM payments \
             WHERE order_id = $1 AND action = 'pay' AND status <> 'failed' LIMIT 1",
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("probe payment", e))?;
        if let Some(id) = existing {
            return Ok(Created::Existing(PaymentId::new(id)));
        }

        let raw_ids: Vec<i64> = stock_change_ids.iter().map(|id| id.as_i64()).collect();
        let rows = sqlx::query(
            r#"
            SELECT sc.quantity, i.price
            FROM stock_changes sc
            JOIN stock s ON s.id = sc.stock_id
            JOIN items i ON i.id = s.item_id
            WHERE sc.id = ANY($1)
            "#,
        )
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("calculate order total price", e))?;

        let total: f64 = rows
            .iter()
            .map(|r| r.get::<i64, _>("quantity") as f64 * r.get::<f64, _>("price"))
            .sum();
        let amount = money::round_up_to_cents(total);

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO payments (order_id, action, amount) VALUES ($1, 'pay', $2) RETURNING id",
        )
        .bind(order_id.as_i64())
        .bind(amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create payment", e))?;

        Ok(Created::New(PaymentId::new(id)))
    }

    async fn revert_payment(&self, payment_id: PaymentId)
        -> Result<Created<PaymentId>, StoreError> {
        let source = sqlx::query(
            "SELECT order_id, amount FROM payments WHERE id = $1 AND action = 'pay'",
        )
        .bind(payment_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("build revert payment", e))?
        .ok_or(StoreError::NotFound)?;

        let order_id: i64 = source.get("order_id");
        let amount: f64 = source.get("amount");

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM payments \
             WHERE order_id = $1 AND action = 'deposit' AND status <> 'failed' LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("probe deposit", e))?;
        if let Some(id) = existing {
            return Ok(Created::Existing(PaymentId::new(id)));
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO payments (order_id, amount, action) \
             VALUES ($1, $2, 'deposit') RETURNING id",
        )
        .bind(order_id)
        .bind(amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("revert payment", e))?;

        Ok(Created::New(PaymentId::new(id)))
    }

    async fn create_cour_reserve(
        &self,
        order_id: OrderId,
    ) -> Result<Created<ReservationId>, StoreError> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM courier_reservation \
             WHERE order_id = $1 AND action = 'reserve' AND status <> 'failed' LIMIT 1",
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("probe cour_reserve", e))?;
        if let Some(id) = existing {
            return Ok(Created::Existing(ReservationId::new(id)));
        }

        let mask: i32 = sqlx::query_scalar("SELECT hour_mask FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get order hour_mask", e))?
            .ok_or(StoreError::NotFound)?;

        // Lowest-id courier with the requested hours free today.
        let courier_id: Option<i64> = sqlx::query_scalar(
            "SELECT courier_id FROM courier_schedule \
             WHERE work_date = CURRENT_DATE AND hour_mask & $1 = 0 \
             ORDER BY courier_id LIMIT 1",
        )
        .bind(mask)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get free courier", e))?;
        let courier_id = courier_id.ok_or(StoreError::Domain(DomainError::SlotUnavailable))?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO courier_reservation (order_id, courier_id, action, work_date, hour_mask) \
             VALUES ($1, $2, 'reserve', CURRENT_DATE, $3) RETURNING id",
        )
        .bind(order_id.as_i64())
        .bind(courier_id)
        .bind(mask)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create cour_reserve", e))?;

        Ok(Created::New(ReservationId::new(id)))
    }

    async fn revert_cour_reserve(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Created<ReservationId>, StoreError> {
        let source = sqlx::query(
            "SELECT order_id, courier_id, work_date, hour_mask \
             FROM courier_reservation WHERE id = $1 AND action = 'reserve'",
        )
        .bind(reservation_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("build revert cour_reserve", e))?
        .ok_or(StoreError::NotFound)?;

        let order_id: i64 = source.get("order_id");

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM courier_reservation \
             WHERE order_id = $1 AND action = 'revert_reserve' AND status <> 'failed' LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("probe revert_reserve", e))?;
        if let Some(id) = existing {
            return Ok(Created::Existing(ReservationId::new(id)));
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO courier_reservation (order_id, courier_id, action, work_date, hour_mask) \
             VALUES ($1, $2, 'revert_reserve', $3, $4) RETURNING id",
        )
        .bind(order_id)
        .bind(source.get::<i64, _>("courier_id"))
        .bind(source.get::<chrono::NaiveDate, _>("work_date"))
        .bind(source.get::<i32, _>("hour_mask"))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("revert cour_reserve", e))?;

        Ok(Created::New(ReservationId::new(id)))
    }

    async fn revert_stock_changes(
        &self,
        stock_change_ids: &[StockChangeId],
    ) -> Result<Created<Vec<StockChangeId>>, StoreError> {
        let raw_ids: Vec<i64> = stock_change_ids.iter().map(|id| id.as_i64()).collect();
        let sources = sqlx::query(
            "SELECT order_id, stock_id, quantity FROM stock_changes \
             WHERE id = ANY($1) AND action = 'remove'",
        )
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("build revert changes", e))?;

        if sources.is_empty() {
            return Err(StoreError::NotFound);
        }
        let order_id: i64 = sources[0].get("order_id");

        let existing: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM stock_changes WHERE order_id = $1 AND action = 'add'",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("probe stock revert", e))?;
        if !existing.is_empty() {
            return Ok(Created::Existing(
                existing.into_iter().map(StockChangeId::new).collect(),
            ));
        }

        let mut tuples = Vec::with_capacity(sources.len());
        let mut position = 1usize;
        for _ in &sources {
            tuples.push(format!(
                "(${o}, ${s}, ${q}, 'add')",
                o = position,
                s = position + 1,
                q = position + 2
            ));
            position += 3;
        }
        let query = format!(
            "INSERT INTO stock_changes (order_id, stock_id, quantity, action) VALUES {} RETURNING id",
            tuples.join(", "),
        );

        let mut prepared = sqlx::query(&query);
        for source in &sources {
            prepared = prepared
                .bind(source.get::<i64, _>("order_id"))
                .bind(source.get::<i64, _>("stock_id"))
                .bind(source.get::<i64, _>("quantity"));
        }

        let rows = prepared
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert revert stock_changes", e))?;

        Ok(Created::New(
            rows.into_iter()
                .map(|r| StockChangeId::new(r.get::<i64, _>("id")))
                .collect(),
        ))
    }
}

fn order_status_from_str(s: &str) -> Result<OrderStatus, StoreError> {
    match s {
        "pending" => Ok(OrderStatus::Pending),
        "approved" => Ok(OrderStatus::Approved),
        "delivery" => Ok(OrderStatus::Delivery),
        "delivered" => Ok(OrderStatus::Delivered),
        "canceled" => Ok(OrderStatus::Canceled),
        other => Err(StoreError::storage(format!("unknown order status: {other}"))),
    }
}
