//! Stock store over Postgres.
//!
//! The batch apply is the one place inventory mutates: a compound UPDATE
//! with one CASE arm per element, each arm and the row filter predicated
//! on the `(id, mtime)` pair read earlier. Rows whose token moved are not
//! matched, so the RETURNING set turning up short is the conflict signal
//! and nothing is half-applied.

use async_trait::async_trait;
use sqlx::Row;

use mercato_core::{ItemId, StockChangeId, StockId, StoreError};
use mercato_messaging::StockAction;
use mercato_stock::store::{CatalogStore, Item, PendingChange, StockStore};

use super::{map_sqlx_error, PostgresDatabase};

#[async_trait]
impl StockStore for PostgresDatabase {
    async fn load_pending(&self, ids: &[StockChangeId]) -> Result<Vec<PendingChange>, StoreError> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.as_i64()).collect();

        let rows = sqlx::query(
            r#"
            SELECT s.id, sc.quantity AS needed, s.quantity AS available, s.mtime
            FROM stock s
            JOIN stock_changes sc ON sc.stock_id = s.id
            WHERE sc.id = ANY($1) AND sc.status = 'pending'
            "#,
        )
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load pending stock_changes", e))?;

        Ok(rows
            .into_iter()
            .map(|row| PendingChange {
                stock_id: StockId::new(row.get::<i64, _>("id")),
                quantity: row.get::<i64, _>("needed"),
                available: row.get::<i64, _>("available"),
                version: row.get("mtime"),
            })
            .collect())
    }

    async fn apply(&self, changes: &[PendingChange], action: StockAction) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }

        let operation = match action {
            StockAction::Add => "+",
            StockAction::Remove => "-",
        };

        // One CASE arm and one row-filter tuple per element; placeholders
        // are shared between the two lists.
        let mut case_arms = Vec::with_capacity(changes.len());
        let mut row_tuples = Vec::with_capacity(changes.len());
        let mut position = 1usize;
        for _ in changes {
            case_arms.push(format!(
                "WHEN id = ${p} AND mtime = ${m} THEN quantity {operation} ${q}",
                p = position,
                m = position + 1,
                q = position + 2,
            ));
            row_tuples.push(format!("(${p}, ${m})", p = position, m = position + 1));
            position += 3;
        }

        let query = format!(
            "UPDATE stock \
             SET quantity = CASE {} ELSE quantity END, mtime = now() \
             WHERE (id, mtime) IN ({}) \
             RETURNING id",
            case_arms.join(" "),
            row_tuples.join(", "),
        );

        let mut prepared = sqlx::query(&query);
        for change in changes {
            prepared = prepared
                .bind(change.stock_id.as_i64())
                .bind(change.version)
                .bind(change.quantity);
        }

        let rows = prepared
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("process stock_changes", e))?;

        if rows.len() < changes.len() {
            let updated: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("id")).collect();
            let missing: Vec<i64> = changes
                .iter()
                .map(|c| c.stock_id.as_i64())
                .filter(|id| !updated.contains(id))
                .collect();
            return Err(StoreError::conflict(format!("stock ids {missing:?}")));
        }

        Ok(())
    }

    async fn mark_ok(&self, ids: &[StockChangeId]) -> Result<(), StoreError> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.as_i64()).collect();
        sqlx::query("UPDATE stock_changes SET status = 'ok', mtime = now() WHERE id = ANY($1)")
            .bind(&raw_ids)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("approve stock_changes", e))?;
        Ok(())
    }

    async fn mark_failed(&self, ids: &[StockChangeId], error: &str) -> Result<(), StoreError> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.as_i64()).collect();
        sqlx::query(
            "UPDATE stock_changes SET status = 'failed', error = $1, mtime = now() WHERE id = ANY($2)",
        )
        .bind(error)
        .bind(&raw_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reject stock_changes", e))?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PostgresDatabase {
    async fn add_item(&self, name: &str, price: f64, quantity: i64) -> Result<ItemId, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin add_item", e))?;

        let item_id: i64 =
            sqlx::query_scalar("INSERT INTO items (name, price) VALUES ($1, $2) RETURNING id")
                .bind(name)
                .bind(price)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert item", e))?;

        sqlx::query("INSERT INTO stock (item_id, quantity) VALUES ($1, $2)")
            .bind(item_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert stock", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit add_item", e))?;
        Ok(ItemId::new(item_id))
    }

    async fn update_item(&self, item_id: ItemId, name: &str, price: f64)
        -> Result<(), StoreError> {
        let updated =
            sqlx::query("UPDATE items SET name = $1, price = $2 WHERE id = $3 RETURNING id")
                .bind(name)
                .bind(price)
                .bind(item_id.as_i64())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("update item", e))?;

        if updated.is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT i.id, i.name, i.price, COALESCE(s.quantity, 0) AS quantity
            FROM items i
            LEFT JOIN stock s ON s.item_id = i.id
            ORDER BY i.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list items", e))?;

        Ok(rows
            .into_iter()
            .map(|row| Item {
                id: ItemId::new(row.get::<i64, _>("id")),
                name: row.get("name"),
                price: row.get("price"),
                quantity: row.get("quantity"),
            })
            .collect())
    }
}
