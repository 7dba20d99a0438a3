//! Stock store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use mercato_core::{ItemId, OrderId, StockChangeId, StockId, StoreError};
use mercato_messaging::{IntentStatus, StockAction};

/// One row of the pending-batch load: the stock row joined with how much
/// the intent needs, plus the version token the update must match.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub stock_id: StockId,
    /// Units the intent moves.
    pub quantity: i64,
    /// Units currently on the shelf.
    pub available: i64,
    /// Optimistic-lock token read with the row.
    pub version: DateTime<Utc>,
}

/// Full intent row, as returned to the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockChange {
    pub id: StockChangeId,
    pub order_id: OrderId,
    pub stock_id: StockId,
    pub action: StockAction,
    pub quantity: i64,
    pub status: IntentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

/// Catalog row joined with its stock level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
}

/// Catalog maintenance (admin surface).
#[async_trait]
pub trait CatalogStore: Send + Sync + 'static {
    /// Insert an item and its stock row.
    async fn add_item(&self, name: &str, price: f64, quantity: i64)
        -> Result<ItemId, StoreError>;

    async fn update_item(&self, item_id: ItemId, name: &str, price: f64)
        -> Result<(), StoreError>;

    async fn list_items(&self) -> Result<Vec<Item>, StoreError>;
}

#[async_trait]
pub trait StockStore: Send + Sync + 'static {
    /// Load `(stock, needed)` for every change in `ids` still pending.
    /// An empty result means the batch was already settled (redelivery).
    async fn load_pending(&self, ids: &[StockChangeId]) -> Result<Vec<PendingChange>, StoreError>;

    /// Apply the whole batch in one version-predicated update. Implementors
    /// return `StoreError::Conflict` when any row's version moved, leaving
    /// every row untouched.
    async fn apply(&self, changes: &[PendingChange], action: StockAction) -> Result<(), StoreError>;

    async fn mark_ok(&self, ids: &[StockChangeId]) -> Result<(), StoreError>;

    async fn mark_failed(&self, ids: &[StockChangeId], error: &str) -> Result<(), StoreError>;
}
