//! In-memory database for tests and single-process dev runs.
//!
//! One mutex-guarded state implements every store contract, the same way
//! the production schema lives in one Postgres database. Optimistic
//! locking is honored faithfully: loads capture `mtime` tokens outside
//! the write lock, and applies reject stale tokens with a conflict, so
//! concurrent-writer scenarios behave exactly as they do against SQL.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use mercato_billing::store::{Payment, PaymentStore, PendingPayment};
use mercato_core::{
    money, AccountId, CourierId, DomainError, HourMask, ItemId, OrderId, PaymentId, ReservationId,
    StockChangeId, StockId, StoreError, UserId,
};
use mercato_delivery::store::{CourierReservation, PendingReservation, ReservationStore};
use mercato_messaging::{
    IntentStatus, NotificationMessage, PaymentAction, ReserveAction, StockAction,
};
use mercato_notify::NotificationStore;
use mercato_orders::store::{Created, NewOrder, SagaStore};
use mercato_orders::types::{Order, OrderItem, OrderStatus};
use mercato_stock::store::{CatalogStore, Item, PendingChange, StockChange, StockStore};

#[derive(Debug, Clone)]
struct ItemRow {
    name: String,
    price: f64,
}

#[derive(Debug, Clone)]
struct StockRow {
    item_id: ItemId,
    quantity: i64,
    mtime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StockChangeRow {
    order_id: OrderId,
    stock_id: StockId,
    action: StockAction,
    quantity: i64,
    status: IntentStatus,
    error: Option<String>,
    ctime: DateTime<Utc>,
    mtime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct OrderRow {
    user_id: UserId,
    items: Vec<OrderItem>,
    address: String,
    hour_mask: HourMask,
    status: OrderStatus,
    ctime: DateTime<Utc>,
    mtime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PaymentRow {
    order_id: OrderId,
    action: PaymentAction,
    amount: f64,
    status: IntentStatus,
    error: Option<String>,
    ctime: DateTime<Utc>,
    mtime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct AccountRow {
    user_id: UserId,
    balance: f64,
    mtime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ScheduleRow {
    hour_mask: HourMask,
    mtime: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ReservationRow {
    order_id: OrderId,
    courier_id: CourierId,
    action: ReserveAction,
    work_date: NaiveDate,
    hour_mask: HourMask,
    status: IntentStatus,
    error: Option<String>,
    ctime: DateTime<Utc>,
    mtime: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    seq: i64,
    items: BTreeMap<ItemId, ItemRow>,
    stocks: BTreeMap<StockId, StockRow>,
    stock_changes: BTreeMap<StockChangeId, StockChangeRow>,
    orders: BTreeMap<OrderId, OrderRow>,
    payments: BTreeMap<PaymentId, PaymentRow>,
    accounts: BTreeMap<AccountId, AccountRow>,
    couriers: BTreeMap<CourierId, UserId>,
    schedules: BTreeMap<(CourierId, NaiveDate), ScheduleRow>,
    reservations: BTreeMap<ReservationId, ReservationRow>,
    notifications: Vec<NotificationMessage>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }
}

#[derive(Default)]
pub struct InMemoryDatabase {
    state: Mutex<State>,
}

fn lock_err() -> StoreError {
    StoreError::storage("state lock poisoned")
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    // Inspection helpers for tests and dev tooling.

    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.state
            .lock()
            .ok()?
            .orders
            .get(&order_id)
            .map(|o| o.status)
    }

    pub fn stock_quantity(&self, stock_id: StockId) -> Option<i64> {
        self.state
            .lock()
            .ok()?
            .stocks
            .get(&stock_id)
            .map(|s| s.quantity)
    }

    pub fn schedule_mask(&self, courier_id: CourierId, work_date: NaiveDate) -> Option<HourMask> {
        self.state
            .lock()
            .ok()?
            .schedules
            .get(&(courier_id, work_date))
            .map(|s| s.hour_mask)
    }

    pub fn stock_changes_by_order(&self, order_id: OrderId) -> Vec<StockChange> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .stock_changes
            .iter()
            .filter(|(_, c)| c.order_id == order_id)
            .map(|(id, c)| StockChange {
                id: *id,
                order_id: c.order_id,
                stock_id: c.stock_id,
                action: c.action,
                quantity: c.quantity,
                status: c.status,
                error: c.error.clone(),
                ctime: c.ctime,
                mtime: c.mtime,
            })
            .collect()
    }

    /// Stock row backing an item, if any.
    pub fn stock_for_item(&self, item_id: ItemId) -> Option<StockId> {
        let state = self.state.lock().ok()?;
        state
            .stocks
            .iter()
            .find(|(_, s)| s.item_id == item_id)
            .map(|(id, _)| *id)
    }
}

#[async_trait]
impl CatalogStore for InMemoryDatabase {
    async fn add_item(&self, name: &str, price: f64, quantity: i64) -> Result<ItemId, StoreError> {
        if price < 0.0 || quantity < 0 {
            return Err(DomainError::validation("price and quantity must be non-negative").into());
        }
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let item_id = ItemId::new(state.next_id());
        state.items.insert(
            item_id,
            ItemRow {
                name: name.to_string(),
                price,
            },
        );
        let stock_id = StockId::new(state.next_id());
        state.stocks.insert(
            stock_id,
            StockRow {
                item_id,
                quantity,
                mtime: Utc::now(),
            },
        );
        Ok(item_id)
    }

    async fn update_item(&self, item_id: ItemId, name: &str, price: f64)
        -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let row = state.items.get_mut(&item_id).ok_or(StoreError::NotFound)?;
        row.name = name.to_string();
        row.price = price;
        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Ok(state
            .items
            .iter()
            .map(|(id, item)| {
                let quantity = state
                    .stocks
                    .values()
                    .find(|s| s.item_id == *id)
                    .map(|s| s.quantity)
                    .unwrap_or(0);
                Item {
                    id: *id,
                    name: item.name.clone(),
                    price: item.price,
                    quantity,
                }
            })
            .collect())
    }
}

#[async_trait]
impl StockStore for InMemoryDatabase {
    async fn load_pending(&self, ids: &[StockChangeId]) -> Result<Vec<PendingChange>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Ok(ids
            .iter()
            .filter_map(|id| state.stock_changes.get(id))
            .filter(|c| c.status == IntentStatus::Pending)
            .filter_map(|c| {
                state.stocks.get(&c.stock_id).map(|s| PendingChange {
                    stock_id: c.stock_id,
                    quantity: c.quantity,
                    available: s.quantity,
                    version: s.mtime,
                })
            })
            .collect())
    }

    async fn apply(&self, changes: &[PendingChange], action: StockAction) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;

        // All version tokens must still match; otherwise nothing moves.
        let stale: Vec<StockId> = changes
            .iter()
            .filter(|c| {
                state
                    .stocks
                    .get(&c.stock_id)
                    .map(|s| s.mtime != c.version)
                    .unwrap_or(true)
            })
            .map(|c| c.stock_id)
            .collect();
        if !stale.is_empty() {
            return Err(StoreError::conflict(format!("stock ids {stale:?}")));
        }

        let now = Utc::now();
        for c in changes {
            let row = state.stocks.get_mut(&c.stock_id).expect("verified above");
            match action {
                StockAction::Remove => row.quantity -= c.quantity,
                StockAction::Add => row.quantity += c.quantity,
            }
            if row.quantity < 0 {
                return Err(StoreError::storage(format!(
                    "stock {} quantity check violated",
                    c.stock_id
                )));
            }
            row.mtime = now;
        }
        Ok(())
    }

    async fn mark_ok(&self, ids: &[StockChangeId]) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let now = Utc::now();
        for id in ids {
            if let Some(row) = state.stock_changes.get_mut(id) {
                row.status = IntentStatus::Ok;
                row.mtime = now;
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, ids: &[StockChangeId], error: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let now = Utc::now();
        for id in ids {
            if let Some(row) = state.stock_changes.get_mut(id) {
                row.status = IntentStatus::Failed;
                row.error = Some(error.to_string());
                row.mtime = now;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for InMemoryDatabase {
    async fn load_pending(
        &self,
        payment_id: PaymentId,
        action: PaymentAction,
    ) -> Result<Option<PendingPayment>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        let Some(payment) = state
            .payments
            .get(&payment_id)
            .filter(|p| p.status == IntentStatus::Pending && p.action == action)
        else {
            return Ok(None);
        };

        let order = state
            .orders
            .get(&payment.order_id)
            .ok_or_else(|| StoreError::storage("payment order missing"))?;
        let (account_id, account) = state
            .accounts
            .iter()
            .find(|(_, a)| a.user_id == order.user_id)
            .ok_or_else(|| StoreError::storage("account missing for order user"))?;

        Ok(Some(PendingPayment {
            account_id: *account_id,
            balance: account.balance,
            amount: payment.amount,
            version: account.mtime,
        }))
    }

    async fn apply(
        &self,
        account_id: AccountId,
        amount: f64,
        action: PaymentAction,
        version: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let row = state
            .accounts
            .get_mut(&account_id)
            .ok_or(StoreError::NotFound)?;
        if row.mtime != version {
            return Err(StoreError::conflict(format!("account {account_id}")));
        }
        match action {
            PaymentAction::Pay => row.balance -= amount,
            PaymentAction::Deposit => row.balance += amount,
        }
        row.mtime = Utc::now();
        Ok(())
    }

    async fn mark_ok(&self, payment_id: PaymentId) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        if let Some(row) = state.payments.get_mut(&payment_id) {
            row.status = IntentStatus::Ok;
            row.mtime = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, payment_id: PaymentId, error: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        if let Some(row) = state
            .payments
            .get_mut(&payment_id)
            .filter(|p| p.status == IntentStatus::Pending)
        {
            row.status = IntentStatus::Failed;
            row.error = Some(error.to_string());
            row.mtime = Utc::now();
        }
        Ok(())
    }

    async fn create_account(&self, user_id: UserId) -> Result<AccountId, StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        if let Some((id, _)) = state.accounts.iter().find(|(_, a)| a.user_id == user_id) {
            return Ok(*id);
        }
        let id = AccountId::new(state.next_id());
        state.accounts.insert(
            id,
            AccountRow {
                user_id,
                balance: 0.0,
                mtime: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn add_money(&self, user_id: UserId, amount: f64) -> Result<(), StoreError> {
        if amount < 0.0 {
            return Err(DomainError::validation("amount must be non-negative").into());
        }
        let rounded = money::round_down_to_cents(amount);
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let row = state
            .accounts
            .values_mut()
            .find(|a| a.user_id == user_id)
            .ok_or(StoreError::NotFound)?;
        row.balance += rounded;
        row.mtime = Utc::now();
        Ok(())
    }

    async fn balance(&self, user_id: UserId) -> Result<f64, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        state
            .accounts
            .values()
            .find(|a| a.user_id == user_id)
            .map(|a| a.balance)
            .ok_or(StoreError::NotFound)
    }

    async fn payments_by_order(&self, order_id: OrderId) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Ok(state
            .payments
            .iter()
            .filter(|(_, p)| p.order_id == order_id)
            .map(|(id, p)| Payment {
                id: *id,
                order_id: p.order_id,
                action: p.action,
                amount: p.amount,
                status: p.status,
                error: p.error.clone(),
                ctime: p.ctime,
                mtime: p.mtime,
            })
            .collect())
    }
}

#[async_trait]
impl ReservationStore for InMemoryDatabase {
    async fn load_pending(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<PendingReservation>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        let Some(res) = state
            .reservations
            .get(&reservation_id)
            .filter(|r| r.status == IntentStatus::Pending)
        else {
            return Ok(None);
        };

        let schedule = state
            .schedules
            .get(&(res.courier_id, res.work_date))
            .ok_or_else(|| StoreError::storage("courier schedule missing"))?;

        Ok(Some(PendingReservation {
            courier_id: res.courier_id,
            work_date: res.work_date,
            requested: res.hour_mask,
            schedule: schedule.hour_mask,
            version: schedule.mtime,
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
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let row = state
            .schedules
            .get_mut(&(courier_id, work_date))
            .ok_or(StoreError::NotFound)?;
        if row.mtime != version {
            return Err(StoreError::conflict(format!("schedule {courier_id}/{work_date}")));
        }
        row.hour_mask = match action {
            ReserveAction::Reserve => row.hour_mask.reserve(mask),
            ReserveAction::RevertReserve => row.hour_mask.release(mask),
        };
        row.mtime = Utc::now();
        Ok(())
    }

    async fn mark_ok(&self, reservation_id: ReservationId) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        if let Some(row) = state.reservations.get_mut(&reservation_id) {
            row.status = IntentStatus::Ok;
            row.mtime = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        reservation_id: ReservationId,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        if let Some(row) = state.reservations.get_mut(&reservation_id) {
            row.status = IntentStatus::Failed;
            row.error = Some(error.to_string());
            row.mtime = Utc::now();
        }
        Ok(())
    }

    async fn create_courier(&self, user_id: UserId) -> Result<CourierId, StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        if let Some((id, _)) = state.couriers.iter().find(|(_, u)| **u == user_id) {
            return Ok(*id);
        }
        let id = CourierId::new(state.next_id());
        state.couriers.insert(id, user_id);
        Ok(id)
    }

    async fn create_schedule_today(
        &self,
        user_id: UserId,
        mask: HourMask,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let courier_id = *state
            .couriers
            .iter()
            .find(|(_, u)| **u == user_id)
            .map(|(id, _)| id)
            .ok_or(StoreError::NotFound)?;

        let today = Utc::now().date_naive();
        if state.schedules.contains_key(&(courier_id, today)) {
            return Err(
                DomainError::validation("schedule for today exists already").into(),
            );
        }
        state.schedules.insert(
            (courier_id, today),
            ScheduleRow {
                hour_mask: mask,
                mtime: Utc::now(),
            },
        );
        Ok(())
    }

    async fn reservations_by_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<CourierReservation>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Ok(state
            .reservations
            .iter()
            .filter(|(_, r)| r.order_id == order_id)
            .map(|(id, r)| CourierReservation {
                id: *id,
                order_id: r.order_id,
                courier_id: r.courier_id,
                action: r.action,
                work_date: r.work_date,
                hour_mask: r.hour_mask,
                status: r.status,
                error: r.error.clone(),
                ctime: r.ctime,
                mtime: r.mtime,
            })
            .collect())
    }

    async fn confirm_delivery(&self, user_id: UserId, order_id: OrderId)
        -> Result<(), StoreError> {
        self.courier_confirm(user_id, order_id, OrderStatus::Delivery)
    }

    async fn confirm_delivered(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<(), StoreError> {
        self.courier_confirm(user_id, order_id, OrderStatus::Delivered)
    }
}

impl InMemoryDatabase {
    fn courier_confirm(
        &self,
        user_id: UserId,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let courier_id = *state
            .couriers
            .iter()
            .find(|(_, u)| **u == user_id)
            .map(|(id, _)| id)
            .ok_or(StoreError::NotFound)?;

        // The courier must hold a successful reservation for this order.
        let assigned = state
            .reservations
            .values()
            .any(|r| {
                r.order_id == order_id
                    && r.courier_id == courier_id
                    && r.action == ReserveAction::Reserve
                    && r.status == IntentStatus::Ok
            });
        if !assigned {
            return Err(StoreError::NotFound);
        }

        let order = state.orders.get_mut(&order_id).ok_or(StoreError::NotFound)?;
        if order.status == next {
            return Ok(());
        }
        if !order.status.can_transition_to(next) {
            return Err(DomainError::validation(format!(
                "order {order_id} cannot move from {} to {next}",
                order.status
            ))
            .into());
        }
        order.status = next;
        order.mtime = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl SagaStore for InMemoryDatabase {
    async fn create_order(&self, user_id: UserId, order: NewOrder) -> Result<OrderId, StoreError> {
        if order.items.is_empty() {
            return Err(DomainError::validation("empty order").into());
        }

        let mut state = self.state.lock().map_err(|_| lock_err())?;
        for item in &order.items {
            if item.quantity < 1 {
                return Err(DomainError::validation(format!(
                    "item {} quantity is non-positive",
                    item.item_id
                ))
                .into());
            }
            if !state.items.contains_key(&item.item_id) {
                return Err(DomainError::validation(format!(
                    "item {} not exists",
                    item.item_id
                ))
                .into());
            }
        }

        let id = OrderId::new(state.next_id());
        let now = Utc::now();
        state.orders.insert(
            id,
            OrderRow {
                user_id,
                items: order.items,
                address: order.address,
                hour_mask: order.hour_mask,
                status: OrderStatus::Pending,
                ctime: now,
                mtime: now,
            },
        );
        Ok(id)
    }

    async fn create_stock_changes(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<StockChangeId>, StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let order = state.orders.get(&order_id).ok_or(StoreError::NotFound)?;

        let mut resolved = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let stock_id = state
                .stocks
                .iter()
                .find(|(_, s)| s.item_id == item.item_id)
                .map(|(id, _)| *id)
                .ok_or_else(|| {
                    StoreError::from(DomainError::validation(format!(
                        "missing item {} in stock",
                        item.item_id
                    )))
                })?;
            resolved.push((stock_id, item.quantity));
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(resolved.len());
        for (stock_id, quantity) in resolved {
            let id = StockChangeId::new(state.next_id());
            state.stock_changes.insert(
                id,
                StockChangeRow {
                    order_id,
                    stock_id,
                    action: StockAction::Remove,
                    quantity,
                    status: IntentStatus::Pending,
                    error: None,
                    ctime: now,
                    mtime: now,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn set_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let order = state.orders.get_mut(&order_id).ok_or(StoreError::NotFound)?;
        if order.status == status {
            return Ok(());
        }
        if !order.status.can_transition_to(status) {
            return Err(DomainError::validation(format!(
                "order {order_id} cannot move from {} to {status}",
                order.status
            ))
            .into());
        }
        order.status = status;
        order.mtime = Utc::now();
        Ok(())
    }

    async fn order_user(&self, order_id: OrderId) -> Result<UserId, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        state
            .orders
            .get(&order_id)
            .map(|o| o.user_id)
            .ok_or(StoreError::NotFound)
    }

    async fn orders_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Ok(state
            .orders
            .iter()
            .filter(|(_, o)| o.user_id == user_id)
            .map(|(id, o)| Order {
                id: *id,
                user_id: o.user_id,
                items: o.items.clone(),
                address: o.address.clone(),
                hour_mask: o.hour_mask,
                status: o.status,
                ctime: o.ctime,
                mtime: o.mtime,
            })
            .collect())
    }

    async fn create_payment(
        &self,
        order_id: OrderId,
        stock_change_ids: &[StockChangeId],
    ) -> Result<Created<PaymentId>, StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;

        if let Some((id, _)) = state.payments.iter().find(|(_, p)| {
            p.order_id == order_id
                && p.action == PaymentAction::Pay
                && p.status != IntentStatus::Failed
        }) {
            return Ok(Created::Existing(*id));
        }

        // Price the batch: stock_changes × stock × items.
        let mut total = 0.0;
        for id in stock_change_ids {
            let change = state.stock_changes.get(id).ok_or(StoreError::NotFound)?;
            let stock = state
                .stocks
                .get(&change.stock_id)
                .ok_or_else(|| StoreError::storage("stock row missing"))?;
            let item = state
                .items
                .get(&stock.item_id)
                .ok_or_else(|| StoreError::storage("item row missing"))?;
            total += change.quantity as f64 * item.price;
        }
        let amount = money::round_up_to_cents(total);

        let id = PaymentId::new(state.next_id());
        let now = Utc::now();
        state.payments.insert(
            id,
            PaymentRow {
                order_id,
                action: PaymentAction::Pay,
                amount,
                status: IntentStatus::Pending,
                error: None,
                ctime: now,
                mtime: now,
            },
        );
        Ok(Created::New(id))
    }

    async fn revert_payment(&self, payment_id: PaymentId)
        -> Result<Created<PaymentId>, StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let source = state
            .payments
            .get(&payment_id)
            .filter(|p| p.action == PaymentAction::Pay)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        if let Some((id, _)) = state.payments.iter().find(|(_, p)| {
            p.order_id == source.order_id
                && p.action == PaymentAction::Deposit
                && p.status != IntentStatus::Failed
        }) {
            return Ok(Created::Existing(*id));
        }

        let id = PaymentId::new(state.next_id());
        let now = Utc::now();
        state.payments.insert(
            id,
            PaymentRow {
                order_id: source.order_id,
                action: PaymentAction::Deposit,
                amount: source.amount,
                status: IntentStatus::Pending,
                error: None,
                ctime: now,
                mtime: now,
            },
        );
        Ok(Created::New(id))
    }

    async fn create_cour_reserve(
        &self,
        order_id: OrderId,
    ) -> Result<Created<ReservationId>, StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;

        if let Some((id, _)) = state.reservations.iter().find(|(_, r)| {
            r.order_id == order_id
                && r.action == ReserveAction::Reserve
                && r.status != IntentStatus::Failed
        }) {
            return Ok(Created::Existing(*id));
        }

        let mask = state
            .orders
            .get(&order_id)
            .map(|o| o.hour_mask)
            .ok_or(StoreError::NotFound)?;
        let today = Utc::now().date_naive();

        // Lowest courier id with the requested hours free.
        let courier_id = state
            .schedules
            .iter()
            .filter(|((_, date), row)| *date == today && !row.hour_mask.overlaps(mask))
            .map(|((courier_id, _), _)| *courier_id)
            .min()
            .ok_or(StoreError::Domain(DomainError::SlotUnavailable))?;

        let id = ReservationId::new(state.next_id());
        let now = Utc::now();
        state.reservations.insert(
            id,
            ReservationRow {
                order_id,
                courier_id,
                action: ReserveAction::Reserve,
                work_date: today,
                hour_mask: mask,
                status: IntentStatus::Pending,
                error: None,
                ctime: now,
                mtime: now,
            },
        );
        Ok(Created::New(id))
    }

    async fn revert_cour_reserve(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Created<ReservationId>, StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        let source = state
            .reservations
            .get(&reservation_id)
            .filter(|r| r.action == ReserveAction::Reserve)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        if let Some((id, _)) = state.reservations.iter().find(|(_, r)| {
            r.order_id == source.order_id
                && r.action == ReserveAction::RevertReserve
                && r.status != IntentStatus::Failed
        }) {
            return Ok(Created::Existing(*id));
        }

        let id = ReservationId::new(state.next_id());
        let now = Utc::now();
        state.reservations.insert(
            id,
            ReservationRow {
                order_id: source.order_id,
                courier_id: source.courier_id,
                action: ReserveAction::RevertReserve,
                work_date: source.work_date,
                hour_mask: source.hour_mask,
                status: IntentStatus::Pending,
                error: None,
                ctime: now,
                mtime: now,
            },
        );
        Ok(Created::New(id))
    }

    async fn revert_stock_changes(
        &self,
        stock_change_ids: &[StockChangeId],
    ) -> Result<Created<Vec<StockChangeId>>, StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;

        let sources: Vec<StockChangeRow> = stock_change_ids
            .iter()
            .filter_map(|id| state.stock_changes.get(id))
            .filter(|c| c.action == StockAction::Remove)
            .cloned()
            .collect();
        if sources.is_empty() {
            return Err(StoreError::NotFound);
        }

        let order_id = sources[0].order_id;
        let existing: Vec<StockChangeId> = state
            .stock_changes
            .iter()
            .filter(|(_, c)| c.order_id == order_id && c.action == StockAction::Add)
            .map(|(id, _)| *id)
            .collect();
        if !existing.is_empty() {
            return Ok(Created::Existing(existing));
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(sources.len());
        for source in sources {
            let id = StockChangeId::new(state.next_id());
            state.stock_changes.insert(
                id,
                StockChangeRow {
                    order_id: source.order_id,
                    stock_id: source.stock_id,
                    action: StockAction::Add,
                    quantity: source.quantity,
                    status: IntentStatus::Pending,
                    error: None,
                    ctime: now,
                    mtime: now,
                },
            );
            ids.push(id);
        }
        Ok(Created::New(ids))
    }
}

#[async_trait]
impl NotificationStore for InMemoryDatabase {
    async fn append(&self, msg: &NotificationMessage) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| lock_err())?;
        state.notifications.push(msg.clone());
        Ok(())
    }

    async fn by_user(&self, user_id: UserId) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().map_err(|_| lock_err())?;
        Ok(state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.message.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn order_with_one_item(db: &InMemoryDatabase) -> (OrderId, ItemId) {
        let item_id = db.add_item("beans", 10.0, 5).await.unwrap();
        let order_id = db
            .create_order(
                UserId::new(7),
                NewOrder {
                    items: vec![OrderItem { item_id, quantity: 2 }],
                    address: "A".into(),
                    hour_mask: HourMask::from_hour(14).unwrap(),
                },
            )
            .await
            .unwrap();
        (order_id, item_id)
    }

    #[tokio::test]
    async fn order_validation_rejects_unknown_items() {
        let db = InMemoryDatabase::new();
        let err = db
            .create_order(
                UserId::new(7),
                NewOrder {
                    items: vec![OrderItem { item_id: ItemId::new(999), quantity: 1 }],
                    address: "A".into(),
                    hour_mask: HourMask::from_hour(14).unwrap(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn payment_pricing_rounds_up_to_cents() {
        let db = InMemoryDatabase::new();
        let item_id = db.add_item("beans", 3.333, 10).await.unwrap();
        let order_id = db
            .create_order(
                UserId::new(7),
                NewOrder {
                    items: vec![OrderItem { item_id, quantity: 3 }],
                    address: "A".into(),
                    hour_mask: HourMask::from_hour(14).unwrap(),
                },
            )
            .await
            .unwrap();
        let ids = db.create_stock_changes(order_id).await.unwrap();

        let created = db.create_payment(order_id, &ids).await.unwrap();
        assert!(created.is_new());
        let payments = db.payments_by_order(order_id).await.unwrap();
        assert_eq!(payments[0].amount, 10.0);
    }

    #[tokio::test]
    async fn creators_are_idempotent() {
        let db = InMemoryDatabase::new();
        let (order_id, _) = order_with_one_item(&db).await;
        let ids = db.create_stock_changes(order_id).await.unwrap();

        let first = db.create_payment(order_id, &ids).await.unwrap();
        let second = db.create_payment(order_id, &ids).await.unwrap();
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.id(), second.id());

        let reverted = db.revert_stock_changes(&ids).await.unwrap();
        let again = db.revert_stock_changes(&ids).await.unwrap();
        assert!(reverted.is_new());
        assert!(!again.is_new());
    }

    #[tokio::test]
    async fn courier_pick_prefers_lowest_free_id() {
        let db = InMemoryDatabase::new();
        let (order_id, _) = order_with_one_item(&db).await;

        let busy = db.create_courier(UserId::new(20)).await.unwrap();
        let free = db.create_courier(UserId::new(21)).await.unwrap();
        assert!(busy < free);
        db.create_schedule_today(UserId::new(20), HourMask::new(0x4000))
            .await
            .unwrap();
        db.create_schedule_today(UserId::new(21), HourMask::EMPTY)
            .await
            .unwrap();

        let created = db.create_cour_reserve(order_id).await.unwrap();
        let reservations = db.reservations_by_order(order_id).await.unwrap();
        assert_eq!(reservations[0].id, created.id());
        assert_eq!(reservations[0].courier_id, free);
    }

    #[tokio::test]
    async fn no_free_courier_is_slot_unavailable() {
        let db = InMemoryDatabase::new();
        let (order_id, _) = order_with_one_item(&db).await;
        db.create_courier(UserId::new(20)).await.unwrap();
        db.create_schedule_today(UserId::new(20), HourMask::new(0x4000))
            .await
            .unwrap();

        let err = db.create_cour_reserve(order_id).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::SlotUnavailable)));
    }

    #[tokio::test]
    async fn stale_version_conflicts_and_leaves_state_alone() {
        let db = InMemoryDatabase::new();
        let (order_id, item_id) = order_with_one_item(&db).await;
        let ids = db.create_stock_changes(order_id).await.unwrap();
        let stock_id = db.stock_for_item(item_id).unwrap();

        let loaded = StockStore::load_pending(&db, &ids).await.unwrap();
        assert_eq!(loaded.len(), 1);

        // A concurrent writer moves the row first.
        StockStore::apply(&db, &loaded, StockAction::Remove).await.unwrap();
        let err = StockStore::apply(&db, &loaded, StockAction::Remove)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(db.stock_quantity(stock_id), Some(3));
    }

    #[tokio::test]
    async fn terminal_order_status_never_regresses() {
        let db = InMemoryDatabase::new();
        let (order_id, _) = order_with_one_item(&db).await;

        db.set_order_status(order_id, OrderStatus::Canceled).await.unwrap();
        // Idempotent repeat is fine.
        db.set_order_status(order_id, OrderStatus::Canceled).await.unwrap();
        assert!(db
            .set_order_status(order_id, OrderStatus::Delivery)
            .await
            .is_err());
    }
}
