//! Request/response bodies.

use serde::{Deserialize, Serialize};

use mercato_core::{ItemId, OrderId};

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub id: ItemId,
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub id: OrderId,
}

#[derive(Debug, Deserialize)]
pub struct ByOrderRequest {
    pub order_id: OrderId,
}

#[derive(Debug, Deserialize)]
pub struct AddMoneyRequest {
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: f64,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub id: ItemId,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub hour_mask: u32,
}
