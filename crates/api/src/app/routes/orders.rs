//! Order intake and listing.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::error;

use mercato_core::hour_mask::next_delivery_hour;
use mercato_messaging::{IntentStatus, SagaMessage, StockAction};
use mercato_orders::store::NewOrder;
use mercato_orders::types::{OrderItem, OrderStatus};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/create_order", post(create_order))
        .route("/get_orders", get(get_orders))
}

/// Accept an order: validate, persist the order and its removal intents,
/// publish stock(remove, pending). The saga takes it from there.
pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    // Placeholder for the address→slot service: next free wall-clock hour.
    let hour_mask = match next_delivery_hour(&chrono::Local::now()) {
        Ok(mask) => mask,
        Err(err) => return errors::domain_error_to_response(err),
    };

    let items: Vec<OrderItem> = body
        .items
        .iter()
        .map(|i| OrderItem {
            item_id: i.id,
            quantity: i.quantity,
        })
        .collect();

    let order_id = match services
        .saga
        .create_order(
            auth.user_id(),
            NewOrder {
                items,
                address: body.address,
                hour_mask,
            },
        )
        .await
    {
        Ok(id) => id,
        Err(err) => return errors::store_error_to_response(err),
    };

    let stock_change_ids = match services.saga.create_stock_changes(order_id).await {
        Ok(ids) => ids,
        Err(err) => {
            error!(%err, %order_id, "create stock_changes failed, rejecting order");
            if let Err(cancel_err) = services
                .saga
                .set_order_status(order_id, OrderStatus::Canceled)
                .await
            {
                error!(%cancel_err, %order_id, "failed to reject order");
            }
            return errors::store_error_to_response(err);
        }
    };

    services
        .stock_commands
        .push(SagaMessage {
            payment_id: None,
            order_id,
            stock_change_ids,
            cour_reservation_id: None,
            action: StockAction::Remove,
            status: IntentStatus::Pending,
            retry_count: 0,
        })
        .await;

    (
        StatusCode::CREATED,
        Json(dto::CreateOrderResponse { id: order_id }),
    )
        .into_response()
}

pub async fn get_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
) -> axum::response::Response {
    match services.saga.orders_by_user(auth.user_id()).await {
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}
