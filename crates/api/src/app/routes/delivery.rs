//! Courier surface: work application, schedules, reservations, delivery
//! confirmations.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::warn;

use mercato_auth::Role;
use mercato_core::HourMask;
use mercato_orders::types::OrderStatus;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/apply_work", post(apply_work))
        .route("/create_schedule", post(create_schedule))
        .route("/get_courier_reservations", post(get_courier_reservations))
        .route("/confirm_delivery", post(confirm_delivery))
        .route("/confirm_delivered", post(confirm_delivered))
}

/// Register the calling user as a courier.
pub async fn apply_work(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
) -> axum::response::Response {
    match services.delivery.create_courier(auth.user_id()).await {
        Ok(id) => (StatusCode::CREATED, Json(json!({"id": id}))).into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}

pub async fn create_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<dto::CreateScheduleRequest>,
) -> axum::response::Response {
    if !auth.has_role(Role::Courier) {
        return errors::forbidden();
    }

    match services
        .delivery
        .create_schedule_today(auth.user_id(), HourMask::new(body.hour_mask))
        .await
    {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}

pub async fn get_courier_reservations(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ByOrderRequest>,
) -> axum::response::Response {
    match services.delivery.reservations_by_order(body.order_id).await {
        Ok(reservations) => (StatusCode::OK, Json(reservations)).into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}

pub async fn confirm_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<dto::ByOrderRequest>,
) -> axum::response::Response {
    confirm(services, auth, body, OrderStatus::Delivery).await
}

pub async fn confirm_delivered(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<dto::ByOrderRequest>,
) -> axum::response::Response {
    confirm(services, auth, body, OrderStatus::Delivered).await
}

async fn confirm(
    services: Arc<AppServices>,
    auth: AuthContext,
    body: dto::ByOrderRequest,
    next: OrderStatus,
) -> axum::response::Response {
    if !auth.has_role(Role::Courier) {
        return errors::forbidden();
    }

    let result = match next {
        OrderStatus::Delivered => {
            services
                .delivery
                .confirm_delivered(auth.user_id(), body.order_id)
                .await
        }
        _ => {
            services
                .delivery
                .confirm_delivery(auth.user_id(), body.order_id)
                .await
        }
    };

    if let Err(err) = result {
        return errors::store_error_to_response(err);
    }

    // Courier confirmations notify the customer like saga transitions do.
    match services.saga.order_user(body.order_id).await {
        Ok(user_id) => {
            services
                .notifier
                .order_status(user_id, body.order_id, next.as_str())
                .await;
        }
        Err(err) => warn!(%err, order_id = %body.order_id, "cannot notify: order user lookup failed"),
    }

    StatusCode::OK.into_response()
}
