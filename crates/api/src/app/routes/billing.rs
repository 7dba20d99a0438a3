//! Account and payment queries.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/create_account", post(create_account))
        .route("/get_balance", get(get_balance))
        .route("/add_money", post(add_money))
        .route("/get_payments", post(get_payments))
}

pub async fn create_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
) -> axum::response::Response {
    match services.billing.create_account(auth.user_id()).await {
        Ok(id) => (StatusCode::CREATED, Json(json!({"id": id}))).into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
) -> axum::response::Response {
    match services.billing.balance(auth.user_id()).await {
        Ok(balance) => {
            (StatusCode::OK, Json(dto::BalanceResponse { balance })).into_response()
        }
        Err(err) => errors::store_error_to_response(err),
    }
}

pub async fn add_money(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<dto::AddMoneyRequest>,
) -> axum::response::Response {
    match services.billing.add_money(auth.user_id(), body.amount).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}

pub async fn get_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ByOrderRequest>,
) -> axum::response::Response {
    match services.billing.payments_by_order(body.order_id).await {
        Ok(payments) => (StatusCode::OK, Json(payments)).into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}
