//! Per-user notification history.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new().route("/get_notifications", get(get_notifications))
}

pub async fn get_notifications(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
) -> axum::response::Response {
    match services.notifications.by_user(auth.user_id()).await {
        Ok(messages) => (StatusCode::OK, Json(messages)).into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}
