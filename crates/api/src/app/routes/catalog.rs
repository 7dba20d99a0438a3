//! Item catalog (admin maintenance + public listing).

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;

use mercato_auth::Role;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/add_item", post(add_item))
        .route("/update_item", post(update_item))
}

pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<dto::AddItemRequest>,
) -> axum::response::Response {
    if !auth.has_role(Role::Admin) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", "admin role required");
    }

    match services
        .catalog
        .add_item(&body.name, body.price, body.quantity)
        .await
    {
        Ok(id) => (StatusCode::CREATED, Json(json!({"id": id}))).into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}

pub async fn update_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<dto::UpdateItemRequest>,
) -> axum::response::Response {
    if !auth.has_role(Role::Admin) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", "admin role required");
    }

    match services
        .catalog
        .update_item(body.id, &body.name, body.price)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}

/// Public listing (mounted outside the auth layer).
pub async fn get_items(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.catalog.list_items().await {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(err) => errors::store_error_to_response(err),
    }
}
