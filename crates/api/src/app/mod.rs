//! HTTP application wiring (axum router + services).
//!
//! - `services.rs`: store/bus wiring, processor spawning
//! - `routes/`: handlers, one file per domain area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use mercato_auth::Hs256JwtValidator;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, Runtime};

/// Build the full router. Mutating routes sit behind bearer auth;
/// `/health` and the catalog listing stay public.
pub fn build_app(services: Arc<AppServices>, jwt_secret: &[u8]) -> Router {
    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret));
    let auth_state = middleware::AuthState { jwt };

    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/get_items", get(routes::catalog::get_items))
        .layer(Extension(services))
        .merge(protected)
}
