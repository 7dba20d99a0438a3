use axum::Router;

pub mod billing;
pub mod catalog;
pub mod delivery;
pub mod notifications;
pub mod orders;
pub mod system;

/// Protected routes (bearer token required).
pub fn router() -> Router {
    Router::new()
        .merge(orders::router())
        .merge(billing::router())
        .merge(catalog::router())
        .merge(delivery::router())
        .merge(notifications::router())
}
