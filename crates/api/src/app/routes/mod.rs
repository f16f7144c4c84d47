use axum::{Router, routing::get};

pub mod common;
pub mod products;
pub mod sales;
pub mod stock;
pub mod system;
pub mod transfers;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/stock", stock::router())
        .nest("/transferencias", transfers::router())
        .nest("/ventas", sales::router())
        .nest("/productos", products::router())
}
