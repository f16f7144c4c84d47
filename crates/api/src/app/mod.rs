//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger wiring (backend selection, bus, catalog, SSE fan-out)
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router on the in-memory ledger with default settings.
pub async fn build_app(jwt_secret: String) -> Router {
    let config = AppConfig::with_jwt_secret(jwt_secret);
    let services = services::build_in_memory_services(&config.ledger);
    router(&config, services)
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// # Errors
///
/// Fails when persistent storage is configured but cannot be reached.
pub async fn build_app_with_config(config: &AppConfig) -> anyhow::Result<Router> {
    let services = services::build_services(config).await?;
    Ok(router(config, services))
}

fn router(config: &AppConfig, services: services::AppServices) -> Router {
    let jwt = Arc::new(branchstock_auth::Hs256JwtValidator::new(config.jwt.secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services);

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
