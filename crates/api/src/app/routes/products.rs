//! Product stock defaults fed by the external catalog.
//!
//! Rows created lazily for a product start from these values.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use branchstock_auth::Permission;
use branchstock_core::ProductId;
use branchstock_infra::{ProductCatalog, ProductDefaults};

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/:id/stock-defecto", get(get_defaults).put(put_defaults))
}

pub async fn get_defaults(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_READ) {
        return resp;
    }
    let product: ProductId = match errors::parse_id(&id, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.catalog.defaults(product) {
        Some(defaults) => Json(dto::defaults_to_json(product, &defaults)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("product {product} has no defaults")),
    }
}

pub async fn put_defaults(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ProductDefaultsRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_INITIALIZE) {
        return resp;
    }
    let product: ProductId = match errors::parse_id(&id, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if body.stock_inicial < 0 || body.stock_minimo < 0 {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_quantity",
            "stock_inicial and stock_minimo must not be negative",
        );
    }

    let defaults = ProductDefaults {
        initial_stock: body.stock_inicial,
        min_stock: body.stock_minimo,
    };
    services.catalog.upsert(product, defaults);
    tracing::info!(product = %product, initial = defaults.initial_stock, "product stock defaults updated");
    Json(dto::defaults_to_json(product, &defaults)).into_response()
}
