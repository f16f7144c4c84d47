//! Boundary hooks called by the external sale flow.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use branchstock_auth::Permission;
use branchstock_core::{AggregateId, BranchId};
use branchstock_infra::LedgerResult;
use branchstock_inventory::MovementRecord;
use branchstock_sales::SaleId;

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id/stock", post(debit_sale).put(edit_sale))
        .route("/:id/stock/restaurar", post(restore_sale))
}

pub async fn debit_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SaleStockRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::SALES_STOCK) {
        return resp;
    }
    let (sale, branch) = match parse_target(&id, &body.sucursal_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let lines = match dto::to_sale_lines(body.lineas) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    movements_response(services.sales.debit_sale(sale, branch, &lines, principal.user_id()))
}

pub async fn restore_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SaleStockRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::SALES_STOCK) {
        return resp;
    }
    let (sale, branch) = match parse_target(&id, &body.sucursal_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let lines = match dto::to_sale_lines(body.lineas) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    movements_response(services.sales.restore_sale(sale, branch, &lines, principal.user_id()))
}

pub async fn edit_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::EditSaleStockRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::SALES_STOCK) {
        return resp;
    }
    let (sale, branch) = match parse_target(&id, &body.sucursal_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let old = match dto::to_sale_lines(body.anteriores) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let new = match dto::to_sale_lines(body.nuevas) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    movements_response(services.sales.edit_sale(sale, branch, &old, &new, principal.user_id()))
}

fn parse_target(sale: &str, branch: &str) -> Result<(SaleId, BranchId), axum::response::Response> {
    let agg: AggregateId = errors::parse_id(sale, "id")?;
    Ok((SaleId::new(agg), errors::parse_id(branch, "sucursal_id")?))
}

fn movements_response(result: LedgerResult<Vec<MovementRecord>>) -> axum::response::Response {
    match result {
        Ok(records) => Json(serde_json::json!({
            "movimientos": records.iter().map(dto::movement_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
