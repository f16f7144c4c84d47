use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use branchstock_auth::Permission;
use branchstock_core::{AggregateId, BranchId, ProductId};
use branchstock_infra::MovementFilter;
use branchstock_inventory::{MovementReference, NegativeStockPolicy, ReferenceKind};

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_stock))
        .route("/bajo", get(list_low_stock))
        .route("/ajustar", post(adjust_stock))
        .route("/establecer", post(set_stock))
        .route("/minimo", put(set_minimum))
        .route("/inicializar", post(initialize_branch))
        .route("/movimientos", get(list_movements))
        .route("/reconciliar", get(reconcile))
}

/// `?sucursal_id=` lists a branch, `?producto_id=` a product across branches,
/// both together return the single pair.
pub async fn list_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::StockQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_READ) {
        return resp;
    }

    let branch: Option<BranchId> = match q.sucursal_id.as_deref().map(|s| errors::parse_id(s, "sucursal_id")).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product: Option<ProductId> = match q.producto_id.as_deref().map(|s| errors::parse_id(s, "producto_id")).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let rows = match (branch, product) {
        (Some(b), Some(p)) => services.ledger.get_entry(b, p).map(|e| e.into_iter().collect()),
        (Some(b), None) => services.ledger.list_by_branch(b),
        (None, Some(p)) => services.ledger.list_by_product(p),
        (None, None) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "missing_filter",
                "sucursal_id or producto_id is required",
            );
        }
    };

    match rows {
        Ok(rows) => Json(rows.iter().map(dto::stock_entry_to_json).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_low_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::BranchQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_READ) {
        return resp;
    }
    let branch: BranchId = match errors::parse_id(&q.sucursal_id, "sucursal_id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.list_low_stock(branch) {
        Ok(rows) => Json(rows.iter().map(dto::stock_entry_to_json).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_ADJUST) {
        return resp;
    }
    let (branch, product) = match parse_pair(&body.sucursal_id, &body.producto_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.adjust_relative(
        branch,
        product,
        body.ajuste,
        &body.motivo,
        principal.user_id(),
        NegativeStockPolicy::Reject,
    ) {
        Ok(record) => movement_result(record, &services, branch, product),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn set_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::SetStockRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_ADJUST) {
        return resp;
    }
    let (branch, product) = match parse_pair(&body.sucursal_id, &body.producto_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .ledger
        .set_absolute(branch, product, body.cantidad, &body.motivo, principal.user_id())
    {
        Ok(record) => movement_result(record, &services, branch, product),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn set_minimum(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::SetMinimumRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_ADJUST) {
        return resp;
    }
    let (branch, product) = match parse_pair(&body.sucursal_id, &body.producto_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .ledger
        .set_minimum(branch, product, body.stock_minimo, principal.user_id())
    {
        Ok(entry) => Json(dto::stock_entry_to_json(&entry)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn initialize_branch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::InitializeBranchRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_INITIALIZE) {
        return resp;
    }
    let branch: BranchId = match errors::parse_id(&body.sucursal_id, "sucursal_id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let items = match dto::to_initial_stock(body.productos) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.initialize_branch(branch, &items, principal.user_id()) {
        Ok(created) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "sucursal_id": branch.to_string(),
                "creados": created,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::MovementsQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_READ) {
        return resp;
    }

    let filter = match movement_filter(&q) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match services.journal.query(filter, q.limit, q.offset) {
        Ok(page) => Json(dto::movement_page_to_json(&page)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn reconcile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::PairQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::STOCK_READ) {
        return resp;
    }
    let (branch, product) = match parse_pair(&q.sucursal_id, &q.producto_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.journal.verify(branch, product) {
        Ok(check) => {
            if !check.is_consistent() {
                tracing::error!(
                    branch = %branch,
                    product = %product,
                    balance = check.balance,
                    replayed = check.replayed,
                    "journal does not explain stored balance"
                );
            }
            Json(dto::reconciliation_to_json(&check)).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

fn parse_pair(branch: &str, product: &str) -> Result<(BranchId, ProductId), axum::response::Response> {
    Ok((
        errors::parse_id(branch, "sucursal_id")?,
        errors::parse_id(product, "producto_id")?,
    ))
}

fn movement_filter(q: &dto::MovementsQuery) -> Result<MovementFilter, axum::response::Response> {
    let branch_id = q
        .sucursal_id
        .as_deref()
        .map(|s| errors::parse_id(s, "sucursal_id"))
        .transpose()?;
    let product_id = q
        .producto_id
        .as_deref()
        .map(|s| errors::parse_id(s, "producto_id"))
        .transpose()?;

    let reference = match q.referencia_tipo.as_deref() {
        None if q.referencia_id.is_some() => {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_reference",
                "referencia_id requires referencia_tipo",
            ));
        }
        None => None,
        Some(raw) => {
            let kind: ReferenceKind = raw
                .parse()
                .map_err(|e: String| errors::json_error(StatusCode::BAD_REQUEST, "invalid_reference", e))?;
            let id: Option<AggregateId> = q
                .referencia_id
                .as_deref()
                .map(|s| errors::parse_id(s, "referencia_id"))
                .transpose()?;
            Some(MovementReference { kind, id })
        }
    };

    Ok(MovementFilter {
        branch_id,
        product_id,
        reference,
    })
}

/// The committed record, or the unchanged balance when nothing moved.
fn movement_result(
    record: Option<branchstock_inventory::MovementRecord>,
    services: &AppServices,
    branch: BranchId,
    product: ProductId,
) -> axum::response::Response {
    match record {
        Some(r) => Json(serde_json::json!({
            "movimiento": dto::movement_to_json(&r),
            "cantidad": r.new_stock,
        }))
        .into_response(),
        None => match services.ledger.get_balance(branch, product) {
            Ok(quantity) => Json(serde_json::json!({
                "movimiento": serde_json::Value::Null,
                "cantidad": quantity,
            }))
            .into_response(),
            Err(e) => errors::ledger_error_to_response(e),
        },
    }
}
