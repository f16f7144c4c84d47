use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use branchstock_auth::Permission;
use branchstock_core::{AggregateId, BranchId};
use branchstock_infra::{LedgerResult, TransferFilter, TransferView};
use branchstock_transfers::{TransferId, TransferStatus};

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_transfer).get(list_transfers))
        .route("/:id", get(get_transfer))
        .route("/:id/estado", put(update_status))
        .route("/:id/devolver", post(return_stock))
        .route("/:id/cancelar", post(cancel_transfer))
}

pub async fn create_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateTransferRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::TRANSFERS_CREATE) {
        return resp;
    }

    let origin: BranchId = match errors::parse_id(&body.origen, "origen") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let destination: BranchId = match errors::parse_id(&body.destino, "destino") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let lines = match dto::to_transfer_lines(body.productos) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .transfers
        .request(origin, destination, lines, &body.motivo, principal.user_id())
    {
        Ok(view) => (StatusCode::CREATED, Json(dto::transfer_to_json(&view))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_transfers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(q): Query<dto::TransfersQuery>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::TRANSFERS_READ) {
        return resp;
    }

    let branch_id = match q.sucursal_id.as_deref().map(|s| errors::parse_id(s, "sucursal_id")).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match q.estado.as_deref().map(parse_status).transpose() {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.transfers.list(TransferFilter { branch_id, status }) {
        Ok(views) => Json(views.iter().map(dto::transfer_to_json).collect::<Vec<_>>()).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::TRANSFERS_READ) {
        return resp;
    }
    let id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    view_response(services.transfers.get(id))
}

/// Resolve a pending transfer: `aprobada` or `rechazada` (with `motivo`).
pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateTransferStatusRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::TRANSFERS_RESOLVE) {
        return resp;
    }
    let id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = match parse_status(&body.estado) {
        Ok(TransferStatus::Approved) => services.transfers.approve(id, principal.user_id()),
        Ok(TransferStatus::Rejected) => {
            let reason = body.motivo.unwrap_or_default();
            services.transfers.reject(id, &reason, principal.user_id())
        }
        Ok(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_status",
                "estado must be 'aprobada' or 'rechazada'",
            );
        }
        Err(resp) => return resp,
    };

    view_response(result)
}

pub async fn return_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReturnStockRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::TRANSFERS_RETURN) {
        return resp;
    }
    let id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let returns = match dto::to_transfer_lines(body.devoluciones) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    view_response(services.transfers.return_stock(id, returns, principal.user_id()))
}

pub async fn cancel_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelTransferRequest>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, Permission::TRANSFERS_CANCEL) {
        return resp;
    }
    let id = match parse_transfer_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    view_response(services.transfers.cancel(id, &body.motivo, principal.user_id()))
}

fn parse_transfer_id(raw: &str) -> Result<TransferId, axum::response::Response> {
    let agg: AggregateId = errors::parse_id(raw, "id")?;
    Ok(TransferId::new(agg))
}

fn parse_status(raw: &str) -> Result<TransferStatus, axum::response::Response> {
    raw.trim()
        .to_lowercase()
        .parse()
        .map_err(|e: branchstock_core::DomainError| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", e.to_string())
        })
}

fn view_response(result: LedgerResult<TransferView>) -> axum::response::Response {
    match result {
        Ok(view) => Json(dto::transfer_to_json(&view)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
