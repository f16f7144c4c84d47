use serde::Deserialize;

use branchstock_core::ProductId;
use branchstock_infra::{MovementPage, ProductDefaults, Reconciliation, TransferView};
use branchstock_inventory::{InitialStock, MovementRecord, StockEntry};
use branchstock_sales::SaleLine;
use branchstock_transfers::TransferLine;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    pub sucursal_id: Option<String>,
    pub producto_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BranchQuery {
    pub sucursal_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    pub sucursal_id: String,
    pub producto_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MovementsQuery {
    pub sucursal_id: Option<String>,
    pub producto_id: Option<String>,
    pub referencia_tipo: Option<String>,
    pub referencia_id: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub sucursal_id: String,
    pub producto_id: String,
    pub ajuste: i64,
    pub motivo: String,
}

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub sucursal_id: String,
    pub producto_id: String,
    pub cantidad: i64,
    pub motivo: String,
}

#[derive(Debug, Deserialize)]
pub struct SetMinimumRequest {
    pub sucursal_id: String,
    pub producto_id: String,
    pub stock_minimo: i64,
}

#[derive(Debug, Deserialize)]
pub struct InitialStockRequest {
    pub producto_id: String,
    pub cantidad: i64,
    #[serde(default)]
    pub stock_minimo: i64,
}

#[derive(Debug, Deserialize)]
pub struct InitializeBranchRequest {
    pub sucursal_id: String,
    pub productos: Vec<InitialStockRequest>,
}

#[derive(Debug, Deserialize)]
pub struct LineRequest {
    pub producto_id: String,
    pub cantidad: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub origen: String,
    pub destino: String,
    pub productos: Vec<LineRequest>,
    #[serde(default)]
    pub motivo: String,
}

#[derive(Debug, Deserialize)]
pub struct TransfersQuery {
    pub sucursal_id: Option<String>,
    pub estado: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTransferStatusRequest {
    pub estado: String,
    pub motivo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnStockRequest {
    pub devoluciones: Vec<LineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CancelTransferRequest {
    #[serde(default)]
    pub motivo: String,
}

#[derive(Debug, Deserialize)]
pub struct SaleStockRequest {
    pub sucursal_id: String,
    /// On `restaurar`, an empty list credits back everything still debited.
    #[serde(default)]
    pub lineas: Vec<LineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct EditSaleStockRequest {
    pub sucursal_id: String,
    pub anteriores: Vec<LineRequest>,
    pub nuevas: Vec<LineRequest>,
}

// -------------------------
// Request mapping helpers
// -------------------------

fn parse_lines<T>(
    lines: Vec<LineRequest>,
    make: impl Fn(ProductId, i64) -> T,
) -> Result<Vec<T>, axum::response::Response> {
    let mut out = Vec::with_capacity(lines.len());
    for l in lines {
        let product_id: ProductId = errors::parse_id(&l.producto_id, "producto_id")?;
        out.push(make(product_id, l.cantidad));
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
pub struct ProductDefaultsRequest {
    #[serde(default)]
    pub stock_inicial: i64,
    #[serde(default)]
    pub stock_minimo: i64,
}

pub fn to_transfer_lines(lines: Vec<LineRequest>) -> Result<Vec<TransferLine>, axum::response::Response> {
    parse_lines(lines, |product_id, quantity| TransferLine { product_id, quantity })
}

pub fn to_sale_lines(lines: Vec<LineRequest>) -> Result<Vec<SaleLine>, axum::response::Response> {
    parse_lines(lines, SaleLine::new)
}

pub fn to_initial_stock(items: Vec<InitialStockRequest>) -> Result<Vec<InitialStock>, axum::response::Response> {
    let mut out = Vec::with_capacity(items.len());
    for i in items {
        out.push(InitialStock {
            product_id: errors::parse_id(&i.producto_id, "producto_id")?,
            quantity: i.cantidad,
            min_stock: i.stock_minimo,
        });
    }
    Ok(out)
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn stock_entry_to_json(e: &StockEntry) -> serde_json::Value {
    serde_json::json!({
        "sucursal_id": e.branch_id.to_string(),
        "producto_id": e.product_id.to_string(),
        "cantidad": e.quantity,
        "stock_minimo": e.min_stock,
        "bajo_minimo": e.is_low(),
        "actualizado_en": e.updated_at.to_rfc3339(),
        "version": e.version,
    })
}

pub fn movement_to_json(m: &MovementRecord) -> serde_json::Value {
    serde_json::json!({
        "id": m.id.to_string(),
        "secuencia": m.sequence,
        "sucursal_id": m.branch_id.to_string(),
        "producto_id": m.product_id.to_string(),
        "tipo": m.kind.as_str(),
        "cantidad": m.quantity,
        "stock_anterior": m.previous_stock,
        "stock_nuevo": m.new_stock,
        "motivo": m.reason,
        "referencia_tipo": m.reference.kind.as_str(),
        "referencia_id": m.reference.id.map(|id| id.to_string()),
        "fecha": m.occurred_at.to_rfc3339(),
        "usuario_id": m.user_id.to_string(),
    })
}

pub fn movement_page_to_json(page: &MovementPage) -> serde_json::Value {
    serde_json::json!({
        "movimientos": page.records.iter().map(movement_to_json).collect::<Vec<_>>(),
        "total": page.total,
        "limit": page.pagination.limit,
        "offset": page.pagination.offset,
        "has_more": page.has_more,
    })
}

pub fn reconciliation_to_json(r: &Reconciliation) -> serde_json::Value {
    serde_json::json!({
        "sucursal_id": r.branch_id.to_string(),
        "producto_id": r.product_id.to_string(),
        "cantidad": r.balance,
        "cantidad_reconstruida": r.replayed,
        "movimientos": r.movements,
        "consistente": r.is_consistent(),
    })
}

pub fn transfer_to_json(t: &TransferView) -> serde_json::Value {
    serde_json::json!({
        "id": t.id.to_string(),
        "sucursal_origen_id": t.origin.to_string(),
        "sucursal_destino_id": t.destination.to_string(),
        "estado": t.status.as_str(),
        "motivo": t.reason,
        "productos": t.lines.iter().map(|l| serde_json::json!({
            "producto_id": l.product_id.to_string(),
            "cantidad": l.quantity,
            "devuelto": l.returned,
            "pendiente": l.remaining,
        })).collect::<Vec<_>>(),
        "usuario_solicita_id": t.requested_by.map(|u| u.to_string()),
        "usuario_aprueba_id": t.approved_by.map(|u| u.to_string()),
        "motivo_rechazo": t.rejection_reason,
        "motivo_cancelacion": t.cancellation_reason,
        "usuario_cancela_id": t.cancelled_by.map(|u| u.to_string()),
        "fecha_solicitud": t.requested_at.map(|d| d.to_rfc3339()),
        "fecha_resolucion": t.resolved_at.map(|d| d.to_rfc3339()),
        "fecha_cancelacion": t.cancelled_at.map(|d| d.to_rfc3339()),
        "completamente_devuelta": t.fully_returned,
        "version": t.version,
    })
}

pub fn defaults_to_json(product_id: ProductId, d: &ProductDefaults) -> serde_json::Value {
    serde_json::json!({
        "producto_id": product_id.to_string(),
        "stock_inicial": d.initial_stock,
        "stock_minimo": d.min_stock,
    })
}
