//! Transfer workflow: the `Transfer` state machine wired to the ledger.
//!
//! Each command runs in one unit of work: the transfer stream is loaded and
//! rehydrated, the aggregate decides, the stock flows implied by its events
//! are applied to both branches and the events are appended with the stream
//! version they were decided on. Either all of it commits or none of it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use branchstock_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, ExpectedVersion, ProductId, UserId};
use branchstock_events::Command;
use branchstock_inventory::{MovementReference, NegativeStockPolicy, StockKey};
use branchstock_transfers::{
    ApproveTransfer, CancelTransfer, RejectTransfer, RequestTransfer, ReturnStock, Transfer, TransferCommand,
    TransferEvent, TransferId, TransferLine, TransferStatus,
};

use crate::error::{LedgerResult, StoreError};
use crate::store::{LedgerBackend, StoredEvent};
use crate::uow::{LedgerContext, LedgerTx};

/// Aggregate type of transfer streams.
pub const TRANSFER_AGGREGATE: &str = "transfer";

/// One requested line with its return progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferLineView {
    pub product_id: ProductId,
    pub quantity: i64,
    pub returned: i64,
    pub remaining: i64,
}

/// Read model of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferView {
    pub id: TransferId,
    pub origin: BranchId,
    pub destination: BranchId,
    pub status: TransferStatus,
    pub reason: String,
    pub lines: Vec<TransferLineView>,
    pub requested_by: Option<UserId>,
    pub approved_by: Option<UserId>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<UserId>,
    pub requested_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub fully_returned: bool,
    pub version: u64,
}

impl From<&Transfer> for TransferView {
    fn from(t: &Transfer) -> Self {
        Self {
            id: t.id_typed(),
            origin: t.origin(),
            destination: t.destination(),
            status: t.status(),
            reason: t.reason().to_string(),
            lines: t
                .lines()
                .iter()
                .map(|l| TransferLineView {
                    product_id: l.product_id,
                    quantity: l.quantity,
                    returned: t.returned_of(l.product_id),
                    remaining: t.remaining_of(l.product_id),
                })
                .collect(),
            requested_by: t.requested_by(),
            approved_by: t.approved_by(),
            rejection_reason: t.rejection_reason().map(str::to_string),
            cancellation_reason: t.cancellation_reason().map(str::to_string),
            cancelled_by: t.cancelled_by(),
            requested_at: t.requested_at(),
            resolved_at: t.resolved_at(),
            cancelled_at: t.cancelled_at(),
            fully_returned: t.is_fully_returned(),
            version: t.version(),
        }
    }
}

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferFilter {
    /// Origin or destination.
    pub branch_id: Option<BranchId>,
    pub status: Option<TransferStatus>,
}

#[derive(Debug, Clone)]
pub struct TransferWorkflow {
    ctx: LedgerContext,
}

impl TransferWorkflow {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Create a pending transfer (*crear*). No ledger effect.
    ///
    /// Requested quantities are checked against the origin balance at request
    /// time only; approval re-checks for real.
    #[instrument(skip_all, fields(origin = %origin, destination = %destination, lines = lines.len()))]
    pub fn request(
        &self,
        origin: BranchId,
        destination: BranchId,
        lines: Vec<TransferLine>,
        reason: &str,
        actor: UserId,
    ) -> LedgerResult<TransferView> {
        let id = TransferId::new(AggregateId::new());

        let committed = self
            .ctx
            .transact(actor, |tx| {
                let mut available = BTreeMap::new();
                for line in &lines {
                    available.insert(line.product_id, tx.balance(StockKey::new(origin, line.product_id))?);
                }

                let command = TransferCommand::Request(RequestTransfer {
                    transfer_id: id,
                    origin,
                    destination,
                    lines: lines.clone(),
                    reason: reason.to_string(),
                    requested_by: actor,
                    available,
                    occurred_at: Utc::now(),
                });

                let mut transfer = Transfer::empty(id);
                let events = transfer.handle(&command)?;
                tx.append_events(id.0, TRANSFER_AGGREGATE, ExpectedVersion::NoStream, &events)?;
                for ev in &events {
                    transfer.apply(ev);
                }
                Ok(transfer)
            })
            .inspect_err(|e| warn!(error = %e, "transfer request rejected"))?;

        info!(transfer = %id, "transfer requested");
        Ok(TransferView::from(&committed.value))
    }

    /// Approve (*aprobar*): debit origin, credit destination, all lines at once.
    #[instrument(skip_all, fields(transfer = %id))]
    pub fn approve(&self, id: TransferId, actor: UserId) -> LedgerResult<TransferView> {
        self.run(
            actor,
            TransferCommand::Approve(ApproveTransfer {
                transfer_id: id,
                approved_by: actor,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Reject (*rechazar*). No ledger effect.
    #[instrument(skip_all, fields(transfer = %id))]
    pub fn reject(&self, id: TransferId, reason: &str, actor: UserId) -> LedgerResult<TransferView> {
        self.run(
            actor,
            TransferCommand::Reject(RejectTransfer {
                transfer_id: id,
                reason: reason.to_string(),
                rejected_by: actor,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Partial return (*devolver*): credit origin, debit destination.
    #[instrument(skip_all, fields(transfer = %id, lines = returns.len()))]
    pub fn return_stock(&self, id: TransferId, returns: Vec<TransferLine>, actor: UserId) -> LedgerResult<TransferView> {
        self.run(
            actor,
            TransferCommand::Return(ReturnStock {
                transfer_id: id,
                returns,
                returned_by: actor,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Cancel (*cancelar*): reverse whatever was not returned yet.
    #[instrument(skip_all, fields(transfer = %id))]
    pub fn cancel(&self, id: TransferId, reason: &str, actor: UserId) -> LedgerResult<TransferView> {
        self.run(
            actor,
            TransferCommand::Cancel(CancelTransfer {
                transfer_id: id,
                reason: reason.to_string(),
                cancelled_by: actor,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn get(&self, id: TransferId) -> LedgerResult<TransferView> {
        let (transfer, _) = load_transfer(self.ctx.backend(), id)?;
        if !transfer.exists() {
            return Err(DomainError::not_found(format!("transfer {id}")).into());
        }
        Ok(TransferView::from(&transfer))
    }

    /// Newest first, in commit order of the requests.
    pub fn list(&self, filter: TransferFilter) -> LedgerResult<Vec<TransferView>> {
        let backend = self.ctx.backend();
        let mut out = Vec::new();

        for aggregate_id in backend.stream_ids(TRANSFER_AGGREGATE)?.into_iter().rev() {
            let (transfer, _) = load_transfer(backend, TransferId::new(aggregate_id))?;
            let branch_ok = filter.branch_id.is_none_or(|b| transfer.involves(b));
            let status_ok = filter.status.is_none_or(|s| transfer.status() == s);
            if transfer.exists() && branch_ok && status_ok {
                out.push(TransferView::from(&transfer));
            }
        }

        Ok(out)
    }

    /// Load the command's target stream, decide, move stock and append, as one
    /// unit of work.
    fn run(&self, actor: UserId, command: TransferCommand) -> LedgerResult<TransferView> {
        let id = TransferId::new(command.target_aggregate_id());
        let action = command.action();

        let committed = self
            .ctx
            .transact(actor, |tx| {
                let (mut transfer, version) = load_transfer(tx.backend(), id)?;
                let events = transfer.handle(&command)?;

                for ev in &events {
                    apply_stock_flows(tx, id, ev)?;
                }

                let expected = if version == 0 {
                    ExpectedVersion::NoStream
                } else {
                    ExpectedVersion::Exact(version)
                };
                tx.append_events(id.0, TRANSFER_AGGREGATE, expected, &events)?;

                for ev in &events {
                    transfer.apply(ev);
                }
                Ok(transfer)
            })
            .inspect_err(|e| warn!(action, error = %e, "transfer command rejected"))?;

        info!(
            action,
            status = committed.value.status().as_str(),
            movements = committed.receipt.movements.len(),
            "transfer updated"
        );
        Ok(TransferView::from(&committed.value))
    }
}

fn movement_reason(event: &TransferEvent) -> &'static str {
    match event {
        TransferEvent::Approved(_) => "Transferencia aprobada",
        TransferEvent::StockReturned(_) => "Devolución de transferencia",
        TransferEvent::Cancelled(_) => "Cancelación de transferencia",
        TransferEvent::Requested(_) | TransferEvent::Rejected(_) => "Transferencia",
    }
}

/// Debit the source and credit the target of every flow, reporting the index
/// of the failing line.
fn apply_stock_flows(tx: &mut LedgerTx<'_>, id: TransferId, event: &TransferEvent) -> LedgerResult<()> {
    let reason = movement_reason(event);
    let reference = MovementReference::transfer(id.0);

    for (idx, flow) in event.stock_flows().into_iter().enumerate() {
        tx.adjust(
            StockKey::new(flow.from, flow.product_id),
            -flow.quantity,
            NegativeStockPolicy::Reject,
            reason,
            reference,
        )
        .map_err(|e| e.at_line(idx))?;

        tx.adjust(
            StockKey::new(flow.to, flow.product_id),
            flow.quantity,
            NegativeStockPolicy::Reject,
            reason,
            reference,
        )
        .map_err(|e| e.at_line(idx))?;
    }
    Ok(())
}

/// Rehydrate a transfer from its stream; version 0 means no stream.
fn load_transfer(backend: &dyn LedgerBackend, id: TransferId) -> LedgerResult<(Transfer, u64)> {
    let mut history: Vec<StoredEvent> = backend.load_stream(id.0)?;
    history.sort_by_key(|e| e.sequence_number);

    let mut transfer = Transfer::empty(id);
    let mut last = 0u64;
    for stored in history {
        if stored.sequence_number <= last {
            return Err(StoreError::Serialization(format!(
                "non-monotonic sequence in transfer stream {id} (last={last}, found={})",
                stored.sequence_number
            ))
            .into());
        }
        last = stored.sequence_number;

        let event: TransferEvent =
            serde_json::from_value(stored.payload).map_err(|e| StoreError::Serialization(e.to_string()))?;
        transfer.apply(&event);
    }

    Ok((transfer, last))
}
