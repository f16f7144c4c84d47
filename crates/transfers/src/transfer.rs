use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchstock_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, ProductId, UserId};
use branchstock_events::{Command, Event};

/// Transfer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub AggregateId);

impl TransferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Transfer lifecycle (*estado*).
///
/// `Pending → Approved | Rejected`, `Approved → Cancelled`. Partial returns
/// happen while `Approved` and do not change the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "aprobada")]
    Approved,
    #[serde(rename = "rechazada")]
    Rejected,
    #[serde(rename = "cancelada")]
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pendiente",
            TransferStatus::Approved => "aprobada",
            TransferStatus::Rejected => "rechazada",
            TransferStatus::Cancelled => "cancelada",
        }
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransferStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pendiente" => Ok(TransferStatus::Pending),
            "aprobada" => Ok(TransferStatus::Approved),
            "rechazada" => Ok(TransferStatus::Rejected),
            "cancelada" => Ok(TransferStatus::Cancelled),
            other => Err(DomainError::invalid_id(format!("unknown transfer status '{other}'"))),
        }
    }
}

/// A product and a quantity (requested, returned or reversed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Stock that must move between two branches as a consequence of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockFlow {
    pub from: BranchId,
    pub to: BranchId,
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Aggregate root: Transfer (*transferencia*).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    id: TransferId,
    origin: BranchId,
    destination: BranchId,
    lines: Vec<TransferLine>,
    status: TransferStatus,
    reason: String,
    requested_by: Option<UserId>,
    approved_by: Option<UserId>,
    rejection_reason: Option<String>,
    cancellation_reason: Option<String>,
    cancelled_by: Option<UserId>,
    returned: BTreeMap<ProductId, i64>,
    requested_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Transfer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            origin: BranchId::from_uuid(Default::default()),
            destination: BranchId::from_uuid(Default::default()),
            lines: Vec::new(),
            status: TransferStatus::Pending,
            reason: String::new(),
            requested_by: None,
            approved_by: None,
            rejection_reason: None,
            cancellation_reason: None,
            cancelled_by: None,
            returned: BTreeMap::new(),
            requested_at: None,
            resolved_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn origin(&self) -> BranchId {
        self.origin
    }

    pub fn destination(&self) -> BranchId {
        self.destination
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn cancelled_by(&self) -> Option<UserId> {
        self.cancelled_by
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    /// Cumulative returned quantity per product (*devueltos*).
    pub fn returned(&self) -> &BTreeMap<ProductId, i64> {
        &self.returned
    }

    pub fn returned_of(&self, product_id: ProductId) -> i64 {
        self.returned.get(&product_id).copied().unwrap_or(0)
    }

    pub fn transferred_of(&self, product_id: ProductId) -> Option<i64> {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map(|l| l.quantity)
    }

    /// Transferred minus already returned, per product.
    pub fn remaining_of(&self, product_id: ProductId) -> i64 {
        self.transferred_of(product_id).unwrap_or(0) - self.returned_of(product_id)
    }

    /// Every line has been returned in full. Informational only: the status
    /// stays `Approved`.
    pub fn is_fully_returned(&self) -> bool {
        self.status == TransferStatus::Approved
            && self.lines.iter().all(|l| self.remaining_of(l.product_id) == 0)
    }

    /// Whether the branch is the origin or the destination.
    pub fn involves(&self, branch_id: BranchId) -> bool {
        self.origin == branch_id || self.destination == branch_id
    }
}

impl AggregateRoot for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestTransfer (*crear*).
///
/// `available` is the origin's balance per product at request time, read by
/// the caller; it backs the soft check (the real debit happens on approval).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransfer {
    pub transfer_id: TransferId,
    pub origin: BranchId,
    pub destination: BranchId,
    pub lines: Vec<TransferLine>,
    pub reason: String,
    pub requested_by: UserId,
    pub available: BTreeMap<ProductId, i64>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveTransfer (*aprobar*).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveTransfer {
    pub transfer_id: TransferId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectTransfer (*rechazar*).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectTransfer {
    pub transfer_id: TransferId,
    pub reason: String,
    pub rejected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnStock (*devolver*).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStock {
    pub transfer_id: TransferId,
    pub returns: Vec<TransferLine>,
    pub returned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer (*cancelar*).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub transfer_id: TransferId,
    pub reason: String,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    Request(RequestTransfer),
    Approve(ApproveTransfer),
    Reject(RejectTransfer),
    Return(ReturnStock),
    Cancel(CancelTransfer),
}

impl TransferCommand {
    pub fn transfer_id(&self) -> TransferId {
        match self {
            TransferCommand::Request(c) => c.transfer_id,
            TransferCommand::Approve(c) => c.transfer_id,
            TransferCommand::Reject(c) => c.transfer_id,
            TransferCommand::Return(c) => c.transfer_id,
            TransferCommand::Cancel(c) => c.transfer_id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            TransferCommand::Request(_) => "request",
            TransferCommand::Approve(_) => "approve",
            TransferCommand::Reject(_) => "reject",
            TransferCommand::Return(_) => "return stock of",
            TransferCommand::Cancel(_) => "cancel",
        }
    }
}

impl Command for TransferCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        self.transfer_id().0
    }
}

/// Event: TransferRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequested {
    pub transfer_id: TransferId,
    pub origin: BranchId,
    pub destination: BranchId,
    pub lines: Vec<TransferLine>,
    pub reason: String,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferApproved. `lines` is the stock moved origin → destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub transfer_id: TransferId,
    pub origin: BranchId,
    pub destination: BranchId,
    pub lines: Vec<TransferLine>,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRejected {
    pub transfer_id: TransferId,
    pub reason: String,
    pub rejected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferStockReturned. `returns` moves destination → origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStockReturned {
    pub transfer_id: TransferId,
    pub origin: BranchId,
    pub destination: BranchId,
    pub returns: Vec<TransferLine>,
    pub returned_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled. `reversed` holds the remaining quantity per line
/// that moves back destination → origin; fully returned lines are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub transfer_id: TransferId,
    pub origin: BranchId,
    pub destination: BranchId,
    pub reversed: Vec<TransferLine>,
    pub reason: String,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    Requested(TransferRequested),
    Approved(TransferApproved),
    Rejected(TransferRejected),
    StockReturned(TransferStockReturned),
    Cancelled(TransferCancelled),
}

impl TransferEvent {
    /// Stock that must move for this event, in line order.
    pub fn stock_flows(&self) -> Vec<StockFlow> {
        let flows = |from: BranchId, to: BranchId, lines: &[TransferLine]| {
            lines
                .iter()
                .map(|l| StockFlow {
                    from,
                    to,
                    product_id: l.product_id,
                    quantity: l.quantity,
                })
                .collect()
        };

        match self {
            TransferEvent::Approved(e) => flows(e.origin, e.destination, &e.lines),
            TransferEvent::StockReturned(e) => flows(e.destination, e.origin, &e.returns),
            TransferEvent::Cancelled(e) => flows(e.destination, e.origin, &e.reversed),
            TransferEvent::Requested(_) | TransferEvent::Rejected(_) => Vec::new(),
        }
    }

    /// Actor responsible for the event.
    pub fn actor(&self) -> UserId {
        match self {
            TransferEvent::Requested(e) => e.requested_by,
            TransferEvent::Approved(e) => e.approved_by,
            TransferEvent::Rejected(e) => e.rejected_by,
            TransferEvent::StockReturned(e) => e.returned_by,
            TransferEvent::Cancelled(e) => e.cancelled_by,
        }
    }
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Requested(_) => "transfer.requested",
            TransferEvent::Approved(_) => "transfer.approved",
            TransferEvent::Rejected(_) => "transfer.rejected",
            TransferEvent::StockReturned(_) => "transfer.stock_returned",
            TransferEvent::Cancelled(_) => "transfer.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Requested(e) => e.occurred_at,
            TransferEvent::Approved(e) => e.occurred_at,
            TransferEvent::Rejected(e) => e.occurred_at,
            TransferEvent::StockReturned(e) => e.occurred_at,
            TransferEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::Requested(e) => {
                self.id = e.transfer_id;
                self.origin = e.origin;
                self.destination = e.destination;
                self.lines = e.lines.clone();
                self.status = TransferStatus::Pending;
                self.reason = e.reason.clone();
                self.requested_by = Some(e.requested_by);
                self.requested_at = Some(e.occurred_at);
                self.returned.clear();
                self.created = true;
            }
            TransferEvent::Approved(e) => {
                self.status = TransferStatus::Approved;
                self.approved_by = Some(e.approved_by);
                self.resolved_at = Some(e.occurred_at);
            }
            TransferEvent::Rejected(e) => {
                self.status = TransferStatus::Rejected;
                self.approved_by = Some(e.rejected_by);
                self.rejection_reason = Some(e.reason.clone());
                self.resolved_at = Some(e.occurred_at);
            }
            TransferEvent::StockReturned(e) => {
                for r in &e.returns {
                    *self.returned.entry(r.product_id).or_insert(0) += r.quantity;
                }
            }
            TransferEvent::Cancelled(e) => {
                self.status = TransferStatus::Cancelled;
                self.cancellation_reason = Some(e.reason.clone());
                self.cancelled_by = Some(e.cancelled_by);
                self.cancelled_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let existing = || self.ensure_exists(command.transfer_id());

        match command {
            TransferCommand::Request(cmd) => self.handle_request(cmd),
            TransferCommand::Approve(cmd) => {
                existing()?;
                self.handle_approve(cmd)
            }
            TransferCommand::Reject(cmd) => {
                existing()?;
                self.handle_reject(cmd)
            }
            TransferCommand::Return(cmd) => {
                existing()?;
                self.handle_return(cmd)
            }
            TransferCommand::Cancel(cmd) => {
                existing()?;
                self.handle_cancel(cmd)
            }
        }
    }
}

impl Transfer {
    /// Commands other than `Request` need a created stream with this id.
    fn ensure_exists(&self, transfer_id: TransferId) -> Result<(), DomainError> {
        if !self.created || self.id != transfer_id {
            return Err(DomainError::not_found(format!("transfer {transfer_id}")));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: TransferStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(self.status.as_str(), action));
        }
        Ok(())
    }

    fn handle_request(&self, cmd: &RequestTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_transition(self.status.as_str(), "request"));
        }
        if cmd.origin == cmd.destination {
            return Err(DomainError::SameBranch(cmd.origin));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::invalid_quantity("a transfer needs at least one product"));
        }

        let mut seen = BTreeMap::new();
        for (idx, line) in cmd.lines.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::invalid_quantity(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                ))
                .at_line(idx));
            }
            if seen.insert(line.product_id, idx).is_some() {
                return Err(DomainError::invalid_quantity(format!(
                    "product {} appears more than once",
                    line.product_id
                ))
                .at_line(idx));
            }
            let available = cmd.available.get(&line.product_id).copied().unwrap_or(0);
            if line.quantity > available {
                return Err(DomainError::invalid_quantity(format!(
                    "requested {} of product {} but origin holds {}",
                    line.quantity, line.product_id, available
                ))
                .at_line(idx));
            }
        }

        Ok(vec![TransferEvent::Requested(TransferRequested {
            transfer_id: cmd.transfer_id,
            origin: cmd.origin,
            destination: cmd.destination,
            lines: cmd.lines.clone(),
            reason: cmd.reason.trim().to_string(),
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_status(TransferStatus::Pending, "approve")?;

        Ok(vec![TransferEvent::Approved(TransferApproved {
            transfer_id: cmd.transfer_id,
            origin: self.origin,
            destination: self.destination,
            lines: self.lines.clone(),
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_status(TransferStatus::Pending, "reject")?;

        Ok(vec![TransferEvent::Rejected(TransferRejected {
            transfer_id: cmd.transfer_id,
            reason: cmd.reason.trim().to_string(),
            rejected_by: cmd.rejected_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnStock) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_status(TransferStatus::Approved, "return stock of")?;

        if cmd.returns.is_empty() {
            return Err(DomainError::invalid_quantity("nothing to return"));
        }

        // Quantities already claimed by earlier lines of this same request.
        let mut claimed: BTreeMap<ProductId, i64> = BTreeMap::new();
        for (idx, line) in cmd.returns.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::invalid_quantity(format!(
                    "returned quantity for product {} must be positive",
                    line.product_id
                ))
                .at_line(idx));
            }
            if self.transferred_of(line.product_id).is_none() {
                return Err(DomainError::invalid_quantity(format!(
                    "product {} is not part of transfer {}",
                    line.product_id, self.id
                ))
                .at_line(idx));
            }

            let already = claimed.entry(line.product_id).or_insert(0);
            let remaining = self.remaining_of(line.product_id) - *already;
            if line.quantity > remaining {
                return Err(DomainError::invalid_quantity(format!(
                    "cannot return {} of product {}: only {} remain at destination",
                    line.quantity, line.product_id, remaining
                ))
                .at_line(idx));
            }
            *already += line.quantity;
        }

        Ok(vec![TransferEvent::StockReturned(TransferStockReturned {
            transfer_id: cmd.transfer_id,
            origin: self.origin,
            destination: self.destination,
            returns: cmd.returns.clone(),
            returned_by: cmd.returned_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_status(TransferStatus::Approved, "cancel")?;

        let reversed = self
            .lines
            .iter()
            .map(|l| TransferLine {
                product_id: l.product_id,
                quantity: self.remaining_of(l.product_id),
            })
            .filter(|l| l.quantity > 0)
            .collect();

        Ok(vec![TransferEvent::Cancelled(TransferCancelled {
            transfer_id: cmd.transfer_id,
            origin: self.origin,
            destination: self.destination,
            reversed,
            reason: cmd.reason.trim().to_string(),
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_events::execute;
    use proptest::prelude::*;

    struct Fixture {
        id: TransferId,
        origin: BranchId,
        destination: BranchId,
        p1: ProductId,
        p2: ProductId,
        user: UserId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                id: TransferId::new(AggregateId::new()),
                origin: BranchId::new(),
                destination: BranchId::new(),
                p1: ProductId::new(),
                p2: ProductId::new(),
                user: UserId::new(),
            }
        }

        fn request(&self, lines: Vec<TransferLine>) -> TransferCommand {
            let available = [(self.p1, 100), (self.p2, 100)].into_iter().collect();
            TransferCommand::Request(RequestTransfer {
                transfer_id: self.id,
                origin: self.origin,
                destination: self.destination,
                lines,
                reason: "reposición".to_string(),
                requested_by: self.user,
                available,
                occurred_at: Utc::now(),
            })
        }

        fn approve(&self) -> TransferCommand {
            TransferCommand::Approve(ApproveTransfer {
                transfer_id: self.id,
                approved_by: self.user,
                occurred_at: Utc::now(),
            })
        }

        fn reject(&self) -> TransferCommand {
            TransferCommand::Reject(RejectTransfer {
                transfer_id: self.id,
                reason: "sin stock".to_string(),
                rejected_by: self.user,
                occurred_at: Utc::now(),
            })
        }

        fn give_back(&self, returns: Vec<TransferLine>) -> TransferCommand {
            TransferCommand::Return(ReturnStock {
                transfer_id: self.id,
                returns,
                returned_by: self.user,
                occurred_at: Utc::now(),
            })
        }

        fn cancel(&self) -> TransferCommand {
            TransferCommand::Cancel(CancelTransfer {
                transfer_id: self.id,
                reason: "error de carga".to_string(),
                cancelled_by: self.user,
                occurred_at: Utc::now(),
            })
        }

        fn line(&self, product_id: ProductId, quantity: i64) -> TransferLine {
            TransferLine { product_id, quantity }
        }

        fn approved(&self, lines: Vec<TransferLine>) -> Transfer {
            let mut t = Transfer::empty(self.id);
            execute(&mut t, &self.request(lines)).unwrap();
            execute(&mut t, &self.approve()).unwrap();
            t
        }
    }

    #[test]
    fn request_creates_pending_transfer() {
        let f = Fixture::new();
        let mut t = Transfer::empty(f.id);
        execute(&mut t, &f.request(vec![f.line(f.p1, 5)])).unwrap();

        assert_eq!(t.status(), TransferStatus::Pending);
        assert_eq!(t.origin(), f.origin);
        assert_eq!(t.requested_by(), Some(f.user));
        assert_eq!(t.version(), 1);
    }

    #[test]
    fn request_rejects_same_branch() {
        let f = Fixture::new();
        let mut cmd = f.request(vec![f.line(f.p1, 5)]);
        if let TransferCommand::Request(c) = &mut cmd {
            c.destination = c.origin;
        }
        let err = Transfer::empty(f.id).handle(&cmd).unwrap_err();
        assert_eq!(err, DomainError::SameBranch(f.origin));
    }

    #[test]
    fn request_rejects_non_positive_and_excessive_quantities() {
        let f = Fixture::new();
        let t = Transfer::empty(f.id);

        let zero = t.handle(&f.request(vec![f.line(f.p1, 0)])).unwrap_err();
        assert!(matches!(zero, DomainError::InvalidQuantity(_)));

        let too_many = t.handle(&f.request(vec![f.line(f.p1, 5), f.line(f.p2, 101)])).unwrap_err();
        match too_many {
            DomainError::InvalidQuantity(msg) => assert!(msg.starts_with("line 2")),
            other => panic!("unexpected error: {other:?}"),
        }

        let unknown = t.handle(&f.request(vec![f.line(ProductId::new(), 1)])).unwrap_err();
        assert!(matches!(unknown, DomainError::InvalidQuantity(_)));
    }

    #[test]
    fn request_rejects_empty_and_duplicate_lines() {
        let f = Fixture::new();
        let t = Transfer::empty(f.id);
        assert!(matches!(t.handle(&f.request(vec![])), Err(DomainError::InvalidQuantity(_))));
        assert!(matches!(
            t.handle(&f.request(vec![f.line(f.p1, 1), f.line(f.p1, 2)])),
            Err(DomainError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn approve_emits_origin_to_destination_flows() {
        let f = Fixture::new();
        let mut t = Transfer::empty(f.id);
        execute(&mut t, &f.request(vec![f.line(f.p1, 5), f.line(f.p2, 3)])).unwrap();
        let events = execute(&mut t, &f.approve()).unwrap();

        let flows = events[0].stock_flows();
        assert_eq!(flows.len(), 2);
        assert!(flows.iter().all(|fl| fl.from == f.origin && fl.to == f.destination));
        assert_eq!(t.status(), TransferStatus::Approved);
        assert_eq!(t.approved_by(), Some(f.user));
        assert!(t.resolved_at().is_some());
    }

    #[test]
    fn reject_records_reason_and_blocks_approval() {
        let f = Fixture::new();
        let mut t = Transfer::empty(f.id);
        execute(&mut t, &f.request(vec![f.line(f.p1, 5)])).unwrap();
        let events = execute(&mut t, &f.reject()).unwrap();

        assert!(events[0].stock_flows().is_empty());
        assert_eq!(t.status(), TransferStatus::Rejected);
        assert_eq!(t.rejection_reason(), Some("sin stock"));
        assert!(matches!(t.handle(&f.approve()), Err(DomainError::InvalidTransition { .. })));
    }

    #[test]
    fn only_pending_transfers_can_be_approved_or_rejected() {
        let f = Fixture::new();
        let t = f.approved(vec![f.line(f.p1, 5)]);
        assert!(matches!(t.handle(&f.approve()), Err(DomainError::InvalidTransition { .. })));
        assert!(matches!(t.handle(&f.reject()), Err(DomainError::InvalidTransition { .. })));
    }

    #[test]
    fn commands_on_unknown_transfer_are_not_found() {
        let f = Fixture::new();
        let t = Transfer::empty(f.id);
        for command in [f.approve(), f.reject(), f.give_back(vec![f.line(f.p1, 1)]), f.cancel()] {
            assert!(matches!(t.handle(&command), Err(DomainError::NotFound(_))));
        }

        // Existing stream, command aimed at another transfer.
        let other = Fixture { id: TransferId::new(AggregateId::new()), ..Fixture::new() };
        let approved = f.approved(vec![f.line(f.p1, 1)]);
        assert!(matches!(approved.handle(&other.cancel()), Err(DomainError::NotFound(_))));
        assert!(matches!(
            approved.handle(&f.request(vec![f.line(f.p1, 1)])),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn partial_returns_accumulate_without_changing_status() {
        let f = Fixture::new();
        let mut t = f.approved(vec![f.line(f.p1, 10)]);

        let events = execute(&mut t, &f.give_back(vec![f.line(f.p1, 4)])).unwrap();
        let flows = events[0].stock_flows();
        assert_eq!(flows[0].from, f.destination);
        assert_eq!(flows[0].to, f.origin);

        assert_eq!(t.returned_of(f.p1), 4);
        assert_eq!(t.remaining_of(f.p1), 6);
        assert_eq!(t.status(), TransferStatus::Approved);
        assert!(!t.is_fully_returned());
    }

    #[test]
    fn return_cannot_exceed_remaining() {
        let f = Fixture::new();
        let mut t = f.approved(vec![f.line(f.p1, 10)]);
        execute(&mut t, &f.give_back(vec![f.line(f.p1, 7)])).unwrap();

        assert!(matches!(
            t.handle(&f.give_back(vec![f.line(f.p1, 4)])),
            Err(DomainError::InvalidQuantity(_))
        ));
        // Two lines of the same request count together.
        assert!(matches!(
            t.handle(&f.give_back(vec![f.line(f.p1, 2), f.line(f.p1, 2)])),
            Err(DomainError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn return_rejects_products_outside_transfer() {
        let f = Fixture::new();
        let t = f.approved(vec![f.line(f.p1, 10)]);
        assert!(matches!(
            t.handle(&f.give_back(vec![f.line(f.p2, 1)])),
            Err(DomainError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn return_requires_approved_status() {
        let f = Fixture::new();
        let mut t = Transfer::empty(f.id);
        execute(&mut t, &f.request(vec![f.line(f.p1, 10)])).unwrap();
        assert!(matches!(
            t.handle(&f.give_back(vec![f.line(f.p1, 1)])),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn cancel_reverses_only_remaining_quantities() {
        let f = Fixture::new();
        let mut t = f.approved(vec![f.line(f.p1, 10), f.line(f.p2, 3)]);
        execute(&mut t, &f.give_back(vec![f.line(f.p1, 4), f.line(f.p2, 3)])).unwrap();

        let events = execute(&mut t, &f.cancel()).unwrap();
        let flows = events[0].stock_flows();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].product_id, f.p1);
        assert_eq!(flows[0].quantity, 6);
        assert_eq!(t.status(), TransferStatus::Cancelled);
        assert_eq!(t.cancellation_reason(), Some("error de carga"));
    }

    #[test]
    fn fully_returned_transfer_can_still_be_cancelled_as_noop() {
        let f = Fixture::new();
        let mut t = f.approved(vec![f.line(f.p1, 10)]);
        execute(&mut t, &f.give_back(vec![f.line(f.p1, 10)])).unwrap();
        assert!(t.is_fully_returned());
        assert_eq!(t.status(), TransferStatus::Approved);

        let events = execute(&mut t, &f.cancel()).unwrap();
        assert!(events[0].stock_flows().is_empty());
        assert_eq!(t.status(), TransferStatus::Cancelled);
    }

    #[test]
    fn cancelled_transfer_cannot_be_cancelled_again() {
        let f = Fixture::new();
        let mut t = f.approved(vec![f.line(f.p1, 10)]);
        execute(&mut t, &f.cancel()).unwrap();
        match t.handle(&f.cancel()).unwrap_err() {
            DomainError::InvalidTransition { from, action } => {
                assert_eq!(from, "cancelada");
                assert_eq!(action, "cancel");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pending_transfer_cannot_be_cancelled() {
        let f = Fixture::new();
        let mut t = Transfer::empty(f.id);
        execute(&mut t, &f.request(vec![f.line(f.p1, 10)])).unwrap();
        assert!(matches!(t.handle(&f.cancel()), Err(DomainError::InvalidTransition { .. })));
    }

    #[test]
    fn status_parses_from_wire_names() {
        assert_eq!("aprobada".parse::<TransferStatus>().unwrap(), TransferStatus::Approved);
        assert!("approved".parse::<TransferStatus>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever returns are attempted, the accepted ones never
        /// push the returned quantity above the transferred quantity.
        #[test]
        fn returned_never_exceeds_transferred(
            transferred in 1i64..60,
            attempts in prop::collection::vec(-5i64..30, 1..20)
        ) {
            let f = Fixture::new();
            let mut t = f.approved(vec![f.line(f.p1, transferred)]);

            for qty in attempts {
                let accepted = execute(&mut t, &f.give_back(vec![f.line(f.p1, qty)])).is_ok();
                if accepted {
                    prop_assert!(qty > 0);
                }
                prop_assert!(t.returned_of(f.p1) <= transferred);
                prop_assert!(t.remaining_of(f.p1) >= 0);
            }
        }
    }
}
