//! Movement records: the append-only audit trail of every quantity change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use branchstock_core::{AggregateId, BranchId, ProductId, UserId};
use branchstock_events::Event;

/// Direction of a movement (*tipo*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "entrada")]
    Inbound,
    #[serde(rename = "salida")]
    Outbound,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Inbound => "entrada",
            MovementKind::Outbound => "salida",
        }
    }
}

impl core::str::FromStr for MovementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entrada" => Ok(MovementKind::Inbound),
            "salida" => Ok(MovementKind::Outbound),
            other => Err(format!("unknown movement kind '{other}'")),
        }
    }
}

/// Kind of operation that originated a movement (*referencia_tipo*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReferenceKind {
    #[serde(rename = "venta")]
    Sale,
    #[serde(rename = "transferencia")]
    Transfer,
    #[serde(rename = "ajuste")]
    Adjustment,
    #[serde(rename = "inicializacion")]
    Initialization,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Sale => "venta",
            ReferenceKind::Transfer => "transferencia",
            ReferenceKind::Adjustment => "ajuste",
            ReferenceKind::Initialization => "inicializacion",
        }
    }
}

impl core::str::FromStr for ReferenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "venta" => Ok(ReferenceKind::Sale),
            "transferencia" => Ok(ReferenceKind::Transfer),
            "ajuste" => Ok(ReferenceKind::Adjustment),
            "inicializacion" => Ok(ReferenceKind::Initialization),
            other => Err(format!("unknown reference kind '{other}'")),
        }
    }
}

/// Link from a movement to the operation that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub kind: ReferenceKind,
    /// Transfer or sale id; manual adjustments and seeding have none.
    pub id: Option<AggregateId>,
}

impl MovementReference {
    pub fn sale(id: AggregateId) -> Self {
        Self {
            kind: ReferenceKind::Sale,
            id: Some(id),
        }
    }

    pub fn transfer(id: AggregateId) -> Self {
        Self {
            kind: ReferenceKind::Transfer,
            id: Some(id),
        }
    }

    pub fn adjustment() -> Self {
        Self {
            kind: ReferenceKind::Adjustment,
            id: None,
        }
    }

    pub fn initialization() -> Self {
        Self {
            kind: ReferenceKind::Initialization,
            id: None,
        }
    }
}

/// Immutable record of one ledger mutation.
///
/// `sequence` is the journal position assigned when the unit of work commits;
/// records built but not yet committed carry 0. `occurred_at` is stamped at
/// commit as well, so journal order and time order agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: Uuid,
    pub sequence: u64,
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    /// Always positive; the direction is carried by `kind`.
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub reason: String,
    pub reference: MovementReference,
    pub occurred_at: DateTime<Utc>,
    pub user_id: UserId,
}

impl MovementRecord {
    /// Quantity change as a signed delta (+ for entrada, - for salida).
    pub fn signed_delta(&self) -> i64 {
        match self.kind {
            MovementKind::Inbound => self.quantity,
            MovementKind::Outbound => -self.quantity,
        }
    }

    /// `new_stock = previous_stock ± quantity`, consistent with `kind`.
    pub fn is_consistent(&self) -> bool {
        self.quantity > 0 && self.previous_stock.checked_add(self.signed_delta()) == Some(self.new_stock)
    }
}

/// A point where the journal does not explain the balance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalBreak {
    #[error("movement {id} is internally inconsistent ({previous} -> {new} by {kind} {quantity})")]
    Inconsistent {
        id: Uuid,
        previous: i64,
        new: i64,
        kind: &'static str,
        quantity: i64,
    },

    #[error("movement {id} starts at {recorded} but the replayed balance is {replayed}")]
    Discontinuity { id: Uuid, recorded: i64, replayed: i64 },

    #[error("movements span more than one (branch, product) pair")]
    MixedKeys,
}

/// Replay movements of one (branch, product) pair from 0 in journal order.
///
/// Returns the reconstructed balance, or the first record that breaks the
/// chain of `previous_stock -> new_stock` transitions.
pub fn replay<'a>(records: impl IntoIterator<Item = &'a MovementRecord>) -> Result<i64, JournalBreak> {
    let mut sorted: Vec<&MovementRecord> = records.into_iter().collect();
    sorted.sort_by_key(|r| (r.occurred_at, r.sequence));

    let key = sorted.first().map(|r| (r.branch_id, r.product_id));
    let mut balance = 0i64;

    for r in sorted {
        if Some((r.branch_id, r.product_id)) != key {
            return Err(JournalBreak::MixedKeys);
        }
        if !r.is_consistent() {
            return Err(JournalBreak::Inconsistent {
                id: r.id,
                previous: r.previous_stock,
                new: r.new_stock,
                kind: r.kind.as_str(),
                quantity: r.quantity,
            });
        }
        if r.previous_stock != balance {
            return Err(JournalBreak::Discontinuity {
                id: r.id,
                recorded: r.previous_stock,
                replayed: balance,
            });
        }
        balance = r.new_stock;
    }

    Ok(balance)
}

/// Event published for every committed movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded(pub MovementRecord);

impl Event for MovementRecorded {
    fn event_type(&self) -> &'static str {
        match self.0.kind {
            MovementKind::Inbound => "stock.movement.inbound",
            MovementKind::Outbound => "stock.movement.outbound",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.0.occurred_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(
        branch_id: BranchId,
        product_id: ProductId,
        seq: u64,
        kind: MovementKind,
        qty: i64,
        prev: i64,
    ) -> MovementRecord {
        let new = match kind {
            MovementKind::Inbound => prev + qty,
            MovementKind::Outbound => prev - qty,
        };
        MovementRecord {
            id: Uuid::now_v7(),
            sequence: seq,
            branch_id,
            product_id,
            kind,
            quantity: qty,
            previous_stock: prev,
            new_stock: new,
            reason: "test".to_string(),
            reference: MovementReference::adjustment(),
            occurred_at: at(seq as i64),
            user_id: UserId::new(),
        }
    }

    #[test]
    fn replay_reproduces_final_balance() {
        let b = BranchId::new();
        let p = ProductId::new();
        let records = vec![
            record(b, p, 1, MovementKind::Inbound, 50, 0),
            record(b, p, 2, MovementKind::Outbound, 10, 50),
            record(b, p, 3, MovementKind::Inbound, 4, 40),
        ];
        assert_eq!(replay(&records).unwrap(), 44);
    }

    #[test]
    fn replay_orders_by_time_not_by_input_order() {
        let b = BranchId::new();
        let p = ProductId::new();
        let mut records = vec![
            record(b, p, 1, MovementKind::Inbound, 5, 0),
            record(b, p, 2, MovementKind::Outbound, 2, 5),
        ];
        records.reverse();
        assert_eq!(replay(&records).unwrap(), 3);
    }

    #[test]
    fn replay_detects_gap() {
        let b = BranchId::new();
        let p = ProductId::new();
        let records = vec![
            record(b, p, 1, MovementKind::Inbound, 5, 0),
            record(b, p, 2, MovementKind::Outbound, 2, 7),
        ];
        assert!(matches!(
            replay(&records),
            Err(JournalBreak::Discontinuity { recorded: 7, replayed: 5, .. })
        ));
    }

    #[test]
    fn replay_rejects_mixed_keys() {
        let p = ProductId::new();
        let records = vec![
            record(BranchId::new(), p, 1, MovementKind::Inbound, 5, 0),
            record(BranchId::new(), p, 2, MovementKind::Inbound, 5, 5),
        ];
        assert_eq!(replay(&records), Err(JournalBreak::MixedKeys));
    }

    #[test]
    fn empty_journal_replays_to_zero() {
        assert_eq!(replay(&Vec::<MovementRecord>::new()).unwrap(), 0);
    }

    #[test]
    fn wire_names_follow_ledger_vocabulary() {
        assert_eq!(MovementKind::Outbound.as_str(), "salida");
        assert_eq!(ReferenceKind::Initialization.as_str(), "inicializacion");
        assert_eq!("transferencia".parse::<ReferenceKind>().unwrap(), ReferenceKind::Transfer);
    }
}
