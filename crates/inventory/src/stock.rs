use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use branchstock_core::{BranchId, DomainError, DomainResult, ProductId, UserId};

use crate::movement::{MovementKind, MovementRecord, MovementReference};

/// Key of a ledger row: one product at one branch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub branch_id: BranchId,
    pub product_id: ProductId,
}

impl StockKey {
    pub fn new(branch_id: BranchId, product_id: ProductId) -> Self {
        Self {
            branch_id,
            product_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.branch_id, self.product_id)
    }
}

/// Whether a relative adjustment may leave the balance below zero.
///
/// Only corrective reconciliation should ever use `Allow`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeStockPolicy {
    #[default]
    Reject,
    Allow,
}

/// Authoritative quantity-on-hand of one product at one branch.
///
/// `version` is the optimistic-concurrency revision of the row; an entry that
/// has never been committed has version 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub min_stock: i64,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl StockEntry {
    /// A brand-new, not yet persisted row.
    pub fn new(key: StockKey, quantity: i64, min_stock: i64, at: DateTime<Utc>) -> Self {
        Self {
            branch_id: key.branch_id,
            product_id: key.product_id,
            quantity,
            min_stock,
            updated_at: at,
            version: 0,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.branch_id, self.product_id)
    }

    /// At or below the reorder threshold.
    pub fn is_low(&self) -> bool {
        self.quantity <= self.min_stock
    }

    /// Plan a relative change. `Ok(None)` means the delta is zero (no-op).
    pub fn plan_adjust(&self, delta: i64, policy: NegativeStockPolicy) -> DomainResult<Option<StockChange>> {
        if delta == 0 {
            return Ok(None);
        }

        let new = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::invalid_quantity(format!("adjustment {delta} overflows")))?;

        if new < 0 && policy == NegativeStockPolicy::Reject {
            let requested = delta
                .checked_neg()
                .ok_or_else(|| DomainError::invalid_quantity(format!("adjustment {delta} is out of range")))?;
            return Err(DomainError::insufficient_stock(
                self.branch_id,
                self.product_id,
                self.quantity,
                requested,
            ));
        }

        StockChange::planned(self.key(), self.quantity, new).map(Some)
    }

    /// Plan setting the balance to an absolute value. `Ok(None)` if unchanged.
    pub fn plan_set(&self, new_quantity: i64) -> DomainResult<Option<StockChange>> {
        if new_quantity < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "quantity must not be negative (got {new_quantity})"
            )));
        }
        if new_quantity == self.quantity {
            return Ok(None);
        }
        StockChange::planned(self.key(), self.quantity, new_quantity).map(Some)
    }

    /// Evolve the row with a planned change.
    pub fn apply(&mut self, change: &StockChange, at: DateTime<Utc>) {
        debug_assert_eq!(change.key, self.key());
        self.quantity = change.new;
        self.updated_at = at;
    }
}

/// A planned, non-zero balance transition of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    pub key: StockKey,
    pub previous: i64,
    pub new: i64,
}

impl StockChange {
    /// A transition whose size fits in a movement quantity.
    pub fn planned(key: StockKey, previous: i64, new: i64) -> DomainResult<Self> {
        new.checked_sub(previous)
            .and_then(i64::checked_abs)
            .ok_or_else(|| DomainError::invalid_quantity(format!("change {previous} -> {new} is out of range")))?;
        Ok(Self { key, previous, new })
    }

    pub fn delta(&self) -> i64 {
        self.new.saturating_sub(self.previous)
    }

    pub fn kind(&self) -> MovementKind {
        if self.delta() > 0 {
            MovementKind::Inbound
        } else {
            MovementKind::Outbound
        }
    }

    /// Describe the change as a movement record (sequence assigned at commit).
    pub fn to_record(
        &self,
        reason: impl Into<String>,
        reference: MovementReference,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> MovementRecord {
        MovementRecord {
            id: Uuid::now_v7(),
            sequence: 0,
            branch_id: self.key.branch_id,
            product_id: self.key.product_id,
            kind: self.kind(),
            quantity: self.delta().saturating_abs(),
            previous_stock: self.previous,
            new_stock: self.new,
            reason: reason.into(),
            reference,
            occurred_at: at,
            user_id: actor,
        }
    }
}

/// One row of a bulk branch initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub min_stock: i64,
}

impl InitialStock {
    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "initial quantity for product {} must not be negative",
                self.product_id
            )));
        }
        if self.min_stock < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "minimum stock for product {} must not be negative",
                self.product_id
            )));
        }
        Ok(())
    }
}
