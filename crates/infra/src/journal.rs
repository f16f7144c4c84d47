//! Movement journal: read side of the append-only movement records.
//!
//! Records are written only by the unit of work, together with the stock rows
//! they explain. Nothing here mutates or deletes them.

use serde::Serialize;

use branchstock_core::{BranchId, ProductId};
use branchstock_inventory::{MovementRecord, MovementReference, StockKey, replay};

use crate::error::{LedgerResult, StoreError};
use crate::store::{MovementFilter, MovementPage, Pagination};
use crate::uow::LedgerContext;

/// Outcome of replaying one pair's journal against its stored balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub branch_id: BranchId,
    pub product_id: ProductId,
    /// Balance stored on the row (0 when there is none).
    pub balance: i64,
    /// Balance obtained by replaying every movement from 0.
    pub replayed: i64,
    pub movements: usize,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.replayed
    }
}

#[derive(Debug, Clone)]
pub struct MovementJournal {
    ctx: LedgerContext,
}

impl MovementJournal {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Newest first, paginated. Limit and offset default/cap per configuration.
    pub fn query(&self, filter: MovementFilter, limit: Option<u32>, offset: Option<u32>) -> LedgerResult<MovementPage> {
        let pagination = Pagination::bounded(limit, offset, self.ctx.config());
        Ok(self.ctx.backend().movements(&filter, pagination)?)
    }

    pub fn by_branch(&self, branch_id: BranchId, pagination: Pagination) -> LedgerResult<MovementPage> {
        let filter = MovementFilter {
            branch_id: Some(branch_id),
            ..MovementFilter::default()
        };
        Ok(self.ctx.backend().movements(&filter, pagination)?)
    }

    pub fn by_product(&self, product_id: ProductId, pagination: Pagination) -> LedgerResult<MovementPage> {
        let filter = MovementFilter {
            product_id: Some(product_id),
            ..MovementFilter::default()
        };
        Ok(self.ctx.backend().movements(&filter, pagination)?)
    }

    /// Every movement caused by one transfer or sale, oldest first.
    pub fn by_reference(&self, reference: MovementReference) -> LedgerResult<Vec<MovementRecord>> {
        let filter = MovementFilter {
            reference: Some(reference),
            ..MovementFilter::default()
        };
        let mut records = self.ctx.backend().movements(&filter, Pagination::unbounded())?.records;
        records.reverse();
        Ok(records)
    }

    /// Balance explained by the journal alone.
    pub fn reconstruct(&self, branch_id: BranchId, product_id: ProductId) -> LedgerResult<i64> {
        let history = self.ctx.backend().movement_history(StockKey::new(branch_id, product_id))?;
        Ok(replay(&history).map_err(StoreError::from)?)
    }

    /// Compare the stored balance with the replayed one.
    pub fn verify(&self, branch_id: BranchId, product_id: ProductId) -> LedgerResult<Reconciliation> {
        let key = StockKey::new(branch_id, product_id);
        let history = self.ctx.backend().movement_history(key)?;
        let replayed = replay(&history).map_err(StoreError::from)?;
        let balance = self.ctx.backend().entry(key)?.map(|e| e.quantity).unwrap_or(0);

        Ok(Reconciliation {
            branch_id,
            product_id,
            balance,
            replayed,
            movements: history.len(),
        })
    }
}
