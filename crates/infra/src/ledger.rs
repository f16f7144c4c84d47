//! Stock ledger: authoritative quantity on hand per (branch, product).

use std::collections::BTreeSet;

use tracing::{info, instrument, warn};

use branchstock_core::{BranchId, DomainError, ProductId, UserId};
use branchstock_inventory::{InitialStock, MovementRecord, MovementReference, NegativeStockPolicy, StockEntry, StockKey};

use crate::error::LedgerResult;
use crate::store::EntryScope;
use crate::uow::LedgerContext;

#[derive(Debug, Clone)]
pub struct StockLedger {
    ctx: LedgerContext,
}

impl StockLedger {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Quantity on hand; 0 for a pair never touched.
    pub fn get_balance(&self, branch_id: BranchId, product_id: ProductId) -> LedgerResult<i64> {
        Ok(self.get_entry(branch_id, product_id)?.map(|e| e.quantity).unwrap_or(0))
    }

    pub fn get_entry(&self, branch_id: BranchId, product_id: ProductId) -> LedgerResult<Option<StockEntry>> {
        Ok(self.ctx.backend().entry(StockKey::new(branch_id, product_id))?)
    }

    /// Make sure the row exists, creating it from the catalog defaults.
    #[instrument(skip_all, fields(branch = %branch_id, product = %product_id))]
    pub fn ensure_entry_exists(&self, branch_id: BranchId, product_id: ProductId, actor: UserId) -> LedgerResult<StockEntry> {
        let key = StockKey::new(branch_id, product_id);
        let committed = self.ctx.transact(actor, |tx| tx.ensure_entry(key))?;

        Ok(committed.receipt.entry(key).cloned().unwrap_or(committed.value))
    }

    /// Set the balance to an absolute value. `None` when nothing changed.
    #[instrument(skip_all, fields(branch = %branch_id, product = %product_id))]
    pub fn set_absolute(
        &self,
        branch_id: BranchId,
        product_id: ProductId,
        quantity: i64,
        reason: &str,
        actor: UserId,
    ) -> LedgerResult<Option<MovementRecord>> {
        let key = StockKey::new(branch_id, product_id);
        let committed = self
            .ctx
            .transact(actor, |tx| tx.set(key, quantity, reason, MovementReference::adjustment()))
            .inspect_err(|e| warn!(error = %e, "set rejected"))?;

        let record = committed.value.and_then(|id| committed.receipt.movement(id).cloned());
        if let Some(r) = &record {
            info!(previous = r.previous_stock, new = r.new_stock, "stock set");
        }
        Ok(record)
    }

    /// Apply a signed delta. Under [`NegativeStockPolicy::Reject`] a result
    /// below zero fails with `InsufficientStock`.
    #[instrument(skip_all, fields(branch = %branch_id, product = %product_id))]
    pub fn adjust_relative(
        &self,
        branch_id: BranchId,
        product_id: ProductId,
        delta: i64,
        reason: &str,
        actor: UserId,
        policy: NegativeStockPolicy,
    ) -> LedgerResult<Option<MovementRecord>> {
        if delta == 0 {
            return Ok(None);
        }

        let key = StockKey::new(branch_id, product_id);
        let committed = self
            .ctx
            .transact(actor, |tx| tx.adjust(key, delta, policy, reason, MovementReference::adjustment()))
            .inspect_err(|e| warn!(delta, error = %e, "adjustment rejected"))?;

        let record = committed.value.and_then(|id| committed.receipt.movement(id).cloned());
        if let Some(r) = &record {
            info!(delta, previous = r.previous_stock, new = r.new_stock, "stock adjusted");
        }
        Ok(record)
    }

    /// Seed a branch. Only pairs without a row are created; returns how many.
    ///
    /// Any negative value rejects the whole batch. A product listed twice
    /// counts once, first occurrence wins.
    #[instrument(skip_all, fields(branch = %branch_id, items = items.len()))]
    pub fn initialize_branch(&self, branch_id: BranchId, items: &[InitialStock], actor: UserId) -> LedgerResult<usize> {
        for (idx, item) in items.iter().enumerate() {
            item.validate().map_err(|e| e.at_line(idx))?;
        }

        let mut seen = BTreeSet::new();
        let unique: Vec<&InitialStock> = items.iter().filter(|i| seen.insert(i.product_id)).collect();

        let committed = self.ctx.transact(actor, |tx| {
            let mut created = 0usize;
            for item in &unique {
                if tx.initialize(StockKey::new(branch_id, item.product_id), item)? {
                    created += 1;
                }
            }
            Ok(created)
        })?;

        info!(created = committed.value, "branch initialized");
        Ok(committed.value)
    }

    /// Update the reorder threshold of one row.
    #[instrument(skip_all, fields(branch = %branch_id, product = %product_id))]
    pub fn set_minimum(
        &self,
        branch_id: BranchId,
        product_id: ProductId,
        min_stock: i64,
        actor: UserId,
    ) -> LedgerResult<StockEntry> {
        let key = StockKey::new(branch_id, product_id);
        let committed = self.ctx.transact(actor, |tx| {
            tx.set_minimum(key, min_stock)?;
            tx.ensure_entry(key)
        })?;

        Ok(committed.receipt.entry(key).cloned().unwrap_or(committed.value))
    }

    /// Rows at or below their reorder threshold.
    pub fn list_low_stock(&self, branch_id: BranchId) -> LedgerResult<Vec<StockEntry>> {
        Ok(self
            .list_by_branch(branch_id)?
            .into_iter()
            .filter(StockEntry::is_low)
            .collect())
    }

    pub fn list_by_branch(&self, branch_id: BranchId) -> LedgerResult<Vec<StockEntry>> {
        Ok(self.ctx.backend().entries(EntryScope::Branch(branch_id))?)
    }

    pub fn list_by_product(&self, product_id: ProductId) -> LedgerResult<Vec<StockEntry>> {
        Ok(self.ctx.backend().entries(EntryScope::Product(product_id))?)
    }

    /// Total quantity of a product across branches.
    pub fn total_for_product(&self, product_id: ProductId) -> LedgerResult<i64> {
        let rows = self.list_by_product(product_id)?;
        rows.iter()
            .try_fold(0i64, |acc, e| acc.checked_add(e.quantity))
            .ok_or_else(|| DomainError::invalid_quantity(format!("total for product {product_id} overflows")).into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use branchstock_events::{EventEnvelope, InMemoryEventBus};
    use branchstock_inventory::{MovementKind, ReferenceKind};

    use crate::catalog::{InMemoryProductCatalog, ProductDefaults};
    use crate::error::LedgerError;

    fn setup() -> (StockLedger, Arc<InMemoryProductCatalog>) {
        let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> = Arc::new(InMemoryEventBus::new());
        let catalog = Arc::new(InMemoryProductCatalog::new());
        (StockLedger::new(LedgerContext::in_memory(bus, catalog.clone())), catalog)
    }

    #[test]
    fn untouched_pair_reads_zero() {
        let (ledger, _) = setup();
        assert_eq!(ledger.get_balance(BranchId::new(), ProductId::new()).unwrap(), 0);
    }

    #[test]
    fn adjust_records_movement_with_before_and_after() {
        let (ledger, _) = setup();
        let (b, p, u) = (BranchId::new(), ProductId::new(), UserId::new());

        ledger.adjust_relative(b, p, 10, "compra", u, NegativeStockPolicy::Reject).unwrap();
        let rec = ledger
            .adjust_relative(b, p, -4, "rotura", u, NegativeStockPolicy::Reject)
            .unwrap()
            .unwrap();

        assert_eq!(rec.kind, MovementKind::Outbound);
        assert_eq!((rec.previous_stock, rec.new_stock, rec.quantity), (10, 6, 4));
        assert_eq!(rec.reference.kind, ReferenceKind::Adjustment);
        assert_eq!(rec.user_id, u);
        assert_eq!(rec.sequence, 2);
        assert_eq!(ledger.get_balance(b, p).unwrap(), 6);
    }

    #[test]
    fn debit_below_zero_is_rejected_unless_allowed() {
        let (ledger, _) = setup();
        let (b, p, u) = (BranchId::new(), ProductId::new(), UserId::new());
        ledger.adjust_relative(b, p, 2, "alta", u, NegativeStockPolicy::Reject).unwrap();

        let err = ledger.adjust_relative(b, p, -3, "venta", u, NegativeStockPolicy::Reject).unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::InsufficientStock(_))));
        assert_eq!(ledger.get_balance(b, p).unwrap(), 2);

        ledger.adjust_relative(b, p, -3, "conciliación", u, NegativeStockPolicy::Allow).unwrap();
        assert_eq!(ledger.get_balance(b, p).unwrap(), -1);
    }

    #[test]
    fn zero_changes_produce_no_record() {
        let (ledger, _) = setup();
        let (b, p, u) = (BranchId::new(), ProductId::new(), UserId::new());
        assert!(ledger.adjust_relative(b, p, 0, "nada", u, NegativeStockPolicy::Reject).unwrap().is_none());

        ledger.set_absolute(b, p, 7, "conteo", u).unwrap();
        assert!(ledger.set_absolute(b, p, 7, "conteo", u).unwrap().is_none());
    }

    #[test]
    fn set_absolute_derives_direction_and_rejects_negative() {
        let (ledger, _) = setup();
        let (b, p, u) = (BranchId::new(), ProductId::new(), UserId::new());
        ledger.set_absolute(b, p, 9, "conteo", u).unwrap();

        let down = ledger.set_absolute(b, p, 4, "conteo", u).unwrap().unwrap();
        assert_eq!(down.kind, MovementKind::Outbound);
        assert_eq!(down.quantity, 5);

        assert!(matches!(
            ledger.set_absolute(b, p, -1, "conteo", u),
            Err(LedgerError::Domain(DomainError::InvalidQuantity(_)))
        ));
    }

    #[test]
    fn lazy_creation_uses_catalog_default() {
        let (ledger, catalog) = setup();
        let (b, p, u) = (BranchId::new(), ProductId::new(), UserId::new());
        catalog.upsert(p, ProductDefaults { initial_stock: 20, min_stock: 5 });

        let rec = ledger.adjust_relative(b, p, -3, "venta", u, NegativeStockPolicy::Reject).unwrap().unwrap();
        assert_eq!((rec.previous_stock, rec.new_stock), (20, 17));

        let entry = ledger.get_entry(b, p).unwrap().unwrap();
        assert_eq!(entry.min_stock, 5);
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn initialization_is_idempotent_and_first_wins() {
        let (ledger, _) = setup();
        let (b, u) = (BranchId::new(), UserId::new());
        let (p1, p2) = (ProductId::new(), ProductId::new());
        let items = [
            InitialStock { product_id: p1, quantity: 10, min_stock: 2 },
            InitialStock { product_id: p2, quantity: 0, min_stock: 1 },
            InitialStock { product_id: p1, quantity: 99, min_stock: 0 },
        ];

        assert_eq!(ledger.initialize_branch(b, &items, u).unwrap(), 2);
        assert_eq!(ledger.get_balance(b, p1).unwrap(), 10);

        ledger.adjust_relative(b, p1, -4, "venta", u, NegativeStockPolicy::Reject).unwrap();
        assert_eq!(ledger.initialize_branch(b, &items, u).unwrap(), 0);
        assert_eq!(ledger.get_balance(b, p1).unwrap(), 6);
    }

    #[test]
    fn initialization_with_negative_value_creates_nothing() {
        let (ledger, _) = setup();
        let (b, u) = (BranchId::new(), UserId::new());
        let good = ProductId::new();
        let items = [
            InitialStock { product_id: good, quantity: 3, min_stock: 0 },
            InitialStock { product_id: ProductId::new(), quantity: -1, min_stock: 0 },
        ];

        assert!(ledger.initialize_branch(b, &items, u).is_err());
        assert!(ledger.get_entry(b, good).unwrap().is_none());
    }

    #[test]
    fn low_stock_lists_rows_at_or_below_minimum() {
        let (ledger, _) = setup();
        let (b, u) = (BranchId::new(), UserId::new());
        let (low, ok) = (ProductId::new(), ProductId::new());
        ledger
            .initialize_branch(
                b,
                &[
                    InitialStock { product_id: low, quantity: 3, min_stock: 3 },
                    InitialStock { product_id: ok, quantity: 8, min_stock: 3 },
                ],
                u,
            )
            .unwrap();

        let rows = ledger.list_low_stock(b).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_id, low);

        ledger.set_minimum(b, ok, 10, u).unwrap();
        assert_eq!(ledger.list_low_stock(b).unwrap().len(), 2);
    }

    #[test]
    fn listing_by_product_spans_branches() {
        let (ledger, _) = setup();
        let (p, u) = (ProductId::new(), UserId::new());
        for qty in [1, 2, 3] {
            ledger.adjust_relative(BranchId::new(), p, qty, "alta", u, NegativeStockPolicy::Reject).unwrap();
        }
        assert_eq!(ledger.list_by_product(p).unwrap().len(), 3);
        assert_eq!(ledger.total_for_product(p).unwrap(), 6);
    }
}
