//! Ledger side of the external sale flow.
//!
//! The sale itself lives elsewhere; this adapter only turns sale lines into
//! relative adjustments referenced to the sale, one movement per product.

use tracing::{info, instrument, warn};

use branchstock_core::{BranchId, DomainError, UserId};
use branchstock_inventory::{MovementRecord, MovementReference, NegativeStockPolicy, StockKey};
use branchstock_sales::{SaleId, SaleLine, StockDelta, debit_deltas, edit_deltas, merge_lines, restore_deltas};

use crate::error::LedgerResult;
use crate::store::MovementFilter;
use crate::uow::{Committed, LedgerContext, LedgerTx};

const SALE_REASON: &str = "Venta";
const SALE_RESTORE_REASON: &str = "Anulación de venta";
const SALE_EDIT_REASON: &str = "Edición de venta";

#[derive(Debug, Clone)]
pub struct SaleStockIntegrator {
    ctx: LedgerContext,
}

impl SaleStockIntegrator {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Debit every sold product. Any shortfall rejects the whole sale.
    #[instrument(skip_all, fields(sale = %sale_id, branch = %branch_id, lines = lines.len()))]
    pub fn debit_sale(
        &self,
        sale_id: SaleId,
        branch_id: BranchId,
        lines: &[SaleLine],
        actor: UserId,
    ) -> LedgerResult<Vec<MovementRecord>> {
        let deltas = debit_deltas(lines)?;
        self.apply(sale_id, branch_id, SALE_REASON, actor, |_, _| Ok(deltas.clone()))
    }

    /// Credit back what a cancelled, deleted or returned sale had debited.
    ///
    /// Each line is bounded by what the journal still shows as debited for
    /// this sale at this branch. With no lines, everything outstanding is
    /// credited back.
    #[instrument(skip_all, fields(sale = %sale_id, branch = %branch_id, lines = lines.len()))]
    pub fn restore_sale(
        &self,
        sale_id: SaleId,
        branch_id: BranchId,
        lines: &[SaleLine],
        actor: UserId,
    ) -> LedgerResult<Vec<MovementRecord>> {
        let credits = restore_deltas(lines)?;
        self.apply(sale_id, branch_id, SALE_RESTORE_REASON, actor, |tx, reference| {
            if credits.is_empty() {
                return outstanding_credits(tx, branch_id, reference);
            }
            for c in &credits {
                check_outstanding(tx, StockKey::new(branch_id, c.product_id), c.delta, reference)
                    .map_err(|e| e.at_line(c.line))?;
            }
            Ok(credits.clone())
        })
    }

    /// Apply the per-product difference between the old and the new lines.
    ///
    /// `old` must not claim more than the journal shows as debited for the
    /// sale, otherwise the edit could credit stock that never left.
    #[instrument(skip_all, fields(sale = %sale_id, branch = %branch_id))]
    pub fn edit_sale(
        &self,
        sale_id: SaleId,
        branch_id: BranchId,
        old: &[SaleLine],
        new: &[SaleLine],
        actor: UserId,
    ) -> LedgerResult<Vec<MovementRecord>> {
        let sold = merge_lines(old)?;
        let deltas = edit_deltas(old, new)?;
        self.apply(sale_id, branch_id, SALE_EDIT_REASON, actor, |tx, reference| {
            for s in &sold {
                check_outstanding(tx, StockKey::new(branch_id, s.product_id), s.delta, reference)
                    .map_err(|e| e.at_line(s.line))?;
            }
            Ok(deltas.clone())
        })
    }

    /// One unit of work: `plan` decides the deltas against the transaction's
    /// view, then every delta is applied or none is.
    fn apply<P>(
        &self,
        sale_id: SaleId,
        branch_id: BranchId,
        reason: &str,
        actor: UserId,
        plan: P,
    ) -> LedgerResult<Vec<MovementRecord>>
    where
        P: Fn(&mut LedgerTx<'_>, MovementReference) -> LedgerResult<Vec<StockDelta>>,
    {
        let reference = MovementReference::sale(sale_id.0);

        let Committed { value: ids, receipt } = self
            .ctx
            .transact(actor, |tx| {
                let deltas = plan(tx, reference)?;
                let mut ids = Vec::with_capacity(deltas.len());
                for d in &deltas {
                    let id = tx
                        .adjust(
                            StockKey::new(branch_id, d.product_id),
                            d.delta,
                            NegativeStockPolicy::Reject,
                            reason,
                            reference,
                        )
                        .map_err(|e| e.at_line(d.line))?;
                    ids.extend(id);
                }
                Ok(ids)
            })
            .inspect_err(|e| warn!(error = %e, "sale stock update rejected"))?;

        let records: Vec<MovementRecord> = ids.iter().filter_map(|id| receipt.movement(*id).cloned()).collect();
        info!(movements = records.len(), "sale stock updated");
        Ok(records)
    }
}

fn check_outstanding(tx: &mut LedgerTx<'_>, key: StockKey, claimed: i64, reference: MovementReference) -> LedgerResult<()> {
    let outstanding = tx.net_outbound(key, reference)?;
    if claimed > outstanding {
        return Err(DomainError::invalid_quantity(format!(
            "sale claims {claimed} of product {} but only {outstanding} is debited for it at this branch",
            key.product_id
        ))
        .into());
    }
    Ok(())
}

/// Credits for everything the sale still holds at `branch_id`, one per product.
fn outstanding_credits(
    tx: &mut LedgerTx<'_>,
    branch_id: BranchId,
    reference: MovementReference,
) -> LedgerResult<Vec<StockDelta>> {
    let filter = MovementFilter {
        branch_id: Some(branch_id),
        product_id: None,
        reference: Some(reference),
    };
    let mut products = Vec::new();
    for m in tx.movements(&filter)? {
        if !products.contains(&m.product_id) {
            products.push(m.product_id);
        }
    }

    let mut credits = Vec::new();
    for (line, product_id) in products.into_iter().enumerate() {
        let outstanding = tx.net_outbound(StockKey::new(branch_id, product_id), reference)?;
        if outstanding > 0 {
            credits.push(StockDelta {
                product_id,
                delta: outstanding,
                line,
            });
        }
    }
    Ok(credits)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use branchstock_core::{AggregateId, DomainError, ProductId};
    use branchstock_events::InMemoryEventBus;
    use branchstock_inventory::{MovementKind, ReferenceKind};

    use crate::catalog::{InMemoryProductCatalog, ProductDefaults};
    use crate::error::LedgerError;
    use crate::ledger::StockLedger;

    struct Fixture {
        sales: SaleStockIntegrator,
        ledger: StockLedger,
        branch: BranchId,
        p1: ProductId,
        p2: ProductId,
        actor: UserId,
    }

    fn fixture(p1_stock: i64, p2_stock: i64) -> Fixture {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let p1 = ProductId::new();
        let p2 = ProductId::new();
        catalog.upsert(p1, ProductDefaults { initial_stock: p1_stock, min_stock: 0 });
        catalog.upsert(p2, ProductDefaults { initial_stock: p2_stock, min_stock: 0 });
        let ctx = LedgerContext::in_memory(Arc::new(InMemoryEventBus::new()), catalog);

        Fixture {
            sales: SaleStockIntegrator::new(ctx.clone()),
            ledger: StockLedger::new(ctx),
            branch: BranchId::new(),
            p1,
            p2,
            actor: UserId::new(),
        }
    }

    #[test]
    fn debit_merges_lines_and_references_the_sale() {
        let f = fixture(10, 10);
        let sale = SaleId::new(AggregateId::new());

        let records = f
            .sales
            .debit_sale(sale, f.branch, &[SaleLine::new(f.p1, 2), SaleLine::new(f.p1, 3)], f.actor)
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, MovementKind::Outbound);
        assert_eq!(records[0].quantity, 5);
        assert_eq!(records[0].reference.kind, ReferenceKind::Sale);
        assert_eq!(records[0].reference.id, Some(sale.0));
        assert_eq!(f.ledger.get_balance(f.branch, f.p1).unwrap(), 5);
    }

    #[test]
    fn shortfall_on_any_line_debits_nothing() {
        let f = fixture(10, 1);
        let sale = SaleId::new(AggregateId::new());

        let err = f
            .sales
            .debit_sale(sale, f.branch, &[SaleLine::new(f.p1, 4), SaleLine::new(f.p2, 2)], f.actor)
            .unwrap_err();

        match err {
            LedgerError::Domain(DomainError::InsufficientStock(s)) => assert_eq!(s.line, Some(1)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.ledger.get_balance(f.branch, f.p1).unwrap(), 0);
    }

    #[test]
    fn restore_credits_back_what_was_debited() {
        let f = fixture(10, 0);
        let sale = SaleId::new(AggregateId::new());
        let lines = [SaleLine::new(f.p1, 4)];

        f.sales.debit_sale(sale, f.branch, &lines, f.actor).unwrap();
        let records = f.sales.restore_sale(sale, f.branch, &lines, f.actor).unwrap();

        assert_eq!(records[0].kind, MovementKind::Inbound);
        assert_eq!(f.ledger.get_balance(f.branch, f.p1).unwrap(), 10);
    }

    #[test]
    fn edit_applies_only_changed_products() {
        let f = fixture(10, 10);
        let sale = SaleId::new(AggregateId::new());
        let old = [SaleLine::new(f.p1, 2), SaleLine::new(f.p2, 3)];
        f.sales.debit_sale(sale, f.branch, &old, f.actor).unwrap();

        let new = [SaleLine::new(f.p1, 5), SaleLine::new(f.p2, 3)];
        let records = f.sales.edit_sale(sale, f.branch, &old, &new, f.actor).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product_id, f.p1);
        assert_eq!(records[0].quantity, 3);
        assert_eq!(f.ledger.get_balance(f.branch, f.p1).unwrap(), 5);
        assert_eq!(f.ledger.get_balance(f.branch, f.p2).unwrap(), 7);
    }

    #[test]
    fn restoring_twice_credits_only_once() {
        let f = fixture(10, 0);
        let sale = SaleId::new(AggregateId::new());
        let lines = [SaleLine::new(f.p1, 4)];

        f.sales.debit_sale(sale, f.branch, &lines, f.actor).unwrap();
        f.sales.restore_sale(sale, f.branch, &lines, f.actor).unwrap();
        let err = f.sales.restore_sale(sale, f.branch, &lines, f.actor).unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::InvalidQuantity(_))));
        assert_eq!(f.ledger.get_balance(f.branch, f.p1).unwrap(), 10);
    }

    #[test]
    fn restoring_an_unknown_sale_adds_nothing() {
        let f = fixture(10, 0);
        let debited = SaleId::new(AggregateId::new());
        f.sales.debit_sale(debited, f.branch, &[SaleLine::new(f.p1, 4)], f.actor).unwrap();

        let err = f
            .sales
            .restore_sale(SaleId::new(AggregateId::new()), f.branch, &[SaleLine::new(f.p1, 100)], f.actor)
            .unwrap_err();

        match err {
            LedgerError::Domain(DomainError::InvalidQuantity(msg)) => assert!(msg.starts_with("line 1")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.ledger.get_balance(f.branch, f.p1).unwrap(), 6);
    }

    #[test]
    fn restore_is_bounded_per_branch() {
        let f = fixture(10, 0);
        let sale = SaleId::new(AggregateId::new());
        f.sales.debit_sale(sale, f.branch, &[SaleLine::new(f.p1, 4)], f.actor).unwrap();

        let elsewhere = BranchId::new();
        let err = f
            .sales
            .restore_sale(sale, elsewhere, &[SaleLine::new(f.p1, 4)], f.actor)
            .unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::InvalidQuantity(_))));
        assert!(f.ledger.get_entry(elsewhere, f.p1).unwrap().is_none());
    }

    #[test]
    fn restore_without_lines_returns_everything_outstanding() {
        let f = fixture(10, 10);
        let sale = SaleId::new(AggregateId::new());
        let old = [SaleLine::new(f.p1, 5), SaleLine::new(f.p2, 2)];
        f.sales.debit_sale(sale, f.branch, &old, f.actor).unwrap();
        f.sales
            .edit_sale(sale, f.branch, &old, &[SaleLine::new(f.p1, 3), SaleLine::new(f.p2, 2)], f.actor)
            .unwrap();

        let records = f.sales.restore_sale(sale, f.branch, &[], f.actor).unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == MovementKind::Inbound));
        assert_eq!(f.ledger.get_balance(f.branch, f.p1).unwrap(), 10);
        assert_eq!(f.ledger.get_balance(f.branch, f.p2).unwrap(), 10);
        assert!(f.sales.restore_sale(sale, f.branch, &[], f.actor).unwrap().is_empty());
    }

    #[test]
    fn edit_cannot_claim_more_than_was_sold() {
        let f = fixture(10, 0);
        let sale = SaleId::new(AggregateId::new());
        f.sales.debit_sale(sale, f.branch, &[SaleLine::new(f.p1, 2)], f.actor).unwrap();

        let err = f
            .sales
            .edit_sale(sale, f.branch, &[SaleLine::new(f.p1, 9)], &[SaleLine::new(f.p1, 1)], f.actor)
            .unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::InvalidQuantity(_))));
        assert_eq!(f.ledger.get_balance(f.branch, f.p1).unwrap(), 8);
    }
}
