//! Unit of work with optimistic retry.
//!
//! Every mutating ledger operation runs as a closure over a [`LedgerTx`]. The
//! transaction reads rows through to the backend, remembers the version each
//! row was read at and buffers all writes. On commit the backend re-checks
//! those versions; if another writer got there first the closure is run again
//! against fresh state, up to `max_commit_attempts` times.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use branchstock_core::{AggregateId, DomainError, ExpectedVersion, UserId};
use branchstock_events::{Event, EventEnvelope, InMemoryEventBus};
use branchstock_inventory::{
    InitialStock, MovementRecord, MovementReference, NegativeStockPolicy, StockChange, StockEntry, StockKey,
};

use crate::catalog::{InMemoryProductCatalog, ProductCatalog};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::publish::{EnvelopePublisher, publish_receipt};
use crate::store::{
    ChangeSet, CommitReceipt, EntryWrite, InMemoryLedgerBackend, LedgerBackend, MovementFilter, Pagination, StreamAppend,
    UncommittedEvent,
};

/// Reason recorded on rows seeded from the catalog or by bulk initialization.
pub const INITIALIZATION_REASON: &str = "Inicialización de stock";

/// Shared handles every ledger service works through.
#[derive(Clone)]
pub struct LedgerContext {
    backend: Arc<dyn LedgerBackend>,
    publisher: Arc<dyn EnvelopePublisher>,
    catalog: Arc<dyn ProductCatalog>,
    config: LedgerConfig,
}

impl LedgerContext {
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        publisher: Arc<dyn EnvelopePublisher>,
        catalog: Arc<dyn ProductCatalog>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            backend,
            publisher,
            catalog,
            config,
        }
    }

    /// Fully in-memory wiring with default configuration.
    pub fn in_memory(
        bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>,
        catalog: Arc<InMemoryProductCatalog>,
    ) -> Self {
        Self::new(
            Arc::new(InMemoryLedgerBackend::new()),
            bus,
            catalog,
            LedgerConfig::default(),
        )
    }

    pub fn backend(&self) -> &dyn LedgerBackend {
        self.backend.as_ref()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Run `work` as one atomic unit, retrying on version conflicts.
    ///
    /// Domain errors abort immediately and nothing is written. Publication of
    /// the committed movements and events happens after the commit.
    pub fn transact<T, F>(&self, actor: UserId, mut work: F) -> LedgerResult<Committed<T>>
    where
        F: FnMut(&mut LedgerTx<'_>) -> LedgerResult<T>,
    {
        let attempts = self.config.max_commit_attempts.max(1);

        for attempt in 1..=attempts {
            let mut tx = LedgerTx::new(self.backend.as_ref(), self.catalog.as_ref(), actor);
            let value = work(&mut tx)?;
            let changes = tx.into_changes();

            if changes.is_empty() {
                return Ok(Committed {
                    value,
                    receipt: CommitReceipt::default(),
                });
            }

            match self.backend.commit(changes) {
                Ok(receipt) => {
                    debug!(
                        attempt,
                        entries = receipt.entries.len(),
                        movements = receipt.movements.len(),
                        events = receipt.events.len(),
                        "ledger unit of work committed"
                    );
                    publish_receipt(self.publisher.as_ref(), &receipt);
                    return Ok(Committed { value, receipt });
                }
                Err(e) => {
                    let e = LedgerError::from(e);
                    if !e.is_conflict() {
                        return Err(e);
                    }
                    warn!(attempt, max_attempts = attempts, error = %e, "ledger commit conflict; retrying");
                }
            }
        }

        Err(DomainError::concurrent(format!("commit still conflicting after {attempts} attempts")).into())
    }
}

impl core::fmt::Debug for LedgerContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LedgerContext").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Value produced by a committed unit of work plus what the store wrote.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub receipt: CommitReceipt,
}

#[derive(Debug)]
struct TxRow {
    entry: StockEntry,
    expected: ExpectedVersion,
    dirty: bool,
}

/// Buffered, read-through view of the ledger for one attempt of a unit of work.
pub struct LedgerTx<'a> {
    backend: &'a dyn LedgerBackend,
    catalog: &'a dyn ProductCatalog,
    actor: UserId,
    rows: BTreeMap<StockKey, TxRow>,
    movements: Vec<MovementRecord>,
    streams: Vec<StreamAppend>,
}

impl<'a> LedgerTx<'a> {
    fn new(backend: &'a dyn LedgerBackend, catalog: &'a dyn ProductCatalog, actor: UserId) -> Self {
        Self {
            backend,
            catalog,
            actor,
            rows: BTreeMap::new(),
            movements: Vec::new(),
            streams: Vec::new(),
        }
    }

    pub fn backend(&self) -> &'a dyn LedgerBackend {
        self.backend
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    /// Current balance as seen by this transaction; 0 when the row does not exist.
    pub fn balance(&mut self, key: StockKey) -> LedgerResult<i64> {
        if let Some(row) = self.rows.get(&key) {
            return Ok(row.entry.quantity);
        }
        match self.backend.entry(key)? {
            Some(entry) => {
                let quantity = entry.quantity;
                self.rows.insert(
                    key,
                    TxRow {
                        expected: ExpectedVersion::Exact(entry.version),
                        entry,
                        dirty: false,
                    },
                );
                Ok(quantity)
            }
            None => Ok(0),
        }
    }

    /// The single lazy-creation step: load the row, or create it from the
    /// catalog defaults. A non-zero default is journaled as an
    /// `inicializacion` entrada so replay from 0 explains the balance.
    pub fn ensure_entry(&mut self, key: StockKey) -> LedgerResult<StockEntry> {
        let backend = self.backend;
        let catalog = self.catalog;
        let actor = self.actor;

        let row = match self.rows.entry(key) {
            Entry::Occupied(o) => o.into_mut(),
            Entry::Vacant(v) => match backend.entry(key)? {
                Some(entry) => v.insert(TxRow {
                    expected: ExpectedVersion::Exact(entry.version),
                    entry,
                    dirty: false,
                }),
                None => {
                    let defaults = catalog.defaults(key.product_id).unwrap_or_default();
                    let initial = defaults.initial_stock.max(0);
                    let now = Utc::now();

                    if initial > 0 {
                        let seed = StockChange {
                            key,
                            previous: 0,
                            new: initial,
                        };
                        self.movements.push(seed.to_record(
                            INITIALIZATION_REASON,
                            MovementReference::initialization(),
                            actor,
                            now,
                        ));
                    }

                    v.insert(TxRow {
                        entry: StockEntry::new(key, initial, defaults.min_stock.max(0), now),
                        expected: ExpectedVersion::NoStream,
                        dirty: true,
                    })
                }
            },
        };

        Ok(row.entry.clone())
    }

    /// Relative change. Returns the id of the recorded movement, `None` for a
    /// zero delta.
    pub fn adjust(
        &mut self,
        key: StockKey,
        delta: i64,
        policy: NegativeStockPolicy,
        reason: &str,
        reference: MovementReference,
    ) -> LedgerResult<Option<Uuid>> {
        self.ensure_entry(key)?;
        let change = self.with_row(key, |entry| entry.plan_adjust(delta, policy))?;
        Ok(change.map(|c| self.record(c, reason, reference)))
    }

    /// Absolute change. `None` when the balance already equals `quantity`.
    pub fn set(
        &mut self,
        key: StockKey,
        quantity: i64,
        reason: &str,
        reference: MovementReference,
    ) -> LedgerResult<Option<Uuid>> {
        if quantity < 0 {
            return Err(DomainError::invalid_quantity(format!("quantity must not be negative (got {quantity})")).into());
        }
        self.ensure_entry(key)?;
        let change = self.with_row(key, |entry| entry.plan_set(quantity))?;
        Ok(change.map(|c| self.record(c, reason, reference)))
    }

    /// Update the reorder threshold. Not a quantity change: no movement.
    pub fn set_minimum(&mut self, key: StockKey, min_stock: i64) -> LedgerResult<()> {
        if min_stock < 0 {
            return Err(DomainError::invalid_quantity(format!("minimum stock must not be negative (got {min_stock})")).into());
        }
        self.ensure_entry(key)?;
        if let Some(row) = self.rows.get_mut(&key) {
            if row.entry.min_stock != min_stock {
                row.entry.min_stock = min_stock;
                row.dirty = true;
            }
        }
        Ok(())
    }

    /// Create a row with explicit values if it does not exist yet.
    ///
    /// Returns whether a row was created; existing rows are left untouched.
    pub fn initialize(&mut self, key: StockKey, initial: &InitialStock) -> LedgerResult<bool> {
        if self.rows.contains_key(&key) || self.backend.entry(key)?.is_some() {
            return Ok(false);
        }

        let now = Utc::now();
        if initial.quantity > 0 {
            let seed = StockChange {
                key,
                previous: 0,
                new: initial.quantity,
            };
            self.movements.push(seed.to_record(
                INITIALIZATION_REASON,
                MovementReference::initialization(),
                self.actor,
                now,
            ));
        }

        self.rows.insert(
            key,
            TxRow {
                entry: StockEntry::new(key, initial.quantity, initial.min_stock, now),
                expected: ExpectedVersion::NoStream,
                dirty: true,
            },
        );
        Ok(true)
    }

    /// Journal records matching `filter`, oldest first, followed by the ones
    /// this transaction has buffered.
    ///
    /// The journal is not version checked by itself. Read the rows a decision
    /// depends on before calling this, as [`Self::net_outbound`] does.
    pub fn movements(&self, filter: &MovementFilter) -> LedgerResult<Vec<MovementRecord>> {
        let mut records = self.backend.movements(filter, Pagination::unbounded())?.records;
        records.reverse();
        records.extend(self.movements.iter().filter(|m| filter.matches(m)).cloned());
        Ok(records)
    }

    /// Units still taken out of `key` by the movements carrying `reference`
    /// (salidas minus entradas).
    ///
    /// The row is loaded first, so a commit touching the same pair between
    /// this read and ours fails the version check and the unit of work is
    /// re-run against the newer journal.
    pub fn net_outbound(&mut self, key: StockKey, reference: MovementReference) -> LedgerResult<i64> {
        self.ensure_entry(key)?;
        let filter = MovementFilter {
            branch_id: Some(key.branch_id),
            product_id: Some(key.product_id),
            reference: Some(reference),
        };
        Ok(self
            .movements(&filter)?
            .iter()
            .fold(0i64, |out, m| out.saturating_sub(m.signed_delta())))
    }

    /// Queue typed events for one stream, checked against `expected` at commit.
    pub fn append_events<E>(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        expected: ExpectedVersion,
        events: &[E],
    ) -> LedgerResult<()>
    where
        E: Event + Serialize,
    {
        let events = events
            .iter()
            .map(|e| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), e))
            .collect::<Result<Vec<_>, _>>()?;

        self.streams.push(StreamAppend {
            aggregate_id,
            expected,
            events,
        });
        Ok(())
    }

    fn with_row(
        &mut self,
        key: StockKey,
        plan: impl FnOnce(&StockEntry) -> Result<Option<StockChange>, DomainError>,
    ) -> LedgerResult<Option<StockChange>> {
        let Some(row) = self.rows.get_mut(&key) else {
            return Err(DomainError::not_found(format!("stock row {key}")).into());
        };

        let change = plan(&row.entry)?;
        if let Some(c) = &change {
            row.entry.apply(c, Utc::now());
            row.dirty = true;
        }
        Ok(change)
    }

    fn record(&mut self, change: StockChange, reason: &str, reference: MovementReference) -> Uuid {
        let record = change.to_record(reason, reference, self.actor, Utc::now());
        let id = record.id;
        self.movements.push(record);
        id
    }

    fn into_changes(self) -> ChangeSet {
        ChangeSet {
            entries: self
                .rows
                .into_values()
                .filter(|r| r.dirty)
                .map(|r| EntryWrite {
                    entry: r.entry,
                    expected: r.expected,
                })
                .collect(),
            movements: self.movements,
            streams: self.streams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_core::{BranchId, ProductId};

    use crate::catalog::ProductDefaults;
    use crate::error::StoreError;
    use crate::store::{EntryScope, MovementFilter, MovementPage, Pagination, StoredEvent};

    /// Backend that reports a conflict for the first `fail` commits.
    struct Flaky {
        inner: InMemoryLedgerBackend,
        fail: std::sync::atomic::AtomicU32,
    }

    impl LedgerBackend for Flaky {
        fn entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError> {
            self.inner.entry(key)
        }
        fn entries(&self, scope: EntryScope) -> Result<Vec<StockEntry>, StoreError> {
            self.inner.entries(scope)
        }
        fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, StoreError> {
            self.inner.movements(filter, pagination)
        }
        fn movement_history(&self, key: StockKey) -> Result<Vec<MovementRecord>, StoreError> {
            self.inner.movement_history(key)
        }
        fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, StoreError> {
            self.inner.load_stream(aggregate_id)
        }
        fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, StoreError> {
            self.inner.stream_ids(aggregate_type)
        }
        fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
            use std::sync::atomic::Ordering;
            if self.fail.load(Ordering::SeqCst) > 0 {
                self.fail.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Conflict("injected".to_string()));
            }
            self.inner.commit(changes)
        }
    }

    fn context(fail: u32, catalog: Arc<InMemoryProductCatalog>) -> LedgerContext {
        let backend = Flaky {
            inner: InMemoryLedgerBackend::new(),
            fail: std::sync::atomic::AtomicU32::new(fail),
        };
        let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> = Arc::new(InMemoryEventBus::new());
        LedgerContext::new(Arc::new(backend), bus, catalog, LedgerConfig::default())
    }

    #[test]
    fn conflicts_are_retried_until_success() {
        let ctx = context(3, Arc::new(InMemoryProductCatalog::new()));
        let key = StockKey::new(BranchId::new(), ProductId::new());
        let mut runs = 0;

        let committed = ctx
            .transact(UserId::new(), |tx| {
                runs += 1;
                tx.adjust(key, 4, NegativeStockPolicy::Reject, "alta", MovementReference::adjustment())
            })
            .unwrap();

        assert_eq!(runs, 4);
        assert!(committed.value.is_some());
        assert_eq!(ctx.backend().entry(key).unwrap().unwrap().quantity, 4);
    }

    #[test]
    fn exhausted_retries_surface_concurrent_modification() {
        let ctx = context(100, Arc::new(InMemoryProductCatalog::new()));
        let key = StockKey::new(BranchId::new(), ProductId::new());

        let err = ctx
            .transact(UserId::new(), |tx| {
                tx.adjust(key, 1, NegativeStockPolicy::Reject, "alta", MovementReference::adjustment())
            })
            .unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::ConcurrentModification(_))));
    }

    #[test]
    fn lazy_creation_journals_catalog_default() {
        let catalog = Arc::new(InMemoryProductCatalog::new());
        let product = ProductId::new();
        catalog.upsert(product, ProductDefaults { initial_stock: 12, min_stock: 3 });
        let ctx = context(0, catalog);
        let key = StockKey::new(BranchId::new(), product);

        let committed = ctx.transact(UserId::new(), |tx| tx.ensure_entry(key)).unwrap();

        assert_eq!(committed.value.quantity, 12);
        assert_eq!(committed.value.min_stock, 3);
        assert_eq!(committed.receipt.movements.len(), 1);
        assert_eq!(committed.receipt.movements[0].new_stock, 12);
    }

    #[test]
    fn domain_error_discards_buffered_writes() {
        let ctx = context(0, Arc::new(InMemoryProductCatalog::new()));
        let a = StockKey::new(BranchId::new(), ProductId::new());
        let b = StockKey::new(BranchId::new(), ProductId::new());

        let err = ctx
            .transact(UserId::new(), |tx| {
                tx.adjust(a, 5, NegativeStockPolicy::Reject, "alta", MovementReference::adjustment())?;
                tx.adjust(b, -1, NegativeStockPolicy::Reject, "baja", MovementReference::adjustment())
            })
            .unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::InsufficientStock(_))));
        assert!(ctx.backend().entry(a).unwrap().is_none());
    }
}
