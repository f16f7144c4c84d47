use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use branchstock_core::AggregateId;
use branchstock_inventory::{MovementRecord, StockEntry, StockKey};

use crate::error::StoreError;
use crate::store::backend::{ChangeSet, CommitReceipt, EntryScope, LedgerBackend, StoredEvent};
use crate::store::query::{MovementFilter, MovementPage, Pagination};

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<StockKey, StockEntry>,
    journal: Vec<MovementRecord>,
    streams: HashMap<AggregateId, Vec<StoredEvent>>,
    stream_order: Vec<(String, AggregateId)>,
    last_commit_at: Option<DateTime<Utc>>,
}

impl State {
    fn entry_version(&self, key: &StockKey) -> u64 {
        self.entries.get(key).map(|e| e.version).unwrap_or(0)
    }

    fn stream_version(&self, aggregate_id: &AggregateId) -> u64 {
        self.streams
            .get(aggregate_id)
            .and_then(|s| s.last())
            .map(|e| e.sequence_number)
            .unwrap_or(0)
    }

    fn commit_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_commit_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_commit_at = Some(stamp);
        stamp
    }
}

/// In-memory ledger backend.
///
/// One `RwLock` guards rows, journal and streams, so a commit is atomic with
/// respect to every reader. Intended for tests, dev and single-process use.
#[derive(Debug, Default)]
pub struct InMemoryLedgerBackend {
    state: RwLock<State>,
}

impl InMemoryLedgerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }
}

impl LedgerBackend for InMemoryLedgerBackend {
    fn entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError> {
        Ok(self.read()?.entries.get(&key).cloned())
    }

    fn entries(&self, scope: EntryScope) -> Result<Vec<StockEntry>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<StockEntry> = state
            .entries
            .values()
            .filter(|e| match scope {
                EntryScope::Branch(b) => e.branch_id == b,
                EntryScope::Product(p) => e.product_id == p,
            })
            .cloned()
            .collect();

        if let EntryScope::Product(_) = scope {
            rows.sort_by_key(|e| e.branch_id);
        }
        Ok(rows)
    }

    fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, StoreError> {
        let state = self.read()?;
        let matching: Vec<&MovementRecord> = state.journal.iter().rev().filter(|r| filter.matches(r)).collect();

        let total = matching.len() as u64;
        let records: Vec<MovementRecord> = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        let has_more = u64::from(pagination.offset) + (records.len() as u64) < total;

        Ok(MovementPage {
            records,
            total,
            pagination,
            has_more,
        })
    }

    fn movement_history(&self, key: StockKey) -> Result<Vec<MovementRecord>, StoreError> {
        let state = self.read()?;
        Ok(state
            .journal
            .iter()
            .filter(|r| r.branch_id == key.branch_id && r.product_id == key.product_id)
            .cloned()
            .collect())
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, StoreError> {
        Ok(self.read()?.streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, StoreError> {
        Ok(self
            .read()?
            .stream_order
            .iter()
            .filter(|(t, _)| t == aggregate_type)
            .map(|(_, id)| *id)
            .collect())
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;

        // Verify everything before touching anything.
        for w in &changes.entries {
            let key = w.entry.key();
            let current = state.entry_version(&key);
            if !w.expected.matches(current) {
                return Err(StoreError::Conflict(format!(
                    "stock row {key}: expected {:?}, found {current}",
                    w.expected
                )));
            }
        }
        for s in &changes.streams {
            let current = state.stream_version(&s.aggregate_id);
            if !s.expected.matches(current) {
                return Err(StoreError::Conflict(format!(
                    "stream {}: expected {:?}, found {current}",
                    s.aggregate_id, s.expected
                )));
            }
            if let Some((idx, _)) = s.events.iter().enumerate().find(|(_, e)| e.aggregate_id != s.aggregate_id) {
                return Err(StoreError::InvalidCommit(format!(
                    "stream {} batch contains a foreign event at index {idx}",
                    s.aggregate_id
                )));
            }
        }

        let now = state.commit_timestamp();
        let mut receipt = CommitReceipt::default();

        for w in changes.entries {
            let mut entry = w.entry;
            entry.version = state.entry_version(&entry.key()) + 1;
            entry.updated_at = now;
            state.entries.insert(entry.key(), entry.clone());
            receipt.entries.push(entry);
        }

        for mut record in changes.movements {
            record.sequence = state.journal.len() as u64 + 1;
            record.occurred_at = now;
            state.journal.push(record.clone());
            receipt.movements.push(record);
        }

        for s in changes.streams {
            let mut next = state.stream_version(&s.aggregate_id) + 1;
            for e in s.events {
                if next == 1 {
                    state.stream_order.push((e.aggregate_type.clone(), s.aggregate_id));
                }
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                state.streams.entry(s.aggregate_id).or_default().push(stored.clone());
                receipt.events.push(stored);
            }
        }

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_core::{BranchId, ExpectedVersion, ProductId, UserId};
    use branchstock_inventory::{MovementReference, NegativeStockPolicy};

    use crate::store::backend::EntryWrite;

    fn write(entry: StockEntry, expected: ExpectedVersion) -> ChangeSet {
        ChangeSet {
            entries: vec![EntryWrite { entry, expected }],
            ..ChangeSet::default()
        }
    }

    #[test]
    fn commit_assigns_versions_and_detects_stale_writes() {
        let backend = InMemoryLedgerBackend::new();
        let key = StockKey::new(BranchId::new(), ProductId::new());
        let entry = StockEntry::new(key, 5, 0, Utc::now());

        let receipt = backend.commit(write(entry.clone(), ExpectedVersion::NoStream)).unwrap();
        assert_eq!(receipt.entries[0].version, 1);

        // A second writer that also read "absent" loses.
        let err = backend.commit(write(entry, ExpectedVersion::NoStream)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(backend.entry(key).unwrap().unwrap().quantity, 5);
    }

    #[test]
    fn failed_commit_writes_nothing() {
        let backend = InMemoryLedgerBackend::new();
        let a = StockKey::new(BranchId::new(), ProductId::new());
        let b = StockKey::new(BranchId::new(), ProductId::new());
        let row_a = StockEntry::new(a, 10, 0, Utc::now());
        let change = row_a.plan_adjust(-3, NegativeStockPolicy::Reject).unwrap().unwrap();

        let changes = ChangeSet {
            entries: vec![
                EntryWrite { entry: row_a.clone(), expected: ExpectedVersion::NoStream },
                EntryWrite { entry: StockEntry::new(b, 1, 0, Utc::now()), expected: ExpectedVersion::Exact(4) },
            ],
            movements: vec![change.to_record("x", MovementReference::adjustment(), UserId::new(), Utc::now())],
            streams: Vec::new(),
        };

        assert!(backend.commit(changes).is_err());
        assert!(backend.entry(a).unwrap().is_none());
        assert!(backend.movement_history(a).unwrap().is_empty());
    }

    #[test]
    fn journal_sequence_and_time_are_monotonic() {
        let backend = InMemoryLedgerBackend::new();
        let key = StockKey::new(BranchId::new(), ProductId::new());
        let actor = UserId::new();
        let mut row = StockEntry::new(key, 0, 0, Utc::now());

        for (i, delta) in [5i64, -2, 7].into_iter().enumerate() {
            let change = row.plan_adjust(delta, NegativeStockPolicy::Reject).unwrap().unwrap();
            let record = change.to_record("x", MovementReference::adjustment(), actor, Utc::now());
            let expected = if i == 0 { ExpectedVersion::NoStream } else { ExpectedVersion::Exact(row.version) };
            row.apply(&change, Utc::now());
            let receipt = backend
                .commit(ChangeSet {
                    entries: vec![EntryWrite { entry: row.clone(), expected }],
                    movements: vec![record],
                    streams: Vec::new(),
                })
                .unwrap();
            row = receipt.entries[0].clone();
        }

        let history = backend.movement_history(key).unwrap();
        assert_eq!(history.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(history.windows(2).all(|w| w[0].occurred_at <= w[1].occurred_at));

        let page = backend
            .movements(&MovementFilter { branch_id: Some(key.branch_id), ..Default::default() }, Pagination::new(Some(2), None))
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(page.has_more);
        assert_eq!(page.records[0].sequence, 3);
    }
}
