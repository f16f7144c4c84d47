use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use branchstock_core::{AggregateId, BranchId, ExpectedVersion, ProductId};
use branchstock_events::{Event, EventEnvelope};
use branchstock_inventory::{MovementRecord, StockEntry, StockKey};

use crate::error::StoreError;
use crate::store::query::{MovementFilter, MovementPage, Pagination};

/// An event ready to be appended to a stream (no sequence number yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Serialize a typed domain event, keeping its metadata.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, StoreError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A persisted stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Position in the aggregate stream, starting at 1.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.event_type.clone(),
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// New state of one stock row plus the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryWrite {
    pub entry: StockEntry,
    pub expected: ExpectedVersion,
}

/// Events to append to one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub aggregate_id: AggregateId,
    pub expected: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

/// Everything one unit of work wants to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub entries: Vec<EntryWrite>,
    pub movements: Vec<MovementRecord>,
    pub streams: Vec<StreamAppend>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.movements.is_empty() && self.streams.iter().all(|s| s.events.is_empty())
    }
}

/// What a successful commit wrote, with store-assigned versions, journal
/// sequence numbers and timestamps filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub entries: Vec<StockEntry>,
    pub movements: Vec<MovementRecord>,
    pub events: Vec<StoredEvent>,
}

impl CommitReceipt {
    pub fn movement(&self, id: Uuid) -> Option<&MovementRecord> {
        self.movements.iter().find(|m| m.id == id)
    }

    pub fn entry(&self, key: StockKey) -> Option<&StockEntry> {
        self.entries.iter().find(|e| e.key() == key)
    }
}

/// Which stock rows to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryScope {
    Branch(BranchId),
    Product(ProductId),
}

/// Ledger persistence.
///
/// `commit` is all-or-nothing: every `EntryWrite` and `StreamAppend` is checked
/// against its expected version first and any mismatch fails the whole change
/// set with [`StoreError::Conflict`]. On success the store assigns row
/// versions (+1), journal sequence numbers and a commit timestamp that never
/// goes backwards, so journal order and time order agree.
pub trait LedgerBackend: Send + Sync {
    fn entry(&self, key: StockKey) -> Result<Option<StockEntry>, StoreError>;

    /// Rows of one branch (ordered by product) or one product (ordered by branch).
    fn entries(&self, scope: EntryScope) -> Result<Vec<StockEntry>, StoreError>;

    /// Matching movements, newest first.
    fn movements(&self, filter: &MovementFilter, pagination: Pagination) -> Result<MovementPage, StoreError>;

    /// Every movement of one pair, oldest first.
    fn movement_history(&self, key: StockKey) -> Result<Vec<MovementRecord>, StoreError>;

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, StoreError>;

    /// Ids of every stream of the given aggregate type, in creation order.
    fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>, StoreError>;

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError>;
}
