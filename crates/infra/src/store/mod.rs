//! Ledger storage boundary.
//!
//! Stock rows, the movement journal and transfer event streams live behind one
//! [`LedgerBackend`] so a single commit can cover all three. The in-memory
//! backend serves tests and dev; the Postgres one is selected by configuration.

pub mod backend;
pub mod in_memory;
pub mod postgres;
pub mod query;

pub use backend::{
    ChangeSet, CommitReceipt, EntryScope, EntryWrite, LedgerBackend, StoredEvent, StreamAppend,
    UncommittedEvent,
};
pub use in_memory::InMemoryLedgerBackend;
pub use postgres::PostgresLedgerBackend;
pub use query::{MovementFilter, MovementPage, Pagination};
