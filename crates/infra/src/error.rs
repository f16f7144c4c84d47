//! Infrastructure error model.

use thiserror::Error;

use branchstock_core::DomainError;
use branchstock_inventory::JournalBreak;

/// Storage-level failure, distinct from domain rule violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A row or stream changed since it was read. Retried by the unit of work.
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    #[error("ledger storage lock poisoned")]
    Poisoned,

    #[error("stored event (de)serialization failed: {0}")]
    Serialization(String),

    /// The backing database rejected or could not serve the request.
    #[error("ledger storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    #[error("movement journal is corrupt: {0}")]
    JournalBroken(#[from] JournalBreak),
}

/// Error returned by every ledger service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(e) => Some(e),
            LedgerError::Store(_) => None,
        }
    }

    /// Attach the failing line of a multi-line operation.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            LedgerError::Domain(e) => LedgerError::Domain(e.at_line(line)),
            other => other,
        }
    }

    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Store(StoreError::Conflict(_)))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
