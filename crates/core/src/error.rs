//! Domain error model.

use thiserror::Error;

use crate::id::{BranchId, ProductId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Details of a debit that would drive a balance below zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockShortfall {
    pub branch_id: BranchId,
    pub product_id: ProductId,
    pub available: i64,
    pub requested: i64,
    /// Zero-based index of the failing line in a multi-line operation.
    pub line: Option<usize>,
}

impl core::fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "product {} at branch {}: available {}, requested {}",
            self.product_id, self.branch_id, self.available, self.requested
        )?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line + 1)?;
        }
        Ok(())
    }
}

/// Domain-level error.
///
/// Every ledger, transfer and sale-stock operation fails with one of these.
/// None of them leave partial side effects behind; only
/// `ConcurrentModification` may be retried automatically by a caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Negative, zero or out-of-range quantity input.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// The operation would drive a balance negative.
    #[error("insufficient stock: {0}")]
    InsufficientStock(StockShortfall),

    /// Transfer origin and destination are the same branch.
    #[error("origin and destination are the same branch ({0})")]
    SameBranch(BranchId),

    /// Workflow action not valid in the current state.
    #[error("invalid transition: cannot {action} a transfer in state '{from}'")]
    InvalidTransition { from: String, action: String },

    /// Unknown transfer/branch/product reference.
    #[error("{0} not found")]
    NotFound(String),

    /// Optimistic retry exhausted (stale version on commit).
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn insufficient_stock(
        branch_id: BranchId,
        product_id: ProductId,
        available: i64,
        requested: i64,
    ) -> Self {
        Self::InsufficientStock(StockShortfall {
            branch_id,
            product_id,
            available,
            requested,
            line: None,
        })
    }

    pub fn invalid_transition(from: impl Into<String>, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            action: action.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn concurrent(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Attach the index of the failing line of a multi-line operation.
    pub fn at_line(self, line: usize) -> Self {
        match self {
            Self::InsufficientStock(mut s) => {
                s.line = Some(line);
                Self::InsufficientStock(s)
            }
            Self::InvalidQuantity(msg) => Self::InvalidQuantity(format!("line {}: {msg}", line + 1)),
            other => other,
        }
    }

    /// Whether a caller may safely retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_line_annotates_shortfall() {
        let branch = BranchId::new();
        let product = ProductId::new();
        let err = DomainError::insufficient_stock(branch, product, 0, 5).at_line(1);

        match &err {
            DomainError::InsufficientStock(s) => assert_eq!(s.line, Some(1)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().ends_with("(line 2)"));
    }

    #[test]
    fn only_concurrent_modification_is_retryable() {
        assert!(DomainError::concurrent("stale").is_retryable());
        assert!(!DomainError::invalid_quantity("negative").is_retryable());
        assert!(!DomainError::not_found("transfer").is_retryable());
    }
}
