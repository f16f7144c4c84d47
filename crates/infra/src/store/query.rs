//! Journal query parameters.

use serde::{Deserialize, Serialize};

use branchstock_core::{BranchId, ProductId};
use branchstock_inventory::{MovementRecord, MovementReference};

use crate::config::LedgerConfig;

/// Pagination parameters for journal queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of records to return.
    pub limit: u32,
    /// Offset (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self::bounded(limit, offset, &LedgerConfig::default())
    }

    /// Every matching record; for internal reads, never for client pages.
    pub fn unbounded() -> Self {
        Self {
            limit: u32::MAX,
            offset: 0,
        }
    }

    /// Apply the configured default and cap.
    pub fn bounded(limit: Option<u32>, offset: Option<u32>, config: &LedgerConfig) -> Self {
        Self {
            limit: limit.unwrap_or(config.default_page_size).min(config.max_page_size),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Which movements to return. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub branch_id: Option<BranchId>,
    pub product_id: Option<ProductId>,
    pub reference: Option<MovementReference>,
}

impl MovementFilter {
    pub fn matches(&self, record: &MovementRecord) -> bool {
        self.branch_id.is_none_or(|b| b == record.branch_id)
            && self.product_id.is_none_or(|p| p == record.product_id)
            && self.reference.is_none_or(|r| r == record.reference)
    }
}

/// One page of journal records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementPage {
    pub records: Vec<MovementRecord>,
    /// Matches across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}
