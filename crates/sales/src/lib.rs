//! Sale-side stock arithmetic.
//!
//! The external sale flow owns sales; this crate only turns sale lines into the
//! per-product deltas the ledger must apply when a sale is created, restored or
//! edited. Pure logic, no IO.

pub mod sale;

pub use sale::{SaleId, SaleLine, StockDelta, debit_deltas, edit_deltas, merge_lines, restore_deltas};
