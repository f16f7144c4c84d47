//! Tracing and logging setup shared by the binaries.

/// Initialize process-wide tracing with JSON output and an `info` default.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&LogSettings::default());
}

pub use tracing::{LogFormat, LogSettings};

/// Tracing configuration (filters, layers).
pub mod tracing;
