use serde::Deserialize;

/// Tunables of the ledger services.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Attempts per unit of work before giving up with `ConcurrentModification`.
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,

    /// Journal page size when the caller gives none.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound for any journal page.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

fn default_max_commit_attempts() -> u32 {
    8
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    1000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: default_max_commit_attempts(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}
