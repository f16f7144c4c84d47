use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC.
///
/// Roles are opaque strings at this layer; the mapping to permissions belongs
/// to the caller's policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Full access.
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    /// Branch manager.
    pub const MANAGER: Role = Role(Cow::Borrowed("encargado"));
    /// Salesperson.
    pub const SELLER: Role = Role(Cow::Borrowed("vendedor"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
