use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (e.g. "stock.adjust").
///
/// The wildcard `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const ALL: Permission = Permission(Cow::Borrowed("*"));

    pub const STOCK_READ: Permission = Permission(Cow::Borrowed("stock.read"));
    pub const STOCK_ADJUST: Permission = Permission(Cow::Borrowed("stock.adjust"));
    pub const STOCK_INITIALIZE: Permission = Permission(Cow::Borrowed("stock.initialize"));

    pub const TRANSFERS_READ: Permission = Permission(Cow::Borrowed("transfers.read"));
    pub const TRANSFERS_CREATE: Permission = Permission(Cow::Borrowed("transfers.create"));
    pub const TRANSFERS_RESOLVE: Permission = Permission(Cow::Borrowed("transfers.resolve"));
    pub const TRANSFERS_RETURN: Permission = Permission(Cow::Borrowed("transfers.return"));
    pub const TRANSFERS_CANCEL: Permission = Permission(Cow::Borrowed("transfers.cancel"));

    pub const SALES_STOCK: Permission = Permission(Cow::Borrowed("sales.stock"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
