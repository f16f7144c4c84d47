//! Product catalog collaborator.
//!
//! The catalog is owned elsewhere; the ledger only needs the defaults used when
//! a (branch, product) row is created lazily.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use branchstock_core::ProductId;

/// Defaults a new stock row starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDefaults {
    /// Global initial stock of the product.
    pub initial_stock: i64,
    pub min_stock: i64,
}

pub trait ProductCatalog: Send + Sync {
    /// `None` when the catalog does not know the product; the row then starts at 0.
    fn defaults(&self, product_id: ProductId) -> Option<ProductDefaults>;
}

/// In-memory catalog for tests, dev and the standalone binary.
#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<HashMap<ProductId, ProductDefaults>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, product_id: ProductId, defaults: ProductDefaults) {
        if let Ok(mut products) = self.products.write() {
            products.insert(product_id, defaults);
        }
    }
}

impl ProductCatalog for InMemoryProductCatalog {
    fn defaults(&self, product_id: ProductId) -> Option<ProductDefaults> {
        self.products.read().ok()?.get(&product_id).copied()
    }
}
