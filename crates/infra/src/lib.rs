//! Infrastructure layer: ledger storage, unit of work and the stock services.

pub mod catalog;
pub mod config;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod publish;
pub mod sales;
pub mod store;
pub mod transfers;
pub mod uow;


pub use catalog::{InMemoryProductCatalog, ProductCatalog, ProductDefaults};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult, StoreError};
pub use journal::{MovementJournal, Reconciliation};
pub use ledger::StockLedger;
pub use sales::SaleStockIntegrator;
pub use store::{
    InMemoryLedgerBackend, LedgerBackend, MovementFilter, MovementPage, Pagination, PostgresLedgerBackend,
};
pub use transfers::{TransferFilter, TransferLineView, TransferView, TransferWorkflow};
pub use uow::{Committed, LedgerContext, LedgerTx};
