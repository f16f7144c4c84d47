//! Stock ledger domain rules (pure, no IO).
//!
//! A [`StockEntry`] is the authoritative quantity of one product at one branch.
//! Every change to it is planned here as a [`StockChange`] and described by an
//! immutable [`MovementRecord`]; infrastructure commits both together.

pub mod movement;
pub mod stock;

pub use movement::{
    JournalBreak, MovementKind, MovementRecord, MovementRecorded, MovementReference, ReferenceKind,
    replay,
};
pub use stock::{InitialStock, NegativeStockPolicy, StockChange, StockEntry, StockKey};
