//! Inter-branch transfer workflow domain module (event-sourced).
//!
//! The [`Transfer`] aggregate decides state transitions and which stock flows
//! they imply; it never touches the ledger itself.

pub mod transfer;

pub use transfer::{
    ApproveTransfer, CancelTransfer, RejectTransfer, RequestTransfer, ReturnStock, StockFlow,
    Transfer, TransferApproved, TransferCancelled, TransferCommand, TransferEvent, TransferId,
    TransferLine, TransferRejected, TransferRequested, TransferStatus, TransferStockReturned,
};
