//! `branchstock-events`: event mechanics shared by the ledger and the transfer workflow.
//!
//! Committed stock movements and transfer state changes are wrapped in an
//! [`EventEnvelope`] and published on an [`EventBus`] so notification delivery can
//! happen outside the ledger.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
