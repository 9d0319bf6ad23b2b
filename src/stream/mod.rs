//! Stream module - per-interaction lifecycle and requestN credit.
//!
//! Provides:
//! - [`StreamMachine`] - legal frame sequences for one side of a stream
//! - [`Credit`] - saturating flow-control counter

mod credit;
mod state;

pub use credit::Credit;
pub use state::{InteractionKind, Inbound, Outbound, Role, StreamMachine, StreamState};
