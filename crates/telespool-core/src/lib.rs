// ABOUTME: Core library for telespool, containing the record type, connection gate, and session trait.
// ABOUTME: This crate defines the shared vocabulary used by the store and pipeline crates.

pub mod gate;
pub mod record;
pub mod session;

pub use gate::{ConnectionGate, GateError, LinkState};
pub use record::Record;
pub use session::{QoS, Session, SessionError};
