//! Bridge session lifecycle.
//!
//! The controller owns the one active LAN/tunnel pairing and serializes
//! every start and stop against it.

mod controller;

pub use controller::{BridgeSettings, BridgeStatus, SessionController, StartOutcome, StopOutcome};
