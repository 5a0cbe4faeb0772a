//! Connection management for the persistent device link
//!
//! This module handles:
//! - Dialing the backend through a pluggable transport
//! - Registration and the heartbeat loop
//! - Fault-driven and commanded reconnection
//! - Power-off and shutdown termination

mod controller;

pub use controller::{ConnectionConfig, ConnectionController, RunOutcome};
