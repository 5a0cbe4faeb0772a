//! Fault Module
//!
//! Poisson-driven failure model. Once armed by a remote command it samples
//! a draw on every heartbeat and declares a failure that forces a reconnect.

mod simulator;

pub use simulator::{
    poisson_draw, FaultSimulator, FaultState, FaultVerdict, KnuthPoisson, OccurrenceSource,
};

#[cfg(test)]
pub(crate) use simulator::tests::ScriptedSource;
