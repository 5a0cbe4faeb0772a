//! Fault Simulator
//!
//! Holds the arming flag and turns Poisson draws into failure verdicts on
//! each heartbeat tick.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simiot_shared::timing;
use tracing::{error, warn};

/// Draw from Poisson(lambda) with Knuth's multiplication method
pub fn poisson_draw<R: Rng>(lambda: f64, rng: &mut R) -> u32 {
    let limit = (-lambda).exp();
    let mut p = 1.0_f64;
    let mut k = 0_u32;
    loop {
        k += 1;
        p *= rng.random::<f64>();
        if p <= limit {
            return k - 1;
        }
    }
}

/// Source of occurrence counts for armed heartbeats
pub trait OccurrenceSource: Send + Sync {
    fn draw(&mut self, lambda: f64) -> u32;
}

/// [`poisson_draw`] over a pseudo-random generator
pub struct KnuthPoisson<R> {
    rng: R,
}

impl<R: Rng> KnuthPoisson<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl KnuthPoisson<StdRng> {
    /// Reproducible source for a fixed seed
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Source seeded from the OS
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_os_rng())
    }
}

impl<R: Rng + Send + Sync> OccurrenceSource for KnuthPoisson<R> {
    fn draw(&mut self, lambda: f64) -> u32 {
        poisson_draw(lambda, &mut self.rng)
    }
}

/// Observable state of the fault model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultState {
    pub armed: bool,
    pub lambda: f64,
    pub last_occurrence_count: u32,
}

/// Outcome of one heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultVerdict {
    /// Not armed, nothing sampled
    Idle,
    /// Armed, draw above the threshold
    Stable { occurrences: u32 },
    /// Armed, draw at or below the threshold; the simulator is now disarmed
    Failure { occurrences: u32 },
}

/// Fault injection model driven by heartbeat ticks
pub struct FaultSimulator {
    state: FaultState,
    threshold: u32,
    source: Box<dyn OccurrenceSource>,
}

impl FaultSimulator {
    pub fn new(lambda: f64, threshold: u32, source: Box<dyn OccurrenceSource>) -> Self {
        Self {
            state: FaultState {
                armed: false,
                lambda,
                last_occurrence_count: 0,
            },
            threshold,
            source,
        }
    }

    /// Simulator with the default rate and threshold
    pub fn with_source(source: Box<dyn OccurrenceSource>) -> Self {
        Self::new(timing::FAULT_LAMBDA, timing::FAULT_FAILURE_THRESHOLD, source)
    }

    pub fn arm(&mut self) {
        self.state.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed
    }

    pub fn state(&self) -> FaultState {
        self.state
    }

    /// Sample the model for one heartbeat
    pub fn on_heartbeat(&mut self) -> FaultVerdict {
        if !self.state.armed {
            return FaultVerdict::Idle;
        }

        warn!("WARNING: System UNSTABLE, manual reboot advised");
        let occurrences = self.source.draw(self.state.lambda);
        self.state.last_occurrence_count = occurrences;

        if occurrences <= self.threshold {
            error!("System failure (occurrences={}), auto-reboot", occurrences);
            self.state.armed = false;
            FaultVerdict::Failure { occurrences }
        } else {
            FaultVerdict::Stable { occurrences }
        }
    }
}

impl std::fmt::Debug for FaultSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultSimulator")
            .field("state", &self.state)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
