//! Connection State Machine
//!
//! Defines the valid lifecycle transitions of the persistent connection.

/// Lifecycle states of the persistent connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Terminated,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt starts
    Dial,
    /// Transport reported the "connect" event
    TransportConnected,
    /// Connection attempt failed before "connect"
    ConnectFailed,
    /// Transport went away on its own
    TransportLost,
    /// Remote reboot command
    RebootRequested,
    /// Armed fault model declared a failure
    FaultDetected,
    /// Remote power-off command
    PowerOff,
    /// Local shutdown signal
    Interrupted,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed)
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: ConnectionEvent,
    },
}

/// The connection lifecycle state machine
#[derive(Debug)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
    connections: u64,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
            connections: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Number of times the Connected state has been entered
    pub fn connections(&self) -> u64 {
        self.connections
    }

    /// Heartbeats are only valid while connected
    pub fn heartbeat_allowed(&self) -> bool {
        self.current_state == ConnectionState::Connected
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ConnectionEvent) -> TransitionResult {
        match self.get_next_state(&event) {
            Some(state) => {
                if state == ConnectionState::Connected
                    && self.current_state != ConnectionState::Connected
                {
                    self.connections += 1;
                }
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: &ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self.current_state, event) {
            // Nothing leaves Terminated
            (Terminated, _) => None,

            // Shutdown is accepted from every live state
            (_, PowerOff | Interrupted) => Some(Terminated),

            (Disconnected | Reconnecting, Dial) => Some(Connecting),

            (Connecting, TransportConnected) => Some(Connected),
            // Repeated connect event on the same link
            (Connected, TransportConnected) => Some(Connected),

            (Connecting, ConnectFailed) => Some(Disconnected),
            (Connecting | Connected, TransportLost) => Some(Disconnected),

            (Connected, RebootRequested | FaultDetected) => Some(Reconnecting),

            _ => None,
        }
    }
}
