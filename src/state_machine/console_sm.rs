//! Console session state machine.
//!
//! Hierarchy:
//! ```text
//! Connecting → Streaming (superstate) → Closed
//!                  ├── Announcing { stage }   one status line per tick
//!                  └── Live                   [entry: log] screenshot per tick
//! ```
//!
//! The machine only tracks where a session is. The driver in
//! [`crate::console`] reads the state around each `Tick` to decide what to
//! send: a status line while announcing, a screenshot poll once live.

use statig::prelude::*;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events dispatched to the console session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The client connection is established.
    Opened,
    /// The session timer fired.
    Tick,
    /// The client went away, or a send to it failed.
    Disconnected,
}

// ---------------------------------------------------------------------------
// Shared storage
// ---------------------------------------------------------------------------

pub struct ConsoleSession {
    pub vm_name: String,
    /// Number of status lines announced before going live.
    pub stage_count: usize,
}

impl ConsoleSession {
    pub fn new(vm_name: impl Into<String>, stage_count: usize) -> Self {
        Self {
            vm_name: vm_name.into(),
            stage_count,
        }
    }
}

/// Index of the status line the next `Tick` announces, if any.
pub fn pending_stage(state: &State) -> Option<usize> {
    match state {
        State::Announcing { stage } => Some(*stage),
        _ => None,
    }
}

pub fn is_live(state: &State) -> bool {
    matches!(state, State::Live {})
}

pub fn is_closed(state: &State) -> bool {
    matches!(state, State::Closed {})
}

// ---------------------------------------------------------------------------
// State machine implementation
// ---------------------------------------------------------------------------

#[state_machine(
    initial = "State::connecting()",
    state(derive(Debug, Clone, PartialEq))
)]
impl ConsoleSession {
    /// Socket accepted, session not yet started.
    #[state]
    fn connecting(&mut self, event: &SessionEvent) -> Outcome<State> {
        match event {
            SessionEvent::Opened if self.stage_count == 0 => Transition(State::live()),
            SessionEvent::Opened => Transition(State::announcing(0)),
            SessionEvent::Disconnected => Transition(State::closed()),
            SessionEvent::Tick => Handled,
        }
    }

    // ------------------------------------------------------------------
    // Superstate: Streaming (parent of Announcing, Live)
    // ------------------------------------------------------------------

    #[superstate]
    fn streaming(&mut self, event: &SessionEvent) -> Outcome<State> {
        match event {
            SessionEvent::Disconnected => Transition(State::closed()),
            _ => Handled,
        }
    }

    /// `stage` status lines have been sent so far.
    #[state(superstate = "streaming")]
    fn announcing(&mut self, event: &SessionEvent, stage: &usize) -> Outcome<State> {
        match event {
            SessionEvent::Tick => {
                let next = *stage + 1;
                if next >= self.stage_count {
                    Transition(State::live())
                } else {
                    Transition(State::announcing(next))
                }
            }
            _ => Super,
        }
    }

    /// Announcement finished; every tick polls for a frame.
    #[state(superstate = "streaming", entry_action = "enter_live")]
    fn live(&mut self, event: &SessionEvent) -> Outcome<State> {
        match event {
            SessionEvent::Tick => Handled,
            _ => Super,
        }
    }

    /// Terminal.
    #[state(entry_action = "enter_closed")]
    fn closed(&mut self) -> Outcome<State> {
        Handled
    }

    // ------------------------------------------------------------------
    // Entry actions
    // ------------------------------------------------------------------

    #[action]
    fn enter_live(&mut self) {
        info!(vm = %self.vm_name, "Console session live");
    }

    #[action]
    fn enter_closed(&mut self) {
        debug!(vm = %self.vm_name, "Console session closed");
    }
}
