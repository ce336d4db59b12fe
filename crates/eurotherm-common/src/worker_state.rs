//! Acquisition worker lifecycle state machine.
//!
//! State transitions:
//!
//! Idle → Polling → Draining → Stopped
//!
//! Generalised from the supervisory service's earlier PLC-scan-cycle
//! lifecycle down to the four states an [`crate::AcquisitionWorker`]
//! actually passes through: it never has a fault state of its own (driver
//! errors are logged and retried at the next poll, per spec.md §4.3), it
//! only ever runs down once.

use crate::error::{EurothermError, EurothermResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a single [`crate::AcquisitionWorker`] task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    /// Constructed but not yet polling.
    #[default]
    Idle,
    /// Normal cyclic acquisition.
    Polling,
    /// Cancellation requested; finishing the in-flight poll before exit.
    Draining,
    /// Task has exited; the handle may be joined and discarded.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Polling => write!(f, "POLLING"),
            Self::Draining => write!(f, "DRAINING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl WorkerState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::{Draining, Idle, Polling, Stopped};

        matches!(
            (self, target),
            (Idle, Polling) | (Polling, Draining) | (Draining, Stopped)
        )
    }

    /// True while the worker is expected to be actively polling its device.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Polling)
    }
}

/// State machine wrapper with transition history, mirroring
/// [`crate::config`]'s sibling types' preference for a thin owned wrapper
/// over a bare enum.
#[derive(Debug, Clone)]
pub struct WorkerStateMachine {
    current: WorkerState,
    previous: Option<WorkerState>,
    transition_count: u64,
}

impl Default for WorkerStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStateMachine {
    /// Create a new state machine starting in `Idle`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: WorkerState::Idle,
            previous: None,
            transition_count: 0,
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.current
    }

    /// The previous state, if any transition has occurred.
    #[must_use]
    pub fn previous_state(&self) -> Option<WorkerState> {
        self.previous
    }

    /// Total number of transitions made so far.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition, failing if it is not a legal edge.
    pub fn transition(&mut self, target: WorkerState) -> EurothermResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(EurothermError::Config(format!(
                "invalid worker state transition: {} -> {target}",
                self.current
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_progression_succeeds() {
        let mut sm = WorkerStateMachine::new();
        assert_eq!(sm.state(), WorkerState::Idle);
        sm.transition(WorkerState::Polling).unwrap();
        sm.transition(WorkerState::Draining).unwrap();
        sm.transition(WorkerState::Stopped).unwrap();
        assert_eq!(sm.state(), WorkerState::Stopped);
        assert_eq!(sm.transition_count(), 3);
    }

    #[test]
    fn cannot_skip_draining() {
        let mut sm = WorkerStateMachine::new();
        sm.transition(WorkerState::Polling).unwrap();
        assert!(sm.transition(WorkerState::Stopped).is_err());
    }

    #[test]
    fn cannot_restart_once_stopped() {
        let mut sm = WorkerStateMachine::new();
        sm.transition(WorkerState::Polling).unwrap();
        sm.transition(WorkerState::Draining).unwrap();
        sm.transition(WorkerState::Stopped).unwrap();
        assert!(sm.transition(WorkerState::Idle).is_err());
    }

    #[test]
    fn is_active_only_while_polling() {
        let mut sm = WorkerStateMachine::new();
        assert!(!sm.state().is_active());
        sm.transition(WorkerState::Polling).unwrap();
        assert!(sm.state().is_active());
    }
}
