//! Control plane lifecycle state machine.
//!
//! # State Machine
//!
//! ```text
//!   ┌───────────────┐
//!   │ Uninitialized │
//!   └───────┬───────┘
//!           │ start
//!           ▼
//!   ┌───────────────┐   step failed   ┌──────────┐
//!   │   Starting    │────────────────▶│  Failed  │
//!   └───────┬───────┘                 └──────────┘
//!           │ scheduler synced
//!           ▼
//!   ┌───────────────┐
//!   │    Running    │
//!   └───────┬───────┘
//!           │ stop
//!           ▼
//!   ┌───────────────┐
//!   │    Stopped    │
//!   └───────────────┘
//! ```
//!
//! `stop` never changes an `Uninitialized`, `Failed` or `Stopped` state.
//! On a `Failed` plane it still releases whatever the failed start launched.

use std::fmt;

use crate::error::{PlaneError, Result};

/// Lifecycle state of a control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaneState {
    /// Constructed, nothing launched.
    #[default]
    Uninitialized,
    /// `start` is in progress.
    Starting,
    /// Every subsystem is up and the resource controls are usable.
    Running,
    /// Torn down after running.
    Stopped,
    /// A startup step failed.
    Failed,
}

impl fmt::Display for PlaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: PlaneState, to: PlaneState) -> bool {
    use PlaneState::{Failed, Running, Starting, Stopped, Uninitialized};

    matches!(
        (from, to),
        (Uninitialized, Starting) | (Starting, Running | Failed) | (Running, Stopped)
    )
}

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `PlaneError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(from: PlaneState, to: PlaneState) -> Result<PlaneState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(PlaneError::InvalidTransition { from, to })
    }
}

/// Returns true if the plane has reached an end state.
#[must_use]
pub const fn is_terminal(state: PlaneState) -> bool {
    matches!(state, PlaneState::Stopped | PlaneState::Failed)
}
