//! Virtual-user state machine.

use serde::Serialize;

use crate::error::SchedulerError;

// ---------------------------------------------------------------------------
// VuState
// ---------------------------------------------------------------------------

/// Lifecycle state of a virtual user.
///
/// ```text
/// Spawned --(tick)--> Ready --(select+dispatch)--> Executing
/// Executing --(bytes sent)--> Waiting
/// Waiting --(response or error)--> Ready
/// Ready --(duration elapsed)--> Complete
/// ```
///
/// `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VuState {
    Spawned,
    Ready,
    Executing,
    Waiting,
    Complete,
}

impl VuState {
    /// Whether this state may transition to `next`.
    pub fn can_transition_to(self, next: VuState) -> bool {
        matches!(
            (self, next),
            (VuState::Spawned, VuState::Ready)
                | (VuState::Ready, VuState::Executing)
                | (VuState::Executing, VuState::Waiting)
                | (VuState::Waiting, VuState::Ready)
                | (VuState::Ready, VuState::Complete)
                // Cancellation may complete a VU from any live state.
                | (VuState::Spawned, VuState::Complete)
                | (VuState::Executing, VuState::Complete)
                | (VuState::Waiting, VuState::Complete)
        )
    }
}

impl std::fmt::Display for VuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VuState::Spawned => "spawned",
            VuState::Ready => "ready",
            VuState::Executing => "executing",
            VuState::Waiting => "waiting",
            VuState::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// VirtualUser
// ---------------------------------------------------------------------------

/// One virtual user. Ids are nonzero; a VU has at most one outstanding
/// request at a time. Request timeouts are tracked by the protocol
/// engines, not here.
#[derive(Debug, Clone)]
pub struct VirtualUser {
    pub id: u32,
    pub state: VuState,
    pub spawn_tick: u64,
    /// Monotone non-decreasing; updated on every transition.
    pub last_transition_tick: u64,
    pub pending_request_id: Option<u64>,
}

impl VirtualUser {
    pub fn new(id: u32, spawn_tick: u64) -> Self {
        debug_assert!(id > 0);
        Self {
            id,
            state: VuState::Spawned,
            spawn_tick,
            last_transition_tick: spawn_tick,
            pending_request_id: None,
        }
    }

    /// Move to `next` at `tick`, enforcing transition legality and tick
    /// monotonicity.
    pub fn transition(&mut self, next: VuState, tick: u64) -> Result<(), SchedulerError> {
        if !self.state.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition);
        }
        if tick < self.last_transition_tick {
            return Err(SchedulerError::InvalidTransition);
        }
        self.state = next;
        self.last_transition_tick = tick;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.state == VuState::Complete
    }
}
