use std::fmt;

use serde::{Deserialize, Serialize};

use super::run::RunTracker;
use crate::error::{HarnessError, Result};

/// The states a run moves through.
///
/// INIT → LOADING → BATCHING → DISPATCHING → MERGING → (PACING → DISPATCHING)* → DONE,
/// or straight from LOADING to DONE when nothing is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Init,
    Loading,
    Batching,
    Dispatching,
    Merging,
    Pacing,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => write!(f, "INIT"),
            RunState::Loading => write!(f, "LOADING"),
            RunState::Batching => write!(f, "BATCHING"),
            RunState::Dispatching => write!(f, "DISPATCHING"),
            RunState::Merging => write!(f, "MERGING"),
            RunState::Pacing => write!(f, "PACING"),
            RunState::Done => write!(f, "DONE"),
        }
    }
}

/// What just happened in the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Start,
    /// Checkpoint loaded; `pending` rows need processing.
    Loaded { pending: usize },
    /// All pending rows were split into `batches` batches.
    Batched { batches: usize },
    Dispatched,
    /// A batch was merged and persisted; `remaining` batches are left.
    Merged { remaining: usize },
    Paced,
}

/// Drives a [`RunTracker`] through the run states.
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the next state for `event`.
    ///
    /// Events that make no sense in the current state are rejected and leave
    /// the tracker untouched. `Done` accepts nothing.
    pub fn next(tracker: &mut RunTracker, event: RunEvent) -> Result<RunState> {
        let next = match (tracker.state(), event) {
            (RunState::Init, RunEvent::Start) => RunState::Loading,
            (RunState::Loading, RunEvent::Loaded { pending: 0 }) => RunState::Done,
            (RunState::Loading, RunEvent::Loaded { .. }) => RunState::Batching,
            (RunState::Batching, RunEvent::Batched { batches: 0 }) => RunState::Done,
            (RunState::Batching, RunEvent::Batched { .. }) => RunState::Dispatching,
            (RunState::Dispatching, RunEvent::Dispatched) => RunState::Merging,
            (RunState::Merging, RunEvent::Merged { remaining: 0 }) => RunState::Done,
            (RunState::Merging, RunEvent::Merged { .. }) => RunState::Pacing,
            (RunState::Pacing, RunEvent::Paced) => RunState::Dispatching,
            (state, event) => {
                return Err(HarnessError::IllegalTransition {
                    state,
                    event: format!("{event:?}"),
                });
            }
        };
        tracker.enter(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_with_two_batches() {
        let mut t = RunTracker::new();
        StateMachine::next(&mut t, RunEvent::Start).unwrap();
        StateMachine::next(&mut t, RunEvent::Loaded { pending: 5 }).unwrap();
        StateMachine::next(&mut t, RunEvent::Batched { batches: 2 }).unwrap();
        StateMachine::next(&mut t, RunEvent::Dispatched).unwrap();
        assert_eq!(
            StateMachine::next(&mut t, RunEvent::Merged { remaining: 1 }).unwrap(),
            RunState::Pacing
        );
        StateMachine::next(&mut t, RunEvent::Paced).unwrap();
        StateMachine::next(&mut t, RunEvent::Dispatched).unwrap();
        assert_eq!(
            StateMachine::next(&mut t, RunEvent::Merged { remaining: 0 }).unwrap(),
            RunState::Done
        );

        assert_eq!(
            t.transitions(),
            vec![
                RunState::Init,
                RunState::Loading,
                RunState::Batching,
                RunState::Dispatching,
                RunState::Merging,
                RunState::Pacing,
                RunState::Dispatching,
                RunState::Merging,
                RunState::Done,
            ]
        );
    }

    #[test]
    fn nothing_pending_goes_straight_to_done() {
        let mut t = RunTracker::new();
        StateMachine::next(&mut t, RunEvent::Start).unwrap();
        let s = StateMachine::next(&mut t, RunEvent::Loaded { pending: 0 }).unwrap();
        assert_eq!(s, RunState::Done);
        assert_eq!(
            t.transitions(),
            vec![RunState::Init, RunState::Loading, RunState::Done]
        );
    }

    #[test]
    fn last_batch_is_never_paced() {
        let mut t = RunTracker::new();
        StateMachine::next(&mut t, RunEvent::Start).unwrap();
        StateMachine::next(&mut t, RunEvent::Loaded { pending: 1 }).unwrap();
        StateMachine::next(&mut t, RunEvent::Batched { batches: 1 }).unwrap();
        StateMachine::next(&mut t, RunEvent::Dispatched).unwrap();
        StateMachine::next(&mut t, RunEvent::Merged { remaining: 0 }).unwrap();
        assert!(!t.transitions().contains(&RunState::Pacing));
    }

    #[test]
    fn illegal_event_is_rejected_without_moving() {
        let mut t = RunTracker::new();
        let err = StateMachine::next(&mut t, RunEvent::Dispatched).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::IllegalTransition {
                state: RunState::Init,
                ..
            }
        ));
        assert_eq!(t.state(), RunState::Init);
    }

    #[test]
    fn done_is_terminal() {
        let mut t = RunTracker::new();
        StateMachine::next(&mut t, RunEvent::Start).unwrap();
        StateMachine::next(&mut t, RunEvent::Loaded { pending: 0 }).unwrap();
        assert!(StateMachine::next(&mut t, RunEvent::Start).is_err());
        assert!(StateMachine::next(&mut t, RunEvent::Paced).is_err());
    }

    #[test]
    fn state_display() {
        assert_eq!(RunState::Init.to_string(), "INIT");
        assert_eq!(RunState::Dispatching.to_string(), "DISPATCHING");
        assert_eq!(RunState::Done.to_string(), "DONE");
    }
}
