mod run;
mod state;

pub use run::{RunCounters, RunRecord, RunTracker};
pub use state::{RunEvent, RunState, StateMachine};
