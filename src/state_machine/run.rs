use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::RunState;
use crate::checkpoint::CheckpointStats;

/// Current state of a run plus every state it has left.
#[derive(Debug, Clone)]
pub struct RunTracker {
    pub id: String,
    state: RunState,
    history: Vec<RunState>,
    pub started_at: DateTime<Utc>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: RunState::Init,
            history: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub(super) fn enter(&mut self, next: RunState) {
        self.history.push(self.state);
        self.state = next;
    }

    /// Every state visited, in order, including the current one.
    pub fn transitions(&self) -> Vec<RunState> {
        let mut all = self.history.clone();
        all.push(self.state);
        all
    }
}

/// Counters gathered by the orchestrator while a run progresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub total_rows: usize,
    pub filtered_out: usize,
    pub pending: usize,
    pub batches: usize,
    pub dispatched: usize,
}

/// Structured record printed when a run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub model: String,
    pub checkpoint: String,
    pub state_transitions: Vec<RunState>,
    pub total_rows: usize,
    pub filtered_out: usize,
    pub pending: usize,
    pub batches: usize,
    pub dispatched: usize,
    pub successes: usize,
    pub errors_or_missing: usize,
    /// True when the run found nothing to do and left the checkpoint alone.
    pub already_complete: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunRecord {
    pub fn finish(
        tracker: &RunTracker,
        model: &str,
        checkpoint: &str,
        counters: RunCounters,
        stats: CheckpointStats,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: tracker.id.clone(),
            model: model.to_string(),
            checkpoint: checkpoint.to_string(),
            state_transitions: tracker.transitions(),
            total_rows: counters.total_rows,
            filtered_out: counters.filtered_out,
            pending: counters.pending,
            batches: counters.batches,
            dispatched: counters.dispatched,
            successes: stats.successes,
            errors_or_missing: stats.errors_or_missing(),
            already_complete: tracker.state() == RunState::Done && counters.pending == 0,
            started_at: tracker.started_at,
            completed_at: now,
            duration_ms: (now - tracker.started_at).num_milliseconds(),
        }
    }
}
