use std::path::Path;

use tracing::info;

use crate::backend::InferenceBackend;
use crate::batcher::create_batches;
use crate::checkpoint::CheckpointTable;
use crate::dispatcher::Dispatcher;
use crate::error::{HarnessError, Result};
use crate::pacing::Pacing;
use crate::state_machine::{RunCounters, RunEvent, RunRecord, RunTracker, StateMachine};
use crate::ui::RunUi;
use crate::workload::{WorkItem, Workload};

/// Per-run knobs that are not part of dispatch.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub result_column: String,
    /// Summed weight allowed in one batch (the per-minute token budget).
    pub max_weight_per_batch: u64,
    /// Weight ceiling the workload was filtered with; reported only.
    pub max_context_weight: Option<u64>,
    /// Ignore any existing checkpoint and start from a fresh table.
    pub force: bool,
}

/// Drives a workload through load → batch → dispatch → merge → pace until done.
pub struct RunOrchestrator<B> {
    dispatcher: Dispatcher<B>,
    pacing: Pacing,
    ui: RunUi,
}

impl<B: InferenceBackend> RunOrchestrator<B> {
    pub fn new(dispatcher: Dispatcher<B>, pacing: Pacing, ui: RunUi) -> Self {
        Self {
            dispatcher,
            pacing,
            ui,
        }
    }

    pub fn ui(&self) -> &RunUi {
        &self.ui
    }

    /// Process every pending row of `workload`, checkpointing to `checkpoint_path`
    /// after each batch.
    ///
    /// Configuration problems fail before anything is dispatched. A checkpoint
    /// with nothing pending is reported and left untouched.
    pub async fn run(
        &self,
        workload: &Workload,
        checkpoint_path: &Path,
        settings: &RunSettings,
    ) -> Result<RunRecord> {
        if settings.max_weight_per_batch == 0 {
            return Err(HarnessError::InvalidBatchBudget(0));
        }

        let mut tracker = RunTracker::new();
        let mut counters = RunCounters {
            total_rows: workload.total_rows,
            filtered_out: workload.filtered_out,
            ..RunCounters::default()
        };
        let model = self.dispatcher.config().model.clone();
        let checkpoint = checkpoint_path.display().to_string();

        // LOADING
        StateMachine::next(&mut tracker, RunEvent::Start)?;
        if let Some(ceiling) = settings.max_context_weight {
            self.ui.filtered(workload.total_rows, workload.len(), ceiling);
        }
        let mut table = if settings.force {
            info!("--force given, existing checkpoint ignored");
            CheckpointTable::from_workload(workload, &settings.result_column)
        } else {
            let (table, resumed) =
                CheckpointTable::load(checkpoint_path, &settings.result_column, workload)?;
            if resumed {
                self.ui.resuming(checkpoint_path);
            }
            table
        };

        let pending = table.pending_work();
        counters.pending = pending.len();
        StateMachine::next(
            &mut tracker,
            RunEvent::Loaded {
                pending: pending.len(),
            },
        )?;
        if pending.is_empty() {
            self.ui.already_complete();
            return Ok(RunRecord::finish(
                &tracker,
                &model,
                &checkpoint,
                counters,
                table.stats(),
            ));
        }
        self.ui.pending(&pending);

        // BATCHING: once, over everything pending
        let batches = create_batches(&workload.weighted(&pending), settings.max_weight_per_batch)?;
        counters.batches = batches.len();
        self.ui.batches_created(batches.len(), settings.max_weight_per_batch);
        StateMachine::next(
            &mut tracker,
            RunEvent::Batched {
                batches: batches.len(),
            },
        )?;

        for (index, batch) in batches.iter().enumerate() {
            // DISPATCHING
            let items: Vec<WorkItem> = batch
                .ids
                .iter()
                .filter_map(|&id| workload.get(id).cloned())
                .collect();
            info!(
                batch = index + 1,
                of = batches.len(),
                items = items.len(),
                weight = batch.weight,
                "dispatching"
            );
            let progress = self.ui.batch(index, batches.len(), items.len());
            let outcomes = self.dispatcher.dispatch(&items, &progress).await;
            progress.finish();
            counters.dispatched += outcomes.len();
            StateMachine::next(&mut tracker, RunEvent::Dispatched)?;

            // MERGING
            table.merge(&outcomes);
            table.persist(checkpoint_path)?;
            let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
            self.ui.batch_saved(succeeded, items.len(), &table.stats());

            let remaining = batches.len() - index - 1;
            StateMachine::next(&mut tracker, RunEvent::Merged { remaining })?;

            // PACING
            if remaining > 0 {
                self.ui.waiting(self.pacing.interval());
                self.pacing.pause().await;
                StateMachine::next(&mut tracker, RunEvent::Paced)?;
            }
        }

        let stats = table.stats();
        self.ui.summary(&stats, checkpoint_path);
        Ok(RunRecord::finish(
            &tracker,
            &model,
            &checkpoint,
            counters,
            stats,
        ))
    }
}
