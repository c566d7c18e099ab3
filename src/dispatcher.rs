//! Runs one batch against a backend with bounded concurrency.
//!
//! Every item is invoked on its own tokio task so a panic in a backend is
//! contained to that item. Each task is awaited under the per-item deadline;
//! a task that misses it is aborted and reported as a timeout. Its worker
//! slot is released only once the task has actually stopped, so no more than
//! `concurrency_cap` calls are ever in flight. Outcomes are returned in
//! completion order and are keyed by item id.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::task::JoinError;
use tracing::debug;

use crate::backend::{InferenceBackend, InferenceRequest};
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::ui::BatchProgress;
use crate::workload::WorkItem;

/// Per-run dispatch settings, built once from config and CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub model: String,
    pub concurrency_cap: usize,
    pub per_item_timeout: Duration,
}

impl DispatchConfig {
    /// Workers for a batch of `batch_len`: at least one, at most the cap.
    pub fn workers_for(&self, batch_len: usize) -> usize {
        self.concurrency_cap.min(batch_len).max(1)
    }
}

pub struct Dispatcher<B> {
    backend: Arc<B>,
    config: DispatchConfig,
}

impl<B: InferenceBackend> Dispatcher<B> {
    pub fn new(backend: Arc<B>, config: DispatchConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Produces exactly one outcome per item.
    pub async fn dispatch(&self, items: &[WorkItem], progress: &BatchProgress) -> Vec<Outcome> {
        let workers = self.config.workers_for(items.len());
        debug!(items = items.len(), workers, "dispatching batch");

        stream::iter(items.iter().cloned())
            .map(|item| self.run_item(item))
            .buffer_unordered(workers)
            .inspect(|outcome| progress.item_done(outcome))
            .collect()
            .await
    }

    async fn run_item(&self, item: WorkItem) -> Outcome {
        let id = item.id;
        let request = InferenceRequest {
            id,
            prompt: item.prompt,
            model: self.config.model.clone(),
            max_output_tokens: item.max_output_tokens,
        };
        let backend = Arc::clone(&self.backend);
        let mut handle = tokio::spawn(async move { backend.invoke(request).await });

        let timeout = self.config.per_item_timeout;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(text))) => Outcome::success(id, text),
            Ok(Ok(Err(err))) => Outcome::failure(id, Failure::from(err)),
            Ok(Err(join_err)) => Outcome::failure(
                id,
                Failure::new(FailureKind::UnknownError, join_error_detail(join_err)),
            ),
            Err(_) => {
                handle.abort();
                // Hold the slot until the aborted call is gone.
                let _ = handle.await;
                debug!(id, ?timeout, "item timed out, task aborted");
                Outcome::failure(
                    id,
                    Failure::new(FailureKind::Timeout, format!("Request exceeded {timeout:?}")),
                )
            }
        }
    }
}

fn join_error_detail(err: JoinError) -> String {
    if err.is_panic() {
        format!("backend panicked: {}", panic_message(err.into_panic()))
    } else {
        err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|id| WorkItem {
                id,
                prompt: format!("prompt {id}"),
                weight: 10,
                max_output_tokens: 100,
            })
            .collect()
    }

    fn config(cap: usize, timeout: Duration) -> DispatchConfig {
        DispatchConfig {
            model: "test-model".into(),
            concurrency_cap: cap,
            per_item_timeout: timeout,
        }
    }

    /// Echoes the prompt, with per-id misbehaviour.
    struct ScriptedBackend {
        hang: HashSet<usize>,
        fail: HashSet<usize>,
        empty: HashSet<usize>,
        panic: HashSet<usize>,
    }

    impl ScriptedBackend {
        fn echo() -> Self {
            Self {
                hang: HashSet::new(),
                fail: HashSet::new(),
                empty: HashSet::new(),
                panic: HashSet::new(),
            }
        }
    }

    impl InferenceBackend for ScriptedBackend {
        async fn invoke(&self, request: InferenceRequest) -> Result<String, BackendError> {
            if self.hang.contains(&request.id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.panic.contains(&request.id) {
                panic!("exploded on {}", request.id);
            }
            if self.fail.contains(&request.id) {
                return Err(BackendError::ApiError {
                    status: 400,
                    message: "bad model".into(),
                });
            }
            if self.empty.contains(&request.id) {
                return Err(BackendError::NoContent);
            }
            Ok(format!("{} via {}", request.prompt, request.model))
        }
    }

    /// Records the highest number of invocations in flight at once.
    struct CountingBackend {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InferenceBackend for CountingBackend {
        async fn invoke(&self, _request: InferenceRequest) -> Result<String, BackendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".into())
        }
    }

    #[test]
    fn worker_count_is_clamped() {
        let c = config(4, Duration::from_secs(1));
        assert_eq!(c.workers_for(0), 1);
        assert_eq!(c.workers_for(2), 2);
        assert_eq!(c.workers_for(100), 4);
        assert_eq!(config(0, Duration::from_secs(1)).workers_for(10), 1);
    }

    #[tokio::test]
    async fn one_outcome_per_item_with_mixed_failures() {
        let mut backend = ScriptedBackend::echo();
        backend.fail.insert(1);
        backend.empty.insert(3);
        let dispatcher = Dispatcher::new(Arc::new(backend), config(4, Duration::from_secs(5)));

        let outcomes = dispatcher.dispatch(&items(6), &BatchProgress::hidden(6)).await;

        assert_eq!(outcomes.len(), 6);
        let ids: HashSet<usize> = outcomes.iter().map(|o| o.id).collect();
        assert_eq!(ids, (0..6).collect());

        let by_id = |id: usize| outcomes.iter().find(|o| o.id == id).unwrap();
        assert_eq!(by_id(0).result, Ok("prompt 0 via test-model".to_string()));
        assert_eq!(
            by_id(1).result.as_ref().unwrap_err().kind,
            FailureKind::RequestError
        );
        assert_eq!(by_id(3).to_cell(), "ERROR_NO_CONTENT");
    }

    #[tokio::test]
    async fn hung_item_times_out_alone() {
        let mut backend = ScriptedBackend::echo();
        backend.hang.insert(2);
        let dispatcher = Dispatcher::new(Arc::new(backend), config(4, Duration::from_millis(200)));

        let start = Instant::now();
        let outcomes = dispatcher.dispatch(&items(5), &BatchProgress::hidden(5)).await;
        assert!(start.elapsed() < Duration::from_secs(5));

        assert_eq!(outcomes.len(), 5);
        for outcome in &outcomes {
            if outcome.id == 2 {
                let failure = outcome.result.as_ref().unwrap_err();
                assert_eq!(failure.kind, FailureKind::Timeout);
                assert_eq!(outcome.to_cell(), "ERROR_TIMEOUT: Request exceeded 200ms");
            } else {
                assert!(outcome.is_success(), "sibling {} failed", outcome.id);
            }
        }
    }

    #[tokio::test]
    async fn panicking_backend_is_contained() {
        let mut backend = ScriptedBackend::echo();
        backend.panic.insert(0);
        let dispatcher = Dispatcher::new(Arc::new(backend), config(2, Duration::from_secs(5)));

        let outcomes = dispatcher.dispatch(&items(3), &BatchProgress::hidden(3)).await;

        assert_eq!(outcomes.len(), 3);
        let crashed = outcomes.iter().find(|o| o.id == 0).unwrap();
        let failure = crashed.result.as_ref().unwrap_err();
        assert_eq!(failure.kind, FailureKind::UnknownError);
        assert!(failure.detail.contains("exploded on 0"));
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 2);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_cap() {
        let backend = Arc::new(CountingBackend {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(Arc::clone(&backend), config(3, Duration::from_secs(5)));

        let outcomes = dispatcher.dispatch(&items(12), &BatchProgress::hidden(12)).await;

        assert_eq!(outcomes.len(), 12);
        let peak = backend.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {peak}");
        assert!(peak >= 1);
    }

    /// Sleeps a per-id delay; the in-flight count drops even when the call is aborted.
    struct SlowBackend {
        delays: Vec<Duration>,
        in_flight: Arc<AtomicUsize>,
        peak: AtomicUsize,
    }

    struct InFlight(Arc<AtomicUsize>);

    impl Drop for InFlight {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl InferenceBackend for SlowBackend {
        async fn invoke(&self, request: InferenceRequest) -> Result<String, BackendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(Arc::clone(&self.in_flight));
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delays[request.id]).await;
            Ok("done".into())
        }
    }

    #[tokio::test]
    async fn timed_out_item_keeps_its_slot_until_it_stops() {
        let backend = Arc::new(SlowBackend {
            delays: vec![
                Duration::from_millis(400),
                Duration::from_millis(30),
                Duration::from_millis(30),
            ],
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(Arc::clone(&backend), config(1, Duration::from_millis(50)));

        let outcomes = dispatcher.dispatch(&items(3), &BatchProgress::hidden(3)).await;

        assert_eq!(outcomes.len(), 3);
        let hung = outcomes.iter().find(|o| o.id == 0).unwrap();
        assert_eq!(hung.result.as_ref().unwrap_err().kind, FailureKind::Timeout);
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 2);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
        assert_eq!(backend.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_batch_yields_nothing() {
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptedBackend::echo()),
            config(4, Duration::from_secs(1)),
        );
        assert!(dispatcher.dispatch(&[], &BatchProgress::hidden(0)).await.is_empty());
    }

    #[tokio::test]
    async fn progress_sees_every_item() {
        let dispatcher = Dispatcher::new(
            Arc::new(ScriptedBackend::echo()),
            config(2, Duration::from_secs(1)),
        );
        let progress = BatchProgress::hidden(4);
        dispatcher.dispatch(&items(4), &progress).await;
        assert_eq!(progress.completed(), 4);
    }
}
