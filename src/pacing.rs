use std::time::Duration;

/// Fixed pause between consecutive batches.
///
/// Coarse backpressure only: the pause starts after a batch finishes, so real
/// throughput stays at or below the per-minute budget rather than tracking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    interval: Duration,
}

impl Pacing {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn pause(&self) {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
    }
}
