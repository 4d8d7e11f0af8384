//! Time source for the retry and polling loops

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Monotonic clock used by [`ActionRetrier`](crate::retry::ActionRetrier)
/// and [`StatusPoller`](crate::poll::StatusPoller).
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);

    /// Time elapsed since `start`, saturating at zero.
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Clock backed by tokio's timer. Honours `tokio::time::pause`, so tests
/// running with `start_paused = true` see simulated time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
