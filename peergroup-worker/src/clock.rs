use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

#[async_trait]
/// The time source used for the poll timer, backoff delays and round-trip timeouts.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> Instant;

    /// Completes once `duration` has elapsed.
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Copy, Clone, Default)]
/// A clock backed by the tokio timer.
///
/// When the runtime's clock is paused this advances instantly, which is
/// what the worker's tests rely on.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}
