use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: the n-th retry waits `base_delay * n`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * retry
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable kind, or
    /// the retry budget is spent.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut retry = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if retry < self.max_retries && err.kind().is_retryable() => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    warn!(
                        error = %err,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        "retrying transient failure"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
