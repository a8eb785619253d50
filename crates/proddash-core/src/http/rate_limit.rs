use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::trace;

/// Process-wide gate enforcing a minimum spacing between request issuances.
///
/// Callers queue on a fair mutex, so issuance order follows call order.
/// Completion order is not constrained.
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    last_issued: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_issued: Mutex::new(None),
        }
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Suspends until the spacing since the previous issuance has elapsed,
    /// then records this issuance.
    pub async fn acquire(&self) {
        let mut last = self.last_issued.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_spacing {
                let deficit = self.min_spacing - elapsed;
                trace!(wait_ms = deficit.as_millis() as u64, "rate limiting request");
                sleep(deficit).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sequential_acquires_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(1000));
        let mut issued = Vec::new();
        for _ in 0..4 {
            limiter.acquire().await;
            issued.push(Instant::now());
        }
        for pair in issued.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_acquire_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(1000));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now() - start, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_gate() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let stamp = |limiter: Arc<RateLimiter>| async move {
            limiter.acquire().await;
            Instant::now()
        };
        let (a, b, c) = tokio::join!(
            stamp(Arc::clone(&limiter)),
            stamp(Arc::clone(&limiter)),
            stamp(Arc::clone(&limiter))
        );
        let mut stamps = vec![a, b, c];
        stamps.sort();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_counts_toward_spacing() {
        let limiter = RateLimiter::new(Duration::from_millis(1000));
        limiter.acquire().await;
        sleep(Duration::from_millis(700)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now() - before, Duration::from_millis(300));
    }
}
