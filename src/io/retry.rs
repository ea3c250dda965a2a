//! Bounded retry with backoff.
//!
//! Opening a raster can race with a writer that is still flushing the file,
//! and tile reads can race with an in-place file replacement. Both are
//! handled by re-running the operation a fixed number of times with a short
//! sleep in between. The policy is a value so call sites only state *what*
//! to retry.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Sleep `delay` after every failed attempt.
    Fixed,
    /// Sleep `delay * (attempt + 1)` after attempt `attempt` (0-based).
    Linear,
}

/// A bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,

    /// Base delay between attempts.
    pub delay: Duration,

    /// Delay growth.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Policy used when opening a raster: 3 attempts, 100 ms, 200 ms.
    pub const OPEN: RetryPolicy = RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(100),
        backoff: Backoff::Linear,
    };

    /// Policy used for a single tile read: 3 attempts, 50 ms, 100 ms.
    pub const READ: RetryPolicy = RetryPolicy {
        attempts: 3,
        delay: Duration::from_millis(50),
        backoff: Backoff::Linear,
    };

    /// Policy used when swapping an optimized file into place: one retry after 1 s.
    pub const REPLACE: RetryPolicy = RetryPolicy {
        attempts: 2,
        delay: Duration::from_secs(1),
        backoff: Backoff::Fixed,
    };

    /// Create a policy with a fixed delay.
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Create a policy whose delay grows linearly with the attempt number.
    pub const fn linear(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            backoff: Backoff::Linear,
        }
    }

    /// A policy that never retries.
    pub const fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait after the failed attempt `attempt` (0-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt.saturating_add(1)),
        }
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// `op` receives the 0-based attempt number. Each failure is logged at
    /// WARN with `what` as context; the error of the last attempt is
    /// returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt = attempt + 1,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "{} failed: {}",
                        what,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
