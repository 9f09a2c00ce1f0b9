use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RateLimitExceeded;

/// Throttles calls to at most `calls` per rolling `period`.
///
/// Callers over the limit are delayed until the window resets, never dropped.
/// Shared across tasks behind an `Arc`; the window state sits under a mutex.
#[derive(Debug)]
pub struct RateLimiter {
    calls: u32,
    period: Duration,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    last_reset: Instant,
    num_calls: u32,
}

impl RateLimiter {
    pub fn new(calls: u32, period: Duration) -> Self {
        Self {
            calls: calls.max(1),
            period,
            window: Mutex::new(Window {
                last_reset: Instant::now(),
                num_calls: 0,
            }),
        }
    }

    /// Claim a slot in the current window, or report how long until it resets.
    pub fn try_acquire(&self) -> Result<(), RateLimitExceeded> {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = window.last_reset.elapsed();

        if elapsed >= self.period {
            window.num_calls = 0;
            window.last_reset = Instant::now();
        }

        if window.num_calls >= self.calls {
            let period_remaining = self.period.saturating_sub(window.last_reset.elapsed());
            return Err(RateLimitExceeded { period_remaining });
        }

        window.num_calls += 1;
        Ok(())
    }

    /// Wait until a slot is available and claim it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(RateLimitExceeded { period_remaining }) => {
                    warn!(
                        "Rate limit of {} calls per {:?} reached. Waiting {:?}...",
                        self.calls, self.period, period_remaining
                    );
                    tokio::time::sleep(period_remaining).await;
                    debug!("Rate limit window elapsed, retrying");
                }
            }
        }
    }
}
