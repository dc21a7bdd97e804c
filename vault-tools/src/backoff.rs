//! Bounded exponential backoff for per-chunk upload retries.
//!
//! No crate in this lineage's dependency graph provides a retry/backoff
//! primitive, so this is a small hand-rolled state machine rather than an
//! import.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_millis(250),
            factor: 2,
            cap: Duration::from_secs(8),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// The delay to wait before attempt number `attempt` (1-based: the delay
    /// preceding the *second* try, etc.). Attempt 1 never needs a delay
    /// since it is the first try.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = attempt - 2;
        let millis = self
            .base
            .as_millis()
            .saturating_mul(u128::from(self.factor.saturating_pow(exponent)));
        let capped = millis.min(self.cap.as_millis());
        Duration::from_millis(capped as u64)
    }
}

/// Retry `op` up to `policy.max_attempts` times, sleeping according to
/// `policy` between attempts via the caller-supplied `sleep` function (so
/// this stays executor-agnostic: async callers pass `tokio::time::sleep`,
/// sync callers/tests pass `std::thread::sleep`).
pub async fn retry_async<T, E, F, Fut, S, SFut>(
    policy: BackoffPolicy,
    mut op: F,
    mut sleep: S,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    S: FnMut(Duration) -> SFut,
    SFut: std::future::Future<Output = ()>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    return Err(err);
                }
                sleep(policy.delay_for(attempt + 1)).await;
                attempt += 1;
            }
        }
    }
}
