//! Request wrappers with timeout, cancellation and exponential backoff.
//!
//! Two variants are shared by every network-backed operation:
//!
//! - **bounded-retry** ([`call_with_retry`], [`RetryClient::call`]) for
//!   idempotent background work such as visit reports. Each attempt gets the
//!   policy's per-attempt timeout; retryable failures wait
//!   `min(base_delay * growth_factor^(attempt-1), max_delay)` before the next
//!   attempt; the last error is surfaced once attempts run out.
//! - **single-shot-with-timeout** ([`call_once`]) for user-triggered reads.
//!   A hard wall-clock deadline cancels the request; the first error is
//!   surfaced immediately.
//!
//! The default retry predicate is [`RecallError::is_retryable`]:
//! authentication failures are never retried.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{RecallError, Result};

/// Retry and timeout settings for one class of requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Per-attempt deadline. `None` lets an attempt run unbounded.
    pub timeout: Option<Duration>,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub growth_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            timeout: None,
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(5),
            growth_factor: 1.5,
        }
    }

    /// Visit reports and other fire-and-forget background calls:
    /// 3 attempts, 300 ms base delay.
    pub fn background() -> Self {
        Self::new(3, Duration::from_millis(300)).with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// Delay after the `attempt`-th failure (1-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.growth_factor.powi(exponent);
        let capped = nanos.min(self.max_delay.as_nanos() as f64).max(0.0);
        Duration::from_nanos(capped.round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::background()
    }
}

async fn attempt<T, Fut>(timeout: Option<Duration>, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(RecallError::Timeout(limit))),
        None => fut.await,
    }
}

/// Run `op` until it succeeds, the predicate rejects its error, or
/// `max_attempts` is reached.
pub async fn call_with_retry<T, F, Fut, P>(policy: &RetryPolicy, should_retry: P, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&RecallError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt_no = 1;

    loop {
        match attempt(policy.timeout, op()).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt_no < max_attempts && should_retry(&err) => {
                let delay = policy.delay_for(attempt_no);
                debug!(attempt = attempt_no, ?delay, error = %err, "retrying request");
                tokio::time::sleep(delay).await;
                attempt_no += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run `fut` once under a hard deadline. Dropping the future on timeout
/// cancels the underlying request.
pub async fn call_once<T, Fut>(timeout: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    attempt(Some(timeout), fut).await
}

/// A [`RetryPolicy`] bound to the default retry predicate.
#[derive(Debug, Clone, Default)]
pub struct RetryClient {
    policy: RetryPolicy,
}

impl RetryClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Bounded retry with [`RecallError::is_retryable`].
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        call_with_retry(&self.policy, RecallError::is_retryable, op).await
    }

    /// Single shot under `timeout`. The policy's own per-attempt timeout
    /// does not apply here.
    pub async fn call_once<T, Fut>(&self, timeout: Duration, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        call_once(timeout, fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(10, ms(300)).with_max_delay(ms(1000));
        assert_eq!(policy.delay_for(1), ms(300));
        assert_eq!(policy.delay_for(2), ms(450));
        assert_eq!(policy.delay_for(3), ms(675));
        assert_eq!(policy.delay_for(4), ms(1000));
        assert_eq!(policy.delay_for(40), ms(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_with_two_delays() {
        let policy = RetryPolicy::new(3, ms(300));
        let calls = AtomicU32::new(0);
        let stamps = Mutex::new(Vec::new());

        let result = call_with_retry(&policy, RecallError::is_retryable, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            stamps.lock().unwrap().push(Instant::now());
            async move {
                if n < 2 {
                    Err(RecallError::http(503, "unavailable"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stamps = stamps.lock().unwrap();
        let first = stamps[1] - stamps[0];
        let second = stamps[2] - stamps[1];
        assert!(first >= ms(300));
        assert!(second >= first);
        assert!(second <= policy.max_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surfaces_last_error_after_max_attempts() {
        let policy = RetryPolicy::new(3, ms(10));
        let calls = AtomicU32::new(0);

        let err = call_with_retry(&policy, RecallError::is_retryable, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(RecallError::network(format!("reset {}", n))) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err, RecallError::network("reset 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_is_not_retried() {
        let client = RetryClient::new(RetryPolicy::new(5, ms(10)));
        let calls = AtomicU32::new(0);

        let err = client
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RecallError::unauthenticated("token expired")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_auth());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_retryable() {
        let policy = RetryPolicy::new(2, ms(10)).with_timeout(ms(50));
        let calls = AtomicU32::new(0);

        let result = call_with_retry(&policy, RecallError::is_retryable, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_once_surfaces_timeout() {
        let err = call_once(ms(100), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, RecallError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err, RecallError::Timeout(ms(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_call_once_uses_given_deadline() {
        let client = RetryClient::new(RetryPolicy::new(3, ms(10)).with_timeout(Duration::from_secs(30)));
        let err = client
            .call_once(ms(50), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, RecallError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err, RecallError::Timeout(ms(50)));
    }

    #[tokio::test]
    async fn test_call_once_does_not_retry() {
        let calls = AtomicU32::new(0);
        let err = call_once(ms(100), async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(RecallError::http(503, "busy"))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_retryable());
    }
}
