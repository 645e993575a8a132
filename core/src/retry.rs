use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff policy for transient transport failures.
///
/// Each failed attempt sleeps for a duration drawn uniformly from
/// `[min_delay, max_delay]`. `max_attempts` of `None` retries forever,
/// matching the behavior callers rely on for flaky connections; a cap can
/// be configured where giving up is preferable.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            min_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(90),
        }
    }
}

impl RetryPolicy {
    /// Millisecond-scale delays, for tests.
    pub fn fast() -> Self {
        Self {
            max_attempts: None,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    fn backoff(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max.max(min)))
    }
}

/// Runs `operation`, retrying with a randomized backoff sleep for as long as
/// it fails with a transient error. Non-transient errors propagate
/// immediately.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) if error.is_transient() => {
                attempt += 1;
                if let Some(max) = policy.max_attempts {
                    if attempt >= max {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %error,
                            "giving up after configured retry cap"
                        );
                        return Err(error);
                    }
                }
                let backoff = policy.backoff();
                warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying after backoff"
                );
                sleep(backoff).await;
            }
            Err(error) => {
                debug!(
                    operation = operation_name,
                    error = %error,
                    "non-transient failure, propagating"
                );
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_transient(&RetryPolicy::fast(), "test_op", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err(Error::Transport("connection reset".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn fatal_error_propagates_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = retry_transient(&RetryPolicy::fast(), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Auth("expired token".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn configured_cap_surfaces_the_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let policy = RetryPolicy::fast().with_max_attempts(3);

        let result: Result<()> = retry_transient(&policy, "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Transport("unreachable".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
