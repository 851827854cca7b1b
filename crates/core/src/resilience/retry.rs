use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::{ConfigError, ConfigResult};

/// Decides whether a failed attempt is retried. Receives the error and the
/// 1-based number of the attempt that just failed.
pub type ShouldRetry = Arc<dyn Fn(&ConfigError, u32) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    /// Calls to `execute`
    pub executions: u64,
    /// Individual operation invocations
    pub attempts: u64,
    /// Attempts beyond the first
    pub retries: u64,
    /// Executions that gave up and returned an error
    pub exhausted: u64,
}

/// Bounded retry with exponential backoff.
#[derive(Clone)]
pub struct RetryManager {
    options: RetryOptions,
    should_retry: Option<ShouldRetry>,
    stats: Arc<RwLock<RetryStats>>,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}

impl RetryManager {
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options: RetryOptions {
                max_attempts: options.max_attempts.max(1),
                ..options
            },
            should_retry: None,
            stats: Arc::new(RwLock::new(RetryStats::default())),
        }
    }

    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ConfigError, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Runs `operation` until it succeeds, the attempts are used up or the
    /// retry predicate refuses. The last error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> ConfigResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ConfigResult<T>>,
    {
        let max_attempts = self.options.max_attempts;
        let max_delay = Duration::from_millis(self.options.max_delay_ms);
        let mut delay_ms = self.options.initial_delay_ms as f64;
        let mut attempt = 0u32;

        self.stats.write().await.executions += 1;

        loop {
            attempt += 1;
            {
                let mut stats = self.stats.write().await;
                stats.attempts += 1;
                if attempt > 1 {
                    stats.retries += 1;
                }
            }

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "重试后操作成功");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let retryable = attempt < max_attempts
                && self
                    .should_retry
                    .as_ref()
                    .map_or(true, |predicate| predicate(&error, attempt));
            if !retryable {
                self.stats.write().await.exhausted += 1;
                return Err(error);
            }

            let wait = Duration::from_millis(delay_ms as u64).min(max_delay);
            warn!(
                attempt,
                max_attempts,
                delay_ms = wait.as_millis() as u64,
                error = %error,
                "操作失败，等待后重试"
            );
            tokio::time::sleep(wait).await;
            delay_ms *= self.options.backoff_multiplier;
        }
    }

    pub async fn stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast(max_attempts: u32) -> RetryOptions {
        RetryOptions {
            max_attempts,
            initial_delay_ms: 5,
            backoff_multiplier: 2.0,
            max_delay_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_two_failures() {
        let retry = RetryManager::new(fast(3));
        let calls = AtomicU32::new(0);

        let result = retry
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ConfigError::configuration(format!("attempt {n} failed")))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = retry.stats().await;
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.exhausted, 0);
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let retry = RetryManager::new(fast(5));
        let calls = AtomicU32::new(0);
        retry
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ConfigError>(())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_retry_rejection_stops_immediately() {
        let retry = RetryManager::new(fast(3)).with_should_retry(|_, _| false);
        let calls = AtomicU32::new(0);

        let err = retry
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConfigError::configuration("nope"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), ConfigError::configuration("nope").to_string());
    }

    #[tokio::test]
    async fn test_returns_last_error_after_exhaustion() {
        let retry = RetryManager::new(fast(3));
        let calls = AtomicU32::new(0);

        let err = retry
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(ConfigError::with_code(format!("E{n}"), "failed"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some("E3"));
        assert_eq!(retry.stats().await.exhausted, 1);
    }

    #[tokio::test]
    async fn test_backoff_is_capped() {
        let retry = RetryManager::new(RetryOptions {
            max_attempts: 4,
            initial_delay_ms: 10,
            backoff_multiplier: 10.0,
            max_delay_ms: 15,
        });

        let started = Instant::now();
        let _ = retry
            .execute(|| async { Err::<(), _>(ConfigError::configuration("x")) })
            .await;

        // 10 + 15 + 15 ms of sleeping, never 100 or 1000
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(500));
    }
}
