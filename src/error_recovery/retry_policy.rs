//! Exponential backoff retry with symmetric jitter
//!
//! [`BackoffPolicy`] is the pure delay function, [`RetryExecutor`] drives an operation
//! through it. Every attempt is reported as a [`ResilienceEvent::Attempt`] and counted
//! in [`RetryStats`], so callers can observe what happened without timing anything.

use crate::error::{MappingError, Result};
use crate::error_recovery::events::{AttemptOutcome, ResilienceEvent, ResilienceListener};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Fraction of the computed delay used as the jitter band on each side
pub const JITTER_FACTOR: f64 = 0.1;

/// Delay schedule: `min(base * 2^attempt, max)` with optional ±10% jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for any delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Perturb delays by up to ±10%
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after the failed attempt with zero-based index `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`BackoffPolicy::delay`] with an explicit jitter source
    ///
    /// The result is rounded to whole milliseconds and always lies in `[0, max_delay]`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let mut delay_ms = (base_ms * 2f64.powi(attempt.min(63) as i32)).min(max_ms);

        if self.jitter && delay_ms > 0.0 {
            let amount = delay_ms * JITTER_FACTOR;
            delay_ms += rng.gen_range(-amount..=amount);
        }

        Duration::from_millis(delay_ms.round().clamp(0.0, max_ms) as u64)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `max_retries + 1` attempts in total
    pub max_retries: u32,
    /// Delay schedule between attempts
    #[serde(flatten)]
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Predicate deciding whether a failed attempt may be retried
pub type RetryPredicate = Arc<dyn Fn(&MappingError) -> bool + Send + Sync>;

/// Retry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryStats {
    /// Total operations attempted
    pub total_operations: u64,
    /// Successful operations (no retry needed)
    pub successful_first_attempt: u64,
    /// Successful operations (after retry)
    pub successful_after_retry: u64,
    /// Failed operations (all retries exhausted)
    pub failed_after_retries: u64,
    /// Failed operations rejected by the retry predicate
    pub failed_not_retryable: u64,
    /// Total attempts across all operations
    pub total_attempts: u64,
    /// Total retries across all operations
    pub total_retry_attempts: u64,
    /// Last retry timestamp
    pub last_retry: Option<DateTime<Utc>>,
}

/// Runs operations under a [`RetryPolicy`]
pub struct RetryExecutor {
    policy: RetryPolicy,
    should_retry: RetryPredicate,
    stats: Arc<RwLock<RetryStats>>,
    listeners: Arc<RwLock<Vec<Arc<dyn ResilienceListener>>>>,
}

impl RetryExecutor {
    /// Create a retry executor that retries transient faults only
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_predicate(policy, Arc::new(MappingError::is_retryable))
    }

    /// Create a retry executor with a custom retry predicate
    pub fn with_predicate(policy: RetryPolicy, should_retry: RetryPredicate) -> Self {
        Self {
            policy,
            should_retry,
            stats: Arc::new(RwLock::new(RetryStats::default())),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Add event listener
    pub async fn add_listener(&self, listener: Arc<dyn ResilienceListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Execute operation with retry policy
    pub async fn execute<F, T, Fut>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_counted(operation_name, operation).await.0
    }

    /// Execute operation with retry policy, also returning the number of attempts made
    pub async fn execute_counted<F, T, Fut>(
        &self,
        operation_name: &str,
        operation: F,
    ) -> (Result<T>, u32)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.write().await.total_operations += 1;

        let mut attempt: u32 = 0;

        loop {
            self.stats.write().await.total_attempts += 1;

            match operation().await {
                Ok(value) => {
                    {
                        let mut stats = self.stats.write().await;
                        if attempt == 0 {
                            stats.successful_first_attempt += 1;
                        } else {
                            stats.successful_after_retry += 1;
                        }
                    }

                    if attempt > 0 {
                        info!(
                            operation = %operation_name,
                            "Operation succeeded after {} attempts",
                            attempt + 1
                        );
                    }

                    self.emit_attempt(operation_name, attempt, AttemptOutcome::Succeeded)
                        .await;
                    return (Ok(value), attempt + 1);
                }
                Err(error) => {
                    let retryable = (self.should_retry)(&error);
                    let last_attempt = attempt >= self.policy.max_retries;

                    if !retryable || last_attempt {
                        {
                            let mut stats = self.stats.write().await;
                            if retryable {
                                stats.failed_after_retries += 1;
                            } else {
                                stats.failed_not_retryable += 1;
                            }
                        }

                        if retryable {
                            warn!(
                                operation = %operation_name,
                                "Operation failed after {} attempts: {}",
                                attempt + 1,
                                error
                            );
                        } else {
                            debug!(operation = %operation_name, "Error not retryable: {}", error);
                        }

                        self.emit_attempt(
                            operation_name,
                            attempt,
                            AttemptOutcome::Failed {
                                kind: error.kind(),
                                message: error.to_string(),
                                retry_in_ms: None,
                            },
                        )
                        .await;
                        return (Err(error), attempt + 1);
                    }

                    let delay = self.policy.backoff.delay(attempt);

                    {
                        let mut stats = self.stats.write().await;
                        stats.total_retry_attempts += 1;
                        stats.last_retry = Some(Utc::now());
                    }

                    debug!(
                        operation = %operation_name,
                        "Retrying after {:?} (attempt {}/{})",
                        delay,
                        attempt + 2,
                        self.policy.max_attempts()
                    );

                    self.emit_attempt(
                        operation_name,
                        attempt,
                        AttemptOutcome::Failed {
                            kind: error.kind(),
                            message: error.to_string(),
                            retry_in_ms: Some(delay.as_millis() as u64),
                        },
                    )
                    .await;

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Get retry statistics
    pub async fn get_stats(&self) -> RetryStats {
        self.stats.read().await.clone()
    }

    /// Reset statistics
    pub async fn reset_stats(&self) {
        *self.stats.write().await = RetryStats::default();
    }

    async fn emit_attempt(&self, operation_name: &str, attempt: u32, outcome: AttemptOutcome) {
        let event = ResilienceEvent::Attempt {
            operation: operation_name.to_string(),
            attempt,
            outcome,
            timestamp: Utc::now(),
        };

        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            listener.on_event(&event).await;
        }
    }
}

/// Retry builder for fluent API
pub struct RetryBuilder {
    policy: RetryPolicy,
    should_retry: Option<RetryPredicate>,
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryBuilder {
    /// Create new retry builder
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
            should_retry: None,
        }
    }

    /// Set maximum number of retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.policy.max_retries = retries;
        self
    }

    /// Set base delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.backoff.base_delay = delay;
        self
    }

    /// Set delay cap
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.backoff.max_delay = delay;
        self
    }

    /// Enable or disable jitter
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.backoff.jitter = enabled;
        self
    }

    /// Set retry predicate
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&MappingError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Build retry executor
    pub fn build(self) -> RetryExecutor {
        match self.should_retry {
            Some(predicate) => RetryExecutor::with_predicate(self.policy, predicate),
            None => RetryExecutor::new(self.policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: false,
        };

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };

        assert_eq!(policy.delay(10), Duration::from_secs(5));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jittered_delay_stays_in_bounds() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(1500),
            jitter: true,
        };
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..=8 {
            for _ in 0..200 {
                let delay = policy.delay_with(attempt, &mut rng);
                assert!(delay <= policy.max_delay, "attempt {attempt}: {delay:?}");

                let nominal = (200.0 * 2f64.powi(attempt as i32)).min(1500.0);
                let low = (nominal * 0.9).floor() as u64;
                assert!(delay.as_millis() as u64 >= low, "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn test_zero_base_delay_is_zero() {
        let policy = BackoffPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        assert_eq!(policy.delay(3), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_executor_recovers() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let executor = RetryBuilder::new()
            .max_retries(3)
            .base_delay(Duration::from_millis(10))
            .build();

        let counter = attempt_count.clone();
        let (result, attempts) = executor
            .execute_counted("flaky", move || {
                let count = counter.clone();
                async move {
                    let current = count.fetch_add(1, Ordering::SeqCst) + 1;
                    if current < 3 {
                        Err(MappingError::backend("Simulated failure"))
                    } else {
                        Ok("Success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "Success");
        assert_eq!(attempts, 3);

        let stats = executor.get_stats().await;
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.successful_after_retry, 1);
        assert_eq!(stats.total_retry_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_executor_exhausts_and_returns_last_error() {
        let executor = RetryBuilder::new()
            .max_retries(2)
            .base_delay(Duration::from_millis(5))
            .build();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let (result, attempts) = executor
            .execute_counted("down", move || {
                let count = counter.clone();
                async move {
                    let n = count.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(MappingError::backend(format!("failure {n}")))
                }
            })
            .await;

        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(MappingError::Backend(msg)) => assert_eq!(msg, "failure 2"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(executor.get_stats().await.failed_after_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_short_circuits() {
        let executor = RetryBuilder::new().max_retries(5).build();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = executor
            .execute("lookup", move || {
                let count = counter.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(MappingError::not_found("missing"))
                }
            })
            .await;

        assert!(matches!(result, Err(MappingError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = executor.get_stats().await;
        assert_eq!(stats.failed_not_retryable, 1);
        assert_eq!(stats.total_retry_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let executor = RetryBuilder::new()
            .max_retries(2)
            .base_delay(Duration::from_millis(1))
            .retry_if(|_| false)
            .build();

        let (result, attempts) = executor
            .execute_counted("never", || async {
                Err::<(), _>(MappingError::backend("down"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
