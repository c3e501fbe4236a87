//! Retry-inside-breaker composition
//!
//! The breaker decides whether an attempt sequence may start at all. Once admitted, the
//! retrier owns the attempts, and only the error left after the last attempt reaches the
//! breaker's accounting. Transient faults that survive every retry are wrapped in
//! [`MappingError::RetryExhausted`]; everything else keeps its own kind.

use crate::error::{MappingError, Result};
use crate::error_recovery::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
use crate::error_recovery::events::{ResilienceEvent, ResilienceListener};
use crate::error_recovery::retry_policy::{RetryExecutor, RetryPolicy, RetryStats};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Resilience configuration for one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Retry policy configuration
    pub retry: RetryPolicy,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Combined statistics of both layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceStats {
    pub retry: RetryStats,
    pub circuit_breaker: CircuitBreakerStats,
}

/// Executes operations through a circuit breaker wrapping a retrier
pub struct ResilientExecutor {
    name: String,
    breaker: CircuitBreaker,
    retrier: RetryExecutor,
    listeners: RwLock<Vec<Arc<dyn ResilienceListener>>>,
}

impl ResilientExecutor {
    /// Create an executor with the default fault classification
    pub fn new(name: impl Into<String>, config: ResilienceConfig) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), config.circuit_breaker),
            retrier: RetryExecutor::new(config.retry),
            name,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Executor name, shared with its breaker
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a listener on the executor and both layers
    pub async fn add_listener(&self, listener: Arc<dyn ResilienceListener>) {
        self.breaker.add_listener(listener.clone()).await;
        self.retrier.add_listener(listener.clone()).await;
        self.listeners.write().await.push(listener);
    }

    /// Run `operation` with retries under the circuit breaker
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker.try_acquire(operation_name).await?;

        let started = Instant::now();
        let (result, attempts) = self.retrier.execute_counted(operation_name, operation).await;
        let duration = started.elapsed();

        match result {
            Ok(value) => {
                self.breaker.record_success(operation_name).await;
                self.emit(ResilienceEvent::OperationSucceeded {
                    operation: operation_name.to_string(),
                    attempts,
                    duration_ms: duration.as_millis() as u64,
                    timestamp: Utc::now(),
                })
                .await;
                Ok(value)
            }
            Err(error) => {
                self.breaker.record_failure(operation_name, &error).await;

                let error = if error.is_retryable() {
                    MappingError::RetryExhausted {
                        operation: operation_name.to_string(),
                        attempts,
                        duration,
                        source: Box::new(error),
                    }
                } else {
                    debug!(
                        executor = %self.name,
                        operation = %operation_name,
                        "Propagating {} fault unchanged",
                        error.kind()
                    );
                    error
                };

                self.emit(ResilienceEvent::OperationFailed {
                    operation: operation_name.to_string(),
                    kind: error.kind(),
                    attempts,
                    duration_ms: duration.as_millis() as u64,
                    timestamp: Utc::now(),
                })
                .await;
                Err(error)
            }
        }
    }

    /// Current breaker state
    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    /// Snapshot of retry and breaker statistics
    pub async fn get_stats(&self) -> ResilienceStats {
        ResilienceStats {
            retry: self.retrier.get_stats().await,
            circuit_breaker: self.breaker.get_stats().await,
        }
    }

    /// Force the breaker back to closed
    pub async fn reset(&self) {
        self.breaker.reset().await;
    }

    async fn emit(&self, event: ResilienceEvent) {
        for listener in self.listeners.read().await.iter() {
            listener.on_event(&event).await;
        }
    }
}
