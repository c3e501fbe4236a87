//! Error recovery for calls against the mapping backend
//!
//! This module provides the retry policy, the circuit breaker and the executor
//! composing them, plus the events they report.

pub mod circuit_breaker;
pub mod events;
pub mod resilient_executor;
pub mod retry_policy;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, FailurePredicate,
};
pub use events::{AttemptOutcome, ResilienceEvent, ResilienceListener, TracingListener};
pub use resilient_executor::{ResilienceConfig, ResilienceStats, ResilientExecutor};
pub use retry_policy::{
    BackoffPolicy, RetryBuilder, RetryExecutor, RetryPolicy, RetryPredicate, RetryStats,
};
