//! Structured resilience events
//!
//! The retrier, the circuit breaker and the executor composing them report what they do
//! through [`ResilienceEvent`]s. Where the events go is up to the registered
//! [`ResilienceListener`]s; [`TracingListener`] writes them to the log.

use crate::error::FaultKind;
use crate::error_recovery::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome of a single attempt inside a retry sequence
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt returned a value
    Succeeded,
    /// The attempt failed; `retry_in_ms` is set when another attempt follows
    Failed {
        kind: FaultKind,
        message: String,
        retry_in_ms: Option<u64>,
    },
}

/// Events emitted by the resilience layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResilienceEvent {
    /// One attempt of a retry sequence finished
    Attempt {
        operation: String,
        /// Zero-based attempt index
        attempt: u32,
        outcome: AttemptOutcome,
        timestamp: DateTime<Utc>,
    },
    /// The breaker moved between states
    StateChanged {
        breaker: String,
        operation: String,
        from: CircuitState,
        to: CircuitState,
        timestamp: DateTime<Utc>,
    },
    /// The breaker rejected a call without running it
    RequestBlocked {
        breaker: String,
        operation: String,
        timestamp: DateTime<Utc>,
    },
    /// A resilient call completed
    OperationSucceeded {
        operation: String,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A resilient call gave up
    OperationFailed {
        operation: String,
        kind: FaultKind,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ResilienceEvent {
    /// Operation the event belongs to
    pub fn operation(&self) -> &str {
        match self {
            ResilienceEvent::Attempt { operation, .. }
            | ResilienceEvent::StateChanged { operation, .. }
            | ResilienceEvent::RequestBlocked { operation, .. }
            | ResilienceEvent::OperationSucceeded { operation, .. }
            | ResilienceEvent::OperationFailed { operation, .. } => operation,
        }
    }
}

/// Receiver for resilience events
#[async_trait::async_trait]
pub trait ResilienceListener: Send + Sync {
    /// Called for every emitted event
    async fn on_event(&self, event: &ResilienceEvent);
}

/// Listener that forwards events to `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingListener;

#[async_trait::async_trait]
impl ResilienceListener for TracingListener {
    async fn on_event(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::Attempt {
                operation,
                attempt,
                outcome: AttemptOutcome::Succeeded,
                ..
            } => {
                debug!(operation = %operation, attempt = attempt + 1, "Attempt succeeded");
            }
            ResilienceEvent::Attempt {
                operation,
                attempt,
                outcome:
                    AttemptOutcome::Failed {
                        kind,
                        message,
                        retry_in_ms,
                    },
                ..
            } => match retry_in_ms {
                Some(delay) => warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    kind = %kind,
                    retry_in_ms = delay,
                    "Attempt failed, retrying: {}",
                    message
                ),
                None => warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    kind = %kind,
                    "Attempt failed, giving up: {}",
                    message
                ),
            },
            ResilienceEvent::StateChanged {
                breaker,
                operation,
                from,
                to,
                ..
            } => {
                info!(
                    breaker = %breaker,
                    operation = %operation,
                    from = %from,
                    to = %to,
                    "Circuit breaker state transition"
                );
            }
            ResilienceEvent::RequestBlocked {
                breaker, operation, ..
            } => {
                warn!(breaker = %breaker, operation = %operation, "Circuit breaker open, request blocked");
            }
            ResilienceEvent::OperationSucceeded {
                operation,
                attempts,
                duration_ms,
                ..
            } => {
                debug!(
                    operation = %operation,
                    attempts = attempts,
                    duration_ms = duration_ms,
                    "Resilient operation succeeded"
                );
            }
            ResilienceEvent::OperationFailed {
                operation,
                kind,
                attempts,
                duration_ms,
                ..
            } => {
                warn!(
                    operation = %operation,
                    kind = %kind,
                    attempts = attempts,
                    duration_ms = duration_ms,
                    "Resilient operation failed"
                );
            }
        }
    }
}
