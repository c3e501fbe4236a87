//! Circuit breaker gating calls by failure history
//!
//! The breaker is a three-state machine (closed, open, half-open) guarded by a single
//! async mutex. Gating and accounting happen under the lock; the protected operation
//! itself runs outside it, so concurrent callers only serialize on state transitions.
//! Which errors count as failures is decided by a predicate, letting caller-side faults
//! pass through without affecting breaker state.

use crate::error::{MappingError, Result};
use crate::error_recovery::events::{ResilienceEvent, ResilienceListener};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - operations blocked
    Open,
    /// Circuit is half-open - testing if service recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Classified failures while closed before opening the circuit
    pub failure_threshold: u32,
    /// Successes while half-open before closing the circuit
    pub success_threshold: u32,
    /// Time the circuit stays open before admitting a probe
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(15),
        }
    }
}

/// Predicate deciding whether an error counts toward breaker accounting
pub type FailurePredicate = Arc<dyn Fn(&MappingError) -> bool + Send + Sync>;

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Classified failures counted in the current state
    pub failure_count: u32,
    /// Successes counted while half-open
    pub success_count: u32,
    /// Total requests seen by the gate
    pub total_requests: u64,
    /// Successful requests
    pub successful_requests: u64,
    /// Failed requests counted by the breaker
    pub failed_requests: u64,
    /// Failed requests the predicate excluded from accounting
    pub ignored_failures: u64,
    /// Blocked requests
    pub blocked_requests: u64,
    /// Circuit open count
    pub circuit_open_count: u64,
    /// Last counted failure time
    pub last_failure: Option<DateTime<Utc>>,
    /// Last success time
    pub last_success: Option<DateTime<Utc>>,
    /// Milliseconds until an open circuit admits a probe
    pub time_until_half_open_ms: Option<u64>,
}

/// Internal circuit breaker state
struct CircuitBreakerState {
    current_state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    ignored_failures: u64,
    blocked_requests: u64,
    circuit_open_count: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            current_state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_failure_at: None,
            last_success_at: None,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            ignored_failures: 0,
            blocked_requests: 0,
            circuit_open_count: 0,
        }
    }
}

/// Circuit breaker implementation
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    is_failure: FailurePredicate,
    state: Mutex<CircuitBreakerState>,
    event_listeners: RwLock<Vec<Arc<dyn ResilienceListener>>>,
}

impl CircuitBreaker {
    /// Create a breaker that counts transient backend faults only
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_predicate(name, config, Arc::new(MappingError::is_breaker_failure))
    }

    /// Create a breaker with a custom failure predicate
    pub fn with_predicate(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        is_failure: FailurePredicate,
    ) -> Self {
        let name = name.into();
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            cooldown_ms = config.cooldown.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            is_failure,
            state: Mutex::new(CircuitBreakerState::new()),
            event_listeners: RwLock::new(Vec::new()),
        }
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in use
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Add event listener
    pub async fn add_listener(&self, listener: Arc<dyn ResilienceListener>) {
        self.event_listeners.write().await.push(listener);
    }

    /// Run `operation` through the breaker
    ///
    /// Rejected calls fail with [`MappingError::BreakerOpen`] without invoking the
    /// operation. Errors from the operation are returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire(operation_name).await?;

        match operation().await {
            Ok(value) => {
                self.record_success(operation_name).await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(operation_name, &error).await;
                Err(error)
            }
        }
    }

    /// Gate a call: admit it, or reject with [`MappingError::BreakerOpen`]
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here.
    pub async fn try_acquire(&self, operation_name: &str) -> Result<()> {
        let mut events = Vec::new();
        let admitted = {
            let mut state = self.state.lock().await;
            state.total_requests += 1;

            match state.current_state {
                CircuitState::Closed | CircuitState::HalfOpen => true,
                CircuitState::Open => {
                    let cooled_down = state
                        .last_failure_time
                        .is_some_and(|at| at.elapsed() > self.config.cooldown);

                    if cooled_down {
                        self.transition(&mut state, CircuitState::HalfOpen, operation_name, &mut events);
                        true
                    } else {
                        state.blocked_requests += 1;
                        events.push(ResilienceEvent::RequestBlocked {
                            breaker: self.name.clone(),
                            operation: operation_name.to_string(),
                            timestamp: Utc::now(),
                        });
                        false
                    }
                }
            }
        };

        self.emit(events).await;

        if admitted {
            Ok(())
        } else {
            debug!(breaker = %self.name, operation = %operation_name, "Circuit breaker open, blocking request");
            Err(MappingError::breaker_open(operation_name))
        }
    }

    /// Record a successful call
    pub async fn record_success(&self, operation_name: &str) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.successful_requests += 1;
            state.last_success_at = Some(Utc::now());

            match state.current_state {
                CircuitState::HalfOpen => {
                    state.success_count += 1;
                    debug!(
                        breaker = %self.name,
                        operation = %operation_name,
                        "Success in half-open state ({}/{})",
                        state.success_count,
                        self.config.success_threshold
                    );
                    if state.success_count >= self.config.success_threshold {
                        self.transition(&mut state, CircuitState::Closed, operation_name, &mut events);
                        info!(breaker = %self.name, "Circuit breaker closed after successful recovery");
                    }
                }
                CircuitState::Closed if state.failure_count > 0 => {
                    debug!(breaker = %self.name, "Success in closed state resets failure count");
                    state.failure_count = 0;
                }
                CircuitState::Closed | CircuitState::Open => {}
            }
        }

        self.emit(events).await;
    }

    /// Record a failed call
    ///
    /// Returns whether the error was counted; errors the predicate rejects leave the
    /// state untouched.
    pub async fn record_failure(&self, operation_name: &str, error: &MappingError) -> bool {
        if !(self.is_failure)(error) {
            self.state.lock().await.ignored_failures += 1;
            debug!(
                breaker = %self.name,
                operation = %operation_name,
                "Failure not counted by circuit breaker: {}",
                error
            );
            return false;
        }

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.failure_count += 1;
            state.failed_requests += 1;
            state.last_failure_at = Some(Utc::now());

            warn!(
                breaker = %self.name,
                operation = %operation_name,
                state = %state.current_state,
                "Failure recorded ({}/{}): {}",
                state.failure_count,
                self.config.failure_threshold,
                error
            );

            match state.current_state {
                CircuitState::HalfOpen => {
                    self.transition(&mut state, CircuitState::Open, operation_name, &mut events);
                    warn!(breaker = %self.name, "Circuit breaker reopened from half-open");
                }
                CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                    self.transition(&mut state, CircuitState::Open, operation_name, &mut events);
                    error!(
                        breaker = %self.name,
                        "Circuit breaker opened after {} failures",
                        state.failure_count
                    );
                }
                CircuitState::Closed | CircuitState::Open => {}
            }
        }

        self.emit(events).await;
        true
    }

    /// Current state
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.current_state
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock().await;

        let time_until_half_open_ms = match (state.current_state, state.last_failure_time) {
            (CircuitState::Open, Some(at)) => Some(
                self.config
                    .cooldown
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };

        CircuitBreakerStats {
            state: state.current_state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            ignored_failures: state.ignored_failures,
            blocked_requests: state.blocked_requests,
            circuit_open_count: state.circuit_open_count,
            last_failure: state.last_failure_at,
            last_success: state.last_success_at,
            time_until_half_open_ms,
        }
    }

    /// Reset circuit breaker to closed
    pub async fn reset(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            self.transition(&mut state, CircuitState::Closed, "manual_reset", &mut events);
            state.failure_count = 0;
            state.success_count = 0;
        }
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
        self.emit(events).await;
    }

    /// Transition to new state, applying the counter resets each target state requires
    fn transition(
        &self,
        state: &mut CircuitBreakerState,
        new_state: CircuitState,
        operation_name: &str,
        events: &mut Vec<ResilienceEvent>,
    ) {
        let old_state = state.current_state;
        if old_state == new_state {
            return;
        }

        state.current_state = new_state;
        match new_state {
            CircuitState::Closed => {
                state.failure_count = 0;
                state.success_count = 0;
            }
            CircuitState::Open => {
                state.last_failure_time = Some(Instant::now());
                state.success_count = 0;
                state.circuit_open_count += 1;
            }
            CircuitState::HalfOpen => {
                state.failure_count = 0;
                state.success_count = 0;
            }
        }

        events.push(ResilienceEvent::StateChanged {
            breaker: self.name.clone(),
            operation: operation_name.to_string(),
            from: old_state,
            to: new_state,
            timestamp: Utc::now(),
        });
    }

    async fn emit(&self, events: Vec<ResilienceEvent>) {
        if events.is_empty() {
            return;
        }

        let listeners = self.event_listeners.read().await;
        for event in &events {
            for listener in listeners.iter() {
                listener.on_event(event).await;
            }
        }
    }
}
