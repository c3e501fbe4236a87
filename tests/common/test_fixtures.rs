//! Test fixtures and utilities for consistent test setup
//!
//! Provides reusable stores, resilience settings and service wiring using rstest
//! fixtures.

use rstest::*;
use std::sync::Arc;
use std::time::Duration;
use traffic_param_mapper::error_recovery::{
    BackoffPolicy, CircuitBreakerConfig, ResilienceConfig, ResilientExecutor, RetryPolicy,
};
use traffic_param_mapper::mock::{EventRecorder, FlakyStore};
use traffic_param_mapper::{IdGenerator, MappingService, Triplet};

/// Small delays and thresholds so paused-clock tests stay readable
#[fixture]
pub fn fast_resilience(#[default(2)] max_retries: u32) -> ResilienceConfig {
    ResilienceConfig {
        retry: RetryPolicy {
            max_retries,
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                jitter: true,
            },
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown: Duration::from_secs(1),
        },
    }
}

#[fixture]
pub fn flaky_store() -> Arc<FlakyStore> {
    Arc::new(FlakyStore::new())
}

#[fixture]
pub fn shoes() -> Triplet {
    Triplet::new("Shoes", "google", "ad1")
}

/// A service over `store` with an event recorder attached to its executor
pub async fn service_with_recorder(
    store: Arc<FlakyStore>,
    config: ResilienceConfig,
) -> (MappingService, Arc<EventRecorder>) {
    let executor = Arc::new(ResilientExecutor::new("test_store", config));
    let recorder = Arc::new(EventRecorder::new());
    executor.add_listener(recorder.clone()).await;

    let service = MappingService::with_executor(store, executor, IdGenerator::new());
    (service, recorder)
}
