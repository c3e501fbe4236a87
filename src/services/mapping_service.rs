//! Bidirectional triplet ↔ code mapping
//!
//! Every triplet with a code has two entries in the store:
//! - forward `ttp:<triplet id>` → code
//! - reverse `ptk:<code>` → triplet JSON
//!
//! Both are written in one atomic batch, reverse entry first. The lookup and the batch are
//! separate resilient calls: the code is drawn once and a retried batch rewrites both
//! entries. Refreshing a triplet points the forward entry at a new code and leaves the old
//! reverse entry in place, so previously issued codes keep resolving. Codes are random and
//! not checked for uniqueness.

use crate::error::{ErrorReporter, MappingError, Result};
use crate::error_recovery::{CircuitState, ResilienceConfig, ResilientExecutor};
use crate::id_generator::IdGenerator;
use crate::services::triplet::Triplet;
use crate::storage::{ConnectionStatus, MappingStore, StoreOp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Key prefix of forward (triplet → code) entries
pub const FORWARD_PREFIX: &str = "ttp:";

/// Key prefix of reverse (code → triplet) entries
pub const REVERSE_PREFIX: &str = "ptk:";

/// Operation name of the forward/reverse pair write
pub const STORE_PAIR_OPERATION: &str = "store_mapping";

/// Overall service health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Degraded,
}

/// Health snapshot of the service and its backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub store: ConnectionStatus,
    pub circuit_state: CircuitState,
    pub timestamp: DateTime<Utc>,
}

/// Maps triplets to short codes and back through a resilient executor
pub struct MappingService {
    store: Arc<dyn MappingStore>,
    executor: Arc<ResilientExecutor>,
    generator: IdGenerator,
}

impl MappingService {
    /// Create a service with its own executor and the default code generator
    pub fn new(store: Arc<dyn MappingStore>, config: ResilienceConfig) -> Self {
        Self::with_executor(
            store,
            Arc::new(ResilientExecutor::new("mapping_store", config)),
            IdGenerator::new(),
        )
    }

    /// Create a service around an existing executor and generator
    pub fn with_executor(
        store: Arc<dyn MappingStore>,
        executor: Arc<ResilientExecutor>,
        generator: IdGenerator,
    ) -> Self {
        Self {
            store,
            executor,
            generator,
        }
    }

    /// The executor every store call goes through
    pub fn executor(&self) -> &Arc<ResilientExecutor> {
        &self.executor
    }

    /// Return the triplet's current code, issuing one if it has none
    pub async fn get_or_create_code(&self, triplet: &Triplet) -> Result<String> {
        triplet.validate()?;

        self.lookup_or_issue(triplet)
            .await
            .inspect_err(|e| ErrorReporter::log_error(e, Some("get_or_create_code")))
    }

    /// Issue a new code for the triplet, replacing its current one
    pub async fn refresh_code(&self, triplet: &Triplet) -> Result<String> {
        triplet.validate()?;

        self.reissue(triplet)
            .await
            .inspect_err(|e| ErrorReporter::log_error(e, Some("refresh_code")))
    }

    /// Look up the triplet a code was issued for
    pub async fn resolve_code(&self, code: &str) -> Result<Triplet> {
        if code.trim().is_empty() {
            warn!("Rejected blank code for resolution");
            return Err(MappingError::validation("Invalid code provided."));
        }

        self.executor
            .execute("resolve_code", || self.lookup_triplet(code))
            .await
            .inspect_err(|e| ErrorReporter::log_error(e, Some("resolve_code")))
    }

    /// Snapshot of store connectivity and breaker state
    pub async fn health(&self) -> HealthReport {
        let store = self.store.status();
        let circuit_state = self.executor.circuit_state().await;

        let status = if store.is_ready() && circuit_state != CircuitState::Open {
            HealthStatus::Up
        } else {
            HealthStatus::Degraded
        };

        HealthReport {
            status,
            store,
            circuit_state,
            timestamp: Utc::now(),
        }
    }

    async fn lookup_or_issue(&self, triplet: &Triplet) -> Result<String> {
        let triplet_id = triplet.triplet_id();
        let forward_key = format!("{}{}", FORWARD_PREFIX, triplet_id);

        let existing = self
            .executor
            .execute("get_or_create_code", || self.read(&forward_key))
            .await?;

        if let Some(code) = existing {
            debug!(triplet_id = %triplet_id, code = %code, "Found existing code");
            return Ok(code);
        }

        let code = self.generator.generate()?;
        info!(triplet_id = %triplet_id, code = %code, "Issuing new code");
        self.store_pair(triplet, &forward_key, &code).await?;
        Ok(code)
    }

    async fn reissue(&self, triplet: &Triplet) -> Result<String> {
        let triplet_id = triplet.triplet_id();
        let forward_key = format!("{}{}", FORWARD_PREFIX, triplet_id);

        let previous = self
            .executor
            .execute("refresh_code", || self.read(&forward_key))
            .await?;

        match previous {
            Some(old) => info!(triplet_id = %triplet_id, old_code = %old, "Refreshing code"),
            None => info!(triplet_id = %triplet_id, "Refresh for unmapped triplet, issuing first code"),
        }

        let code = self.generator.generate()?;
        self.store_pair(triplet, &forward_key, &code).await?;
        info!(triplet_id = %triplet_id, code = %code, "Refreshed mapping");
        Ok(code)
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.get(key).await?)
    }

    /// Write both entries for `code`; every retry rewrites the whole pair
    async fn store_pair(&self, triplet: &Triplet, forward_key: &str, code: &str) -> Result<()> {
        let payload = serde_json::to_string(triplet)?;
        self.executor
            .execute(STORE_PAIR_OPERATION, || {
                self.write_pair(forward_key, code, payload.as_str())
            })
            .await
    }

    async fn write_pair(&self, forward_key: &str, code: &str, payload: &str) -> Result<()> {
        // reverse first, so a partly applied batch never leaves a forward entry
        // pointing at a code that does not resolve
        let ops = vec![
            StoreOp::set(format!("{}{}", REVERSE_PREFIX, code), payload),
            StoreOp::set(forward_key, code),
        ];

        for (index, result) in self.store.batch(ops).await.into_iter().enumerate() {
            if let Err(e) = result {
                error!(
                    forward_key = %forward_key,
                    index = index,
                    "Batch write of mapping failed: {}",
                    e
                );
                return Err(e.into());
            }
        }

        debug!(forward_key = %forward_key, code = %code, "Stored mapping");
        Ok(())
    }

    async fn lookup_triplet(&self, code: &str) -> Result<Triplet> {
        let reverse_key = format!("{}{}", REVERSE_PREFIX, code);

        let payload = self.read(&reverse_key).await?.ok_or_else(|| {
            MappingError::not_found(format!("No triplet found for code: {}", code))
        })?;

        serde_json::from_str(&payload).map_err(|e| {
            error!(key = %reverse_key, "Stored triplet payload is unreadable: {}", e);
            MappingError::corruption(reverse_key.as_str(), e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_recovery::{CircuitBreakerConfig, RetryPolicy};
    use crate::storage::{MockMappingStore, StoreError};
    use std::time::Duration;

    fn no_retry_config() -> ResilienceConfig {
        ResilienceConfig {
            retry: RetryPolicy::no_retry(),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                cooldown: Duration::from_secs(5),
            },
        }
    }

    fn service(store: MockMappingStore) -> MappingService {
        MappingService::new(Arc::new(store), no_retry_config())
    }

    #[tokio::test]
    async fn test_existing_code_is_returned_without_write() {
        let triplet = Triplet::new("shoes", "google", "ad1");
        let key = format!("{}{}", FORWARD_PREFIX, triplet.triplet_id());

        let mut store = MockMappingStore::new();
        store
            .expect_get()
            .withf(move |k| k == key)
            .times(1)
            .returning(|_| Ok(Some("abc123XYZ0".to_string())));
        store.expect_batch().never();

        let code = service(store).get_or_create_code(&triplet).await.unwrap();
        assert_eq!(code, "abc123XYZ0");
    }

    #[tokio::test]
    async fn test_new_code_writes_both_entries_in_one_batch() {
        let triplet = Triplet::new("Shoes", "google", "ad1");
        let forward = format!("{}{}", FORWARD_PREFIX, triplet.triplet_id());

        let mut store = MockMappingStore::new();
        store.expect_get().times(1).returning(|_| Ok(None));
        store
            .expect_batch()
            .times(1)
            .withf(move |ops| {
                ops.len() == 2
                    && ops[0].key().starts_with(REVERSE_PREFIX)
                    && matches!(&ops[0], StoreOp::Set { value, .. } if value.contains("\"Shoes\""))
                    && ops[1].key() == forward
            })
            .returning(|ops| ops.iter().map(|_| Ok(())).collect());

        let code = service(store).get_or_create_code(&triplet).await.unwrap();
        assert_eq!(code.len(), 10);
    }

    #[tokio::test]
    async fn test_partial_batch_failure_fails_call() {
        let mut store = MockMappingStore::new();
        store.expect_get().returning(|_| Ok(None));
        store.expect_batch().returning(|_| {
            vec![Ok(()), Err(StoreError::Backend("READONLY replica".into()))]
        });

        let err = service(store)
            .get_or_create_code(&Triplet::new("shoes", "google", "ad1"))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 503);
        assert!(matches!(err.root_cause(), MappingError::Backend(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_batch_rewrites_same_pair() {
        let written: Arc<std::sync::Mutex<Vec<Vec<String>>>> = Arc::default();
        let seen = Arc::clone(&written);

        let mut store = MockMappingStore::new();
        store.expect_get().times(1).returning(|_| Ok(None));
        store.expect_batch().times(2).returning(move |ops| {
            let keys: Vec<String> = ops.iter().map(|op| op.key().to_string()).collect();
            let mut seen = seen.lock().unwrap();
            seen.push(keys);
            if seen.len() == 1 {
                vec![Ok(()), Err(StoreError::Timeout("EXEC".into()))]
            } else {
                ops.iter().map(|_| Ok(())).collect()
            }
        });

        let mut config = no_retry_config();
        config.retry.max_retries = 1;
        let service = MappingService::new(Arc::new(store), config);

        let code = service
            .get_or_create_code(&Triplet::new("shoes", "google", "ad1"))
            .await
            .unwrap();

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], written[1]);
        assert_eq!(written[1][0], format!("{}{}", REVERSE_PREFIX, code));
    }

    #[tokio::test]
    async fn test_invalid_triplet_never_touches_store() {
        let mut store = MockMappingStore::new();
        store.expect_get().never();
        store.expect_batch().never();
        let service = service(store);

        let long = "x".repeat(256);
        let err = service
            .get_or_create_code(&Triplet::new(long.as_str(), "google", "ad1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));

        let err = service
            .refresh_code(&Triplet::new("shoes", "", "ad1"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = service.resolve_code("   ").await.unwrap_err();
        assert!(matches!(err, MappingError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_corruption() {
        let mut store = MockMappingStore::new();
        store
            .expect_get()
            .withf(|k| k == "ptk:broken0001")
            .times(1)
            .returning(|_| Ok(Some("{not json".to_string())));

        let err = service(store).resolve_code("broken0001").await.unwrap_err();
        match err {
            MappingError::Corruption { key, .. } => assert_eq!(key, "ptk:broken0001"),
            other => panic!("expected Corruption, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_not_found_does_not_trip_breaker() {
        let mut store = MockMappingStore::new();
        store.expect_get().returning(|_| Ok(None));
        store.expect_status().return_const(ConnectionStatus::Ready);
        let service = service(store);

        for _ in 0..5 {
            let err = service.resolve_code("unknown-code").await.unwrap_err();
            assert_eq!(err.status_code(), 404);
        }

        let health = service.health().await;
        assert_eq!(health.status, HealthStatus::Up);
        assert_eq!(health.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_health_degraded_when_breaker_open() {
        let mut store = MockMappingStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Backend("connection refused".into())));
        store.expect_status().return_const(ConnectionStatus::Connecting);
        let service = service(store);

        for _ in 0..2 {
            let _ = service.resolve_code("abc").await;
        }

        let err = service.resolve_code("abc").await.unwrap_err();
        assert!(matches!(err, MappingError::BreakerOpen { .. }));

        let health = service.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.store, ConnectionStatus::Connecting);
        assert_eq!(health.circuit_state, CircuitState::Open);
    }
}
