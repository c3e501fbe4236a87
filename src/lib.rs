//! Resilient bidirectional mapping between traffic-attribution triplets and short codes
//!
//! A triplet `(keyword, src, creative)` is assigned an opaque 10-character code, stored in
//! a key-value backend in both directions so the code can later be resolved back to the
//! triplet. Every backend call goes through a circuit breaker wrapping an exponential
//! backoff retrier.
//!
//! # Features
//!
//! - Case-insensitive triplet identity via SHA-256
//! - Atomic forward/reverse writes (Redis `MULTI`/`EXEC`)
//! - Retry with jittered exponential backoff
//! - Circuit breaker with half-open probing
//! - Fault kinds mapped to HTTP status classes

// Core modules
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod id_generator;
pub mod logging;
pub mod services;
pub mod storage;

// Test support modules - available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-export main types for convenience
pub use config::MapperConfig;
pub use error::{FaultKind, MappingError, Result};
pub use error_recovery::{ResilienceConfig, ResilientExecutor};
pub use id_generator::IdGenerator;
pub use services::{HealthReport, HealthStatus, MappingService, Triplet};
pub use storage::{InMemoryStore, MappingStore, RedisStore};
