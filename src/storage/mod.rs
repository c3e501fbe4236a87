//! Key-value backends holding the mapping records
//!
//! Available implementations:
//! - Redis through a managed connection (production)
//! - In-memory map (embedded use and development)

pub mod memory;
pub mod redis;

use crate::error::MappingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

/// Backend failure reported by a store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Storage backend timed out: {0}")]
    Timeout(String),
}

impl From<StoreError> for MappingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(msg) => MappingError::backend(msg),
            StoreError::Timeout(msg) => MappingError::timeout(msg),
        }
    }
}

/// One write inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set { key: String, value: String },
}

impl StoreOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        StoreOp::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StoreOp::Set { key, .. } => key,
        }
    }
}

/// Connectivity as last observed by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Ready,
    Connecting,
    Error,
}

impl ConnectionStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionStatus::Ready)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Ready => write!(f, "ready"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Key-value store the mapping service writes through
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Read a key; `None` when absent
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a single key
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Apply all ops as one atomic batch, reporting one result per op
    async fn batch(&self, ops: Vec<StoreOp>) -> Vec<Result<(), StoreError>>;

    /// Current connectivity
    fn status(&self) -> ConnectionStatus;
}
