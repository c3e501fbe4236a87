//! In-memory mapping store
//!
//! Data lives in a process-local map and is lost when the process exits.

use super::{ConnectionStatus, MappingStore, StoreError, StoreOp};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Remove every key
    pub async fn clear(&self) {
        self.data.write().await.clear();
    }
}

#[async_trait]
impl MappingStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn batch(&self, ops: Vec<StoreOp>) -> Vec<Result<(), StoreError>> {
        // a single write guard makes the batch visible all at once
        let mut data = self.data.write().await;
        debug!(ops = ops.len(), "Applying in-memory batch");

        ops.into_iter()
            .map(|op| match op {
                StoreOp::Set { key, value } => {
                    data.insert(key, value);
                    Ok(())
                }
            })
            .collect()
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Ready
    }
}
