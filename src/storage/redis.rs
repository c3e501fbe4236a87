//! Redis mapping store
//!
//! Single keys use plain `GET`/`SET`. Batches go out as one `MULTI`/`EXEC` pipeline so the
//! forward and reverse entries of a mapping are written together or not at all.
//! Retries are not done here; the caller's resilience layer owns them.

use super::{ConnectionStatus, MappingStore, StoreError, StoreOp};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{pipe, AsyncCommands, Client, RedisError, Value};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info, warn};

const STATUS_READY: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_ERROR: u8 = 2;

pub struct RedisStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "myapp:" → "myapp:ttp:...")
    prefix: String,
    status: AtomicU8,
}

impl RedisStore {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with an optional key prefix prepended to every key.
    pub async fn with_prefix(
        connection_string: &str,
        prefix: Option<&str>,
    ) -> Result<Self, StoreError> {
        let client =
            Client::open(connection_string).map_err(|e| StoreError::Backend(e.to_string()))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(classify_redis_error)?;

        info!(prefix = prefix.unwrap_or(""), "Connected to Redis");

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            status: AtomicU8::new(STATUS_READY),
        })
    }

    /// Get the configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Track connectivity from the outcome of a command
    fn observe<T>(&self, result: &Result<T, RedisError>) {
        let status = match result {
            Ok(_) => STATUS_READY,
            Err(e) if e.is_connection_dropped() || e.is_connection_refusal() => STATUS_CONNECTING,
            Err(e) if e.is_io_error() || e.is_timeout() => STATUS_ERROR,
            // server-side command errors say nothing about the link
            Err(_) => return,
        };

        let previous = self.status.swap(status, Ordering::SeqCst);
        if previous != status {
            debug!(
                from = %decode_status(previous),
                to = %decode_status(status),
                "Redis connection status changed"
            );
        }
    }
}

fn decode_status(raw: u8) -> ConnectionStatus {
    match raw {
        STATUS_READY => ConnectionStatus::Ready,
        STATUS_CONNECTING => ConnectionStatus::Connecting,
        _ => ConnectionStatus::Error,
    }
}

fn classify_redis_error(e: RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

fn reply_to_result(reply: &Value) -> Result<(), StoreError> {
    match reply {
        Value::Okay => Ok(()),
        Value::SimpleString(s) if s == "OK" => Ok(()),
        other => Err(StoreError::Backend(format!(
            "Unexpected reply in batch: {:?}",
            other
        ))),
    }
}

#[async_trait]
impl MappingStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let result: Result<Option<String>, RedisError> = conn.get(self.prefixed_key(key)).await;
        self.observe(&result);
        result.map_err(classify_redis_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let result: Result<(), RedisError> = conn.set(self.prefixed_key(key), value).await;
        self.observe(&result);
        result.map_err(classify_redis_error)
    }

    async fn batch(&self, ops: Vec<StoreOp>) -> Vec<Result<(), StoreError>> {
        if ops.is_empty() {
            return Vec::new();
        }

        let mut pipeline = pipe();
        pipeline.atomic();
        for op in &ops {
            match op {
                StoreOp::Set { key, value } => {
                    pipeline.set(self.prefixed_key(key), value);
                }
            }
        }

        let mut conn = self.connection.clone();
        let result: Result<Vec<Value>, RedisError> = pipeline.query_async(&mut conn).await;
        self.observe(&result);

        match result {
            Ok(replies) => {
                if replies.len() != ops.len() {
                    warn!(
                        expected = ops.len(),
                        received = replies.len(),
                        "Redis batch reply count mismatch"
                    );
                }
                (0..ops.len())
                    .map(|i| match replies.get(i) {
                        Some(reply) => reply_to_result(reply),
                        None => Err(StoreError::Backend(format!(
                            "Missing batch reply for {}",
                            ops[i].key()
                        ))),
                    })
                    .collect()
            }
            Err(e) => {
                let err = classify_redis_error(e);
                warn!(ops = ops.len(), "Redis batch failed: {}", err);
                ops.iter().map(|_| Err(err.clone())).collect()
            }
        }
    }

    fn status(&self) -> ConnectionStatus {
        decode_status(self.status.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_to_result() {
        assert!(reply_to_result(&Value::Okay).is_ok());
        assert!(reply_to_result(&Value::SimpleString("OK".into())).is_ok());
        assert!(reply_to_result(&Value::Nil).is_err());
        assert!(reply_to_result(&Value::Int(0)).is_err());
    }

    #[test]
    fn test_decode_status() {
        assert_eq!(decode_status(STATUS_READY), ConnectionStatus::Ready);
        assert_eq!(decode_status(STATUS_CONNECTING), ConnectionStatus::Connecting);
        assert_eq!(decode_status(STATUS_ERROR), ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_invalid_url_is_backend_error() {
        let result = RedisStore::new("not-a-redis-url").await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
