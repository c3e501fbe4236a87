//! Mock implementations for testing
//!
//! [`FlakyStore`] is an in-memory store with failure injection and call counters.
//! [`EventRecorder`] keeps every resilience event it receives.

use crate::error_recovery::{ResilienceEvent, ResilienceListener};
use crate::storage::{ConnectionStatus, InMemoryStore, MappingStore, StoreError, StoreOp};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory store that fails on demand
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing_gets: AtomicU32,
    failing_batches: AtomicU32,
    partial_batches: AtomicU32,
    down: AtomicBool,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` reads with a backend error
    pub fn fail_next_gets(&self, count: u32) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Fail every op of the next `count` batches
    pub fn fail_next_batches(&self, count: u32) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    /// Fail only the last op of the next `count` batches; earlier ops are applied
    pub fn fail_last_op_of_next_batches(&self, count: u32) {
        self.partial_batches.store(count, Ordering::SeqCst);
    }

    /// Fail everything until brought back up
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Write a raw value, bypassing counters and failure injection
    pub async fn put_raw(&self, key: &str, value: &str) {
        // in-memory writes cannot fail
        let _ = self.inner.set(key, value).await;
    }

    /// Read a raw value, bypassing counters and failure injection
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        self.inner.get(key).await.ok().flatten()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }
}

fn injected() -> StoreError {
    StoreError::Backend("injected failure".to_string())
}

#[async_trait]
impl MappingStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_down() || Self::take(&self.failing_gets) {
            return Err(injected());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_down() {
            return Err(injected());
        }
        self.inner.set(key, value).await
    }

    async fn batch(&self, ops: Vec<StoreOp>) -> Vec<Result<(), StoreError>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_down() || Self::take(&self.failing_batches) {
            return ops.iter().map(|_| Err(injected())).collect();
        }

        if Self::take(&self.partial_batches) {
            let mut ops = ops;
            let failed = ops.pop();
            let mut results = self.inner.batch(ops).await;
            if failed.is_some() {
                results.push(Err(injected()));
            }
            return results;
        }

        self.inner.batch(ops).await
    }

    fn status(&self) -> ConnectionStatus {
        if self.is_down() {
            ConnectionStatus::Error
        } else {
            ConnectionStatus::Ready
        }
    }
}

/// Listener that records every event
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of recorded events matching `predicate`
    pub fn count<P>(&self, predicate: P) -> usize
    where
        P: Fn(&ResilienceEvent) -> bool,
    {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl ResilienceListener for EventRecorder {
    async fn on_event(&self, event: &ResilienceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
