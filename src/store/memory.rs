//! In-process state store for tests and dry runs.
//!
//! Keeps the serialized JSON text rather than the value so every load goes
//! through the same serde path as the file store.

use std::marker::PhantomData;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::traits::{Document, StateStore, decode, encode};

pub struct MemoryStore<T> {
    raw: Mutex<Option<String>>,
    failing_saves: AtomicUsize,
    saves: AtomicUsize,
    _doc: PhantomData<fn() -> T>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            raw: Mutex::new(None),
            failing_saves: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            _doc: PhantomData,
        }
    }

    /// Seed the store with raw document text.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        let store = Self::new();
        *store.raw.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw.into());
        store
    }

    /// Make the next `count` saves fail with an IO error.
    pub fn fail_next_saves(&self, count: usize) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Current raw document text, if anything was ever saved.
    pub fn raw(&self) -> Option<String> {
        self.raw.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Document> StateStore<T> for MemoryStore<T> {
    async fn load(&self) -> Result<T, StoreError> {
        match self.raw() {
            Some(raw) => decode(&raw, &self.location()),
            None => Ok(T::default()),
        }
    }

    async fn save(&self, value: &T) -> Result<(), StoreError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Io(std::io::Error::other("injected save failure")));
        }

        let json = encode(value)?;
        *self.raw.lock().unwrap_or_else(|e| e.into_inner()) = Some(json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
