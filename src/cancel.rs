//! Keyed cancellation: only the latest request registered under a key stays live.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// One registered request slot.
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    key: String,
    generation: u64,
    token: CancellationToken,
}

impl CancellationHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A token observing this handle, for code that wants a bare `CancellationToken`.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

#[derive(Default)]
pub struct CancellationRegistry {
    handles: Mutex<HashMap<String, CancellationHandle>>,
    next_generation: AtomicU64,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels whatever is registered under `key`, then stores and returns a fresh handle.
    pub fn register(&self, key: &str) -> CancellationHandle {
        let handle = CancellationHandle {
            key: key.to_string(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        };
        let previous = self.lock().insert(key.to_string(), handle.clone());
        if let Some(previous) = previous {
            debug!(key, "superseding in-flight request");
            previous.cancel();
        }
        handle
    }

    /// Cancels and removes the handle for `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets `handle` after its request finished, without cancelling anything.
    ///
    /// A superseded handle never evicts the newer registration for the same key.
    pub fn cleanup(&self, handle: &CancellationHandle) {
        let mut handles = self.lock();
        if handles
            .get(&handle.key)
            .is_some_and(|current| current.generation == handle.generation)
        {
            handles.remove(&handle.key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registers `key` and returns a guard that cleans the slot up when dropped.
    pub(crate) fn slot(self: &Arc<Self>, key: &str) -> SlotGuard {
        self.adopt(self.register(key))
    }

    /// Wraps an already registered handle so its slot is cleaned up when dropped.
    pub(crate) fn adopt(self: &Arc<Self>, handle: CancellationHandle) -> SlotGuard {
        SlotGuard {
            handle,
            registry: Arc::clone(self),
        }
    }
}

pub(crate) struct SlotGuard {
    handle: CancellationHandle,
    registry: Arc<CancellationRegistry>,
}

impl SlotGuard {
    pub(crate) fn handle(&self) -> &CancellationHandle {
        &self.handle
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.registry.cleanup(&self.handle);
    }
}
