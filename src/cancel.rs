//! Registry of in-flight calls that can be cancelled by key.
//!
//! Each logical call registers a [`CancellationHandle`] before its first
//! dispatch and releases it when it reaches a terminal outcome. Cancellation is
//! cooperative: the call observes the signal before each dispatch, during its
//! backoff waits and, when the transport supports it, while a request is in
//! flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

struct Slot {
    id: u64,
    token: CancellationToken,
    holders: usize,
}

/// Concurrency-safe mapping from cancel key to a live cancellation token.
///
/// Calls that register under a key already in use share its token, so
/// `cancel(key)` reaches all of them. Cancelling removes the key at once: a
/// call registered afterwards under the same key gets a fresh token.
///
/// # Examples
///
/// ```
/// use callguard::CancellationRegistry;
///
/// let registry = CancellationRegistry::new();
/// let handle = registry.register("upload-42");
/// assert!(registry.contains("upload-42"));
///
/// registry.cancel("upload-42");
/// assert!(handle.is_cancelled());
/// assert!(registry.is_empty());
/// ```
#[derive(Default)]
pub struct CancellationRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // Every mutation is a single map or counter update, so a poisoned map
        // is still consistent.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a call under `key` and returns its handle.
    pub fn register(&self, key: impl Into<String>) -> CancellationHandle<'_> {
        let key = key.into();
        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            holders: 0,
        });
        slot.holders += 1;

        CancellationHandle {
            registry: self,
            key,
            slot_id: slot.id,
            token: slot.token.clone(),
            released: false,
        }
    }

    /// Signals the call(s) registered under `key`. No-op if the key is unknown.
    pub fn cancel(&self, key: &str) {
        let removed = self.slots().remove(key);
        if let Some(slot) = removed {
            tracing::debug!(cancel_key = key, holders = slot.holders, "Cancelling request");
            slot.token.cancel();
        }
    }

    /// Signals every registered call and empties the registry.
    pub fn cancel_all(&self) {
        let drained: Vec<(String, Slot)> = self.slots().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Cancelling all requests");
        }
        for (_, slot) in drained {
            slot.token.cancel();
        }
    }

    /// Returns `true` if a live call is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.slots().contains_key(key)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    /// Returns `true` if no call is registered.
    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    fn release(&self, key: &str, slot_id: u64) {
        let mut slots = self.slots();
        let remove = match slots.get_mut(key) {
            // A slot with another id means ours was cancelled and replaced.
            Some(slot) if slot.id == slot_id => {
                slot.holders = slot.holders.saturating_sub(1);
                slot.holders == 0
            }
            _ => false,
        };
        if remove {
            slots.remove(key);
        }
    }
}

/// A logical call's registration in a [`CancellationRegistry`].
///
/// Dropping the handle releases the registration, so it is removed exactly
/// once however the call ends.
pub struct CancellationHandle<'a> {
    registry: &'a CancellationRegistry,
    key: String,
    slot_id: u64,
    token: CancellationToken,
    released: bool,
}

impl CancellationHandle<'_> {
    /// The key this handle is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The token signalled on cancellation.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `true` once the call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Releases the registration now instead of on drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(&self.key, self.slot_id);
        }
    }
}

impl Drop for CancellationHandle<'_> {
    fn drop(&mut self) {
        self.release_once();
    }
}
