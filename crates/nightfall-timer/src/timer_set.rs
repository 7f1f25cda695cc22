//! Cancellable one-shot timers keyed by id.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;

/// Identifies one scheduling of a key.
///
/// Rescheduling a key issues a new token; a timer that wakes up holding a
/// stale token does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerToken(u64);

struct Entry {
    token: TimerToken,
    handle: AbortHandle,
}

struct Inner<K> {
    next_token: u64,
    entries: HashMap<K, Entry>,
}

/// A set of pending one-shot tasks, at most one per key.
///
/// Cloning yields another handle to the same set. Each timer runs as its
/// own tokio task; the set only holds abort handles, and the tasks hold a
/// weak reference back, so dropping every handle silences all timers.
pub struct TimerSet<K> {
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K> Clone for TimerSet<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> Default for TimerSet<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_token: 1,
                entries: HashMap::new(),
            })),
        }
    }
}

fn lock<K>(inner: &Mutex<Inner<K>>) -> MutexGuard<'_, Inner<K>> {
    // Critical sections never panic, so a poisoned lock still holds
    // consistent data.
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K> TimerSet<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay` unless the key is cancelled or
    /// rescheduled first. Any timer already pending for `key` is cancelled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: K, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = lock(&self.inner);
        let token = TimerToken(inner.next_token);
        inner.next_token += 1;

        let weak: Weak<Mutex<Inner<K>>> = Arc::downgrade(&self.inner);
        let fire_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if claim(&weak, &fire_key, token) {
                trace!(key = ?fire_key, "timer fired");
                task.await;
            }
        })
        .abort_handle();

        if let Some(previous) = inner.entries.insert(key, Entry { token, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancels the pending timer for `key`. Returns `true` if one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.inner).entries.remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        lock(&self.inner).entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the entry for `key` if it still belongs to `token`.
///
/// Returns `false` when the set is gone or the key was cancelled or
/// rescheduled in the meantime.
fn claim<K: Eq + Hash>(weak: &Weak<Mutex<Inner<K>>>, key: &K, token: TimerToken) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let mut inner = lock(&inner);
    match inner.entries.get(key) {
        Some(entry) if entry.token == token => {
            inner.entries.remove(key);
            true
        }
        _ => false,
    }
}
