//! Short-lived snapshots that let a dropped user resume where they were.
//!
//! ```text
//! disconnect ──→ store_state() ──┬──→ retrieve_state() ──→ confirm_reconnection()  (deleted)
//!                                │
//!                                └──→ TTL elapses ──→ expired                     (deleted)
//! ```
//!
//! Every record is consumed exactly once: either confirmed or expired.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use nightfall_protocol::{RoomId, UserId};
use nightfall_timer::TimerSet;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ReconnectConfig;

/// What to remember about a user who dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub room_id: Option<RoomId>,
    /// Opaque game state at the moment of disconnect.
    pub game_state: Option<serde_json::Value>,
    pub spectator: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionRecord {
    pub user_id: UserId,
    pub room_id: Option<RoomId>,
    pub game_state: Option<serde_json::Value>,
    pub spectator: bool,
    pub stored_at: Instant,
}

struct Inner {
    config: ReconnectConfig,
    records: HashMap<UserId, ReconnectionRecord>,
    /// Oldest-first index for capacity eviction.
    by_age: BTreeSet<(Instant, UserId)>,
    expiry: TimerSet<UserId>,
}

impl Inner {
    fn take(&mut self, user_id: UserId) -> Option<ReconnectionRecord> {
        let record = self.records.remove(&user_id)?;
        self.by_age.remove(&(record.stored_at, user_id));
        Some(record)
    }

    fn is_fresh(&self, record: &ReconnectionRecord) -> bool {
        record.stored_at.elapsed() <= self.config.ttl
    }

    /// Drops the oldest tenth of the store (at least one record).
    fn evict_oldest(&mut self) {
        let count = self.records.len().div_ceil(10).max(1);
        for _ in 0..count {
            let Some((_, user_id)) = self.by_age.pop_first() else {
                break;
            };
            self.records.remove(&user_id);
            self.expiry.cancel(&user_id);
            tracing::debug!(%user_id, "reconnection record evicted at capacity");
        }
    }

    /// Returns the record if it is still inside its window, expiring it
    /// otherwise.
    fn fresh(&mut self, user_id: UserId) -> Option<&ReconnectionRecord> {
        let fresh = self.is_fresh(self.records.get(&user_id)?);
        if !fresh {
            self.take(user_id);
            self.expiry.cancel(&user_id);
            tracing::info!(%user_id, "reconnection window elapsed");
            return None;
        }
        self.records.get(&user_id)
    }
}

/// Holds [`ReconnectionRecord`]s keyed by user.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct ReconnectionStore {
    inner: Arc<Mutex<Inner>>,
}

impl ReconnectionStore {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config: config.validated(),
                records: HashMap::new(),
                by_age: BTreeSet::new(),
                expiry: TimerSet::new(),
            })),
        }
    }

    /// Inserts or overwrites the user's record and (re)starts its TTL.
    pub async fn store_state(&self, user_id: UserId, snapshot: Snapshot) {
        let mut inner = self.inner.lock().await;
        inner.take(user_id);
        if inner.records.len() >= inner.config.max_records {
            inner.evict_oldest();
        }

        let stored_at = Instant::now();
        inner.by_age.insert((stored_at, user_id));
        inner.records.insert(
            user_id,
            ReconnectionRecord {
                user_id,
                room_id: snapshot.room_id,
                game_state: snapshot.game_state,
                spectator: snapshot.spectator,
                stored_at,
            },
        );

        let weak = Arc::downgrade(&self.inner);
        let ttl = inner.config.ttl;
        inner
            .expiry
            .schedule(user_id, ttl, expire(weak, user_id, stored_at));
        tracing::debug!(%user_id, ttl_secs = ttl.as_secs(), "reconnection state stored");
    }

    /// Returns the record and stops its TTL timer.
    ///
    /// The record stays in the store until [`confirm_reconnection`] is
    /// called; past the window it is treated as expired on the next read.
    ///
    /// [`confirm_reconnection`]: Self::confirm_reconnection
    pub async fn retrieve_state(&self, user_id: UserId) -> Option<ReconnectionRecord> {
        let mut inner = self.inner.lock().await;
        let record = inner.fresh(user_id).cloned()?;
        inner.expiry.cancel(&user_id);
        Some(record)
    }

    /// Reads the record without touching its timer.
    pub async fn peek(&self, user_id: UserId) -> Option<ReconnectionRecord> {
        self.inner.lock().await.fresh(user_id).cloned()
    }

    /// Deletes the record. Idempotent; returns whether one was present.
    pub async fn confirm_reconnection(&self, user_id: UserId) -> bool {
        let mut inner = self.inner.lock().await;
        inner.expiry.cancel(&user_id);
        let removed = inner.take(user_id).is_some();
        if removed {
            tracing::info!(%user_id, "reconnection confirmed");
        }
        removed
    }

    /// `true` only if a record exists and is inside its window.
    pub async fn is_reconnection_allowed(&self, user_id: UserId) -> bool {
        self.inner.lock().await.fresh(user_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn expire(weak: Weak<Mutex<Inner>>, user_id: UserId, stored_at: Instant) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut inner = inner.lock().await;
    // A newer store for the same user replaced this record.
    if inner.records.get(&user_id).map(|r| r.stored_at) != Some(stored_at) {
        return;
    }
    inner.take(user_id);
    tracing::info!(%user_id, "reconnection state expired");
}
