//! Per-connection idle timeout, independent of socket liveness.
//!
//! A tracked connection has two pending timers: a warning at
//! `timeout - warning_window` and a kick at `timeout`. The warning repeats
//! every `warning_window / max_warnings` until `max_warnings` have gone out.
//! Any recorded activity cancels both and starts over.
//!
//! The monitor never closes sockets itself. It reports through the
//! [`InactivityEvent`] channel returned by [`InactivityMonitor::new`] and
//! the owner acts on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nightfall_timer::TimerSet;
use nightfall_transport::ConnectionId;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::InactivityConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InactivityEvent {
    /// The connection will be closed in `remaining` unless it shows activity.
    Warning {
        conn_id: ConnectionId,
        remaining: Duration,
        warning: u32,
    },
    /// The connection reached the timeout and is no longer tracked.
    Timeout { conn_id: ConnectionId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Stage {
    Warning,
    Kick,
}

type TimerKey = (ConnectionId, Stage);
type Tracked = Arc<Mutex<HashMap<ConnectionId, Instant>>>;

fn lock(tracked: &Tracked) -> MutexGuard<'_, HashMap<ConnectionId, Instant>> {
    tracked.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct InactivityMonitor {
    config: InactivityConfig,
    timers: TimerSet<TimerKey>,
    tracked: Tracked,
    events: mpsc::UnboundedSender<InactivityEvent>,
}

impl InactivityMonitor {
    /// Creates a monitor and the receiver its events are delivered on.
    pub fn new(config: InactivityConfig) -> (Self, mpsc::UnboundedReceiver<InactivityEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let monitor = Self {
            config: config.validated(),
            timers: TimerSet::new(),
            tracked: Arc::new(Mutex::new(HashMap::new())),
            events,
        };
        (monitor, rx)
    }

    /// Starts tracking a connection as active now. No-op when disabled.
    pub fn track(&self, conn_id: ConnectionId) {
        if !self.config.is_enabled() {
            return;
        }
        let now = Instant::now();
        lock(&self.tracked).insert(conn_id, now);
        self.reschedule(conn_id, now);
    }

    /// Resets the idle clock. Returns `false` if the connection is not
    /// tracked.
    pub fn record_activity(&self, conn_id: ConnectionId) -> bool {
        let now = Instant::now();
        {
            let mut tracked = lock(&self.tracked);
            match tracked.get_mut(&conn_id) {
                Some(last) => *last = now,
                None => return false,
            }
        }
        self.reschedule(conn_id, now);
        true
    }

    /// Stops tracking and cancels both timers.
    pub fn untrack(&self, conn_id: ConnectionId) {
        lock(&self.tracked).remove(&conn_id);
        self.timers.cancel(&(conn_id, Stage::Warning));
        self.timers.cancel(&(conn_id, Stage::Kick));
    }

    pub fn is_tracked(&self, conn_id: ConnectionId) -> bool {
        lock(&self.tracked).contains_key(&conn_id)
    }

    pub fn last_activity(&self, conn_id: ConnectionId) -> Option<Instant> {
        lock(&self.tracked).get(&conn_id).copied()
    }

    pub fn tracked_count(&self) -> usize {
        lock(&self.tracked).len()
    }

    pub fn config(&self) -> &InactivityConfig {
        &self.config
    }

    /// Replaces both timers with ones measured from `since`.
    fn reschedule(&self, conn_id: ConnectionId, since: Instant) {
        self.timers.cancel(&(conn_id, Stage::Warning));
        self.timers.cancel(&(conn_id, Stage::Kick));

        let timeout = self.config.timeout;
        if self.config.max_warnings > 0 {
            schedule_warning(
                WarningChain {
                    timers: self.timers.clone(),
                    tracked: Arc::clone(&self.tracked),
                    events: self.events.clone(),
                    config: self.config.clone(),
                    conn_id,
                    since,
                },
                timeout - self.config.warning_window,
                1,
            );
        }

        let timers = self.timers.clone();
        let tracked = Arc::clone(&self.tracked);
        let events = self.events.clone();
        self.timers.schedule((conn_id, Stage::Kick), timeout, async move {
            {
                let mut tracked = lock(&tracked);
                if tracked.get(&conn_id) != Some(&since) {
                    return;
                }
                tracked.remove(&conn_id);
            }
            timers.cancel(&(conn_id, Stage::Warning));
            tracing::info!(%conn_id, "inactivity timeout reached");
            let _ = events.send(InactivityEvent::Timeout { conn_id });
        });
    }
}

/// Everything a pending warning needs to fire and queue the next one.
struct WarningChain {
    timers: TimerSet<TimerKey>,
    tracked: Tracked,
    events: mpsc::UnboundedSender<InactivityEvent>,
    config: InactivityConfig,
    conn_id: ConnectionId,
    /// Activity instant this chain was started from.
    since: Instant,
}

fn schedule_warning(chain: WarningChain, delay: Duration, warning: u32) {
    let timers = chain.timers.clone();
    let conn_id = chain.conn_id;
    timers.schedule((conn_id, Stage::Warning), delay, async move {
        // Activity recorded after this timer fired starts a new chain.
        if lock(&chain.tracked).get(&conn_id) != Some(&chain.since) {
            return;
        }
        let interval = chain.config.warning_interval();
        let remaining = chain
            .config
            .warning_window
            .saturating_sub(interval * (warning - 1));
        tracing::debug!(%conn_id, warning, remaining_secs = remaining.as_secs(), "inactivity warning");
        let _ = chain.events.send(InactivityEvent::Warning {
            conn_id,
            remaining,
            warning,
        });
        if warning < chain.config.max_warnings {
            schedule_warning(chain, interval, warning + 1);
        }
    });
}
