//! Configuration for reconnection, inactivity, and heartbeat behaviour.
//!
//! Each struct has sensible defaults and a `validated()` method that
//! clamps out-of-range values instead of failing.

use std::time::Duration;

use tracing::warn;

/// Reconnection store settings.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// How long a disconnected user's association is kept.
    ///
    /// Default: 120 seconds.
    pub ttl: Duration,
    /// Maximum number of records held. When full, the oldest 10% (at
    /// least one) are evicted before inserting.
    pub max_records: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            max_records: 10_000,
        }
    }
}

impl ReconnectConfig {
    pub fn validated(mut self) -> Self {
        if self.max_records == 0 {
            warn!("max_records of 0 would reject every snapshot, using 1");
            self.max_records = 1;
        }
        self
    }
}

/// Idle-timeout settings.
#[derive(Debug, Clone)]
pub struct InactivityConfig {
    /// Idle time after which a connection is closed. Zero disables the
    /// monitor.
    ///
    /// Default: 300 seconds.
    pub timeout: Duration,
    /// How long before the timeout the first warning is sent.
    ///
    /// Default: 60 seconds.
    pub warning_window: Duration,
    /// Warnings sent inside the window, evenly spaced.
    ///
    /// Default: 2.
    pub max_warnings: u32,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            warning_window: Duration::from_secs(60),
            max_warnings: 2,
        }
    }
}

impl InactivityConfig {
    /// Clamps the warning window to the timeout.
    pub fn validated(mut self) -> Self {
        if self.warning_window > self.timeout {
            warn!(
                window_secs = self.warning_window.as_secs(),
                timeout_secs = self.timeout.as_secs(),
                "warning window longer than timeout, clamping"
            );
            self.warning_window = self.timeout;
        }
        if self.warning_window.is_zero() {
            self.max_warnings = 0;
        }
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.timeout.is_zero()
    }

    /// Spacing between consecutive warnings.
    pub fn warning_interval(&self) -> Duration {
        if self.max_warnings == 0 {
            self.warning_window
        } else {
            self.warning_window / self.max_warnings
        }
    }
}

/// Heartbeat probe settings.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between probe cycles. Zero disables heartbeats.
    ///
    /// Default: 30 seconds.
    pub interval: Duration,
    /// Consecutive unanswered probes after which a connection is dropped.
    ///
    /// Default: 2.
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed: 2,
        }
    }
}

impl HeartbeatConfig {
    pub fn validated(mut self) -> Self {
        if self.max_missed == 0 {
            self.max_missed = 1;
        }
        self
    }
}
