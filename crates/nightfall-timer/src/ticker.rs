//! Fixed-interval ticker for background loops.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

pub struct Ticker {
    period: Duration,
    tick_count: u64,
    /// `None` when the period is zero.
    next_tick: Option<Instant>,
}

impl Ticker {
    /// Shortest period accepted; anything below is raised to this.
    pub const MIN_PERIOD: Duration = Duration::from_millis(10);

    /// Ticks once per `period`, starting one period from now. A zero period
    /// disables the ticker.
    pub fn every(period: Duration) -> Self {
        let period = if !period.is_zero() && period < Self::MIN_PERIOD {
            warn!(
                period_ms = period.as_millis() as u64,
                "ticker period below minimum, clamping"
            );
            Self::MIN_PERIOD
        } else {
            period
        };
        debug!(period_ms = period.as_millis() as u64, "ticker created");
        Self {
            period,
            tick_count: 0,
            next_tick: (!period.is_zero()).then(|| Instant::now() + period),
        }
    }

    /// Waits until the next tick is due and returns its number, starting
    /// at 1.
    ///
    /// A tick that fires late does not cause a burst: whole periods missed
    /// are skipped and the next tick is one period after this one.
    /// Pends forever when the period is zero.
    pub async fn wait(&mut self) -> u64 {
        let Some(next) = self.next_tick else {
            return std::future::pending().await;
        };
        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;
        let skipped = now.saturating_duration_since(next).as_nanos() / self.period.as_nanos();
        if skipped > 0 {
            warn!(tick = self.tick_count, skipped = skipped as u64, "ticker overrun, skipping ahead");
        }
        self.next_tick = Some(now + self.period);

        trace!(tick = self.tick_count, "tick fired");
        self.tick_count
    }
}
