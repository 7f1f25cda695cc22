use std::time::Duration;

use nightfall_protocol::Phase;
use tracing::warn;

/// How long each timed phase lasts before it closes on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Default: 60 seconds.
    pub night: Duration,
    /// Default: 120 seconds.
    pub day: Duration,
    /// Default: 60 seconds.
    pub voting: Duration,
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            night: Duration::from_secs(60),
            day: Duration::from_secs(120),
            voting: Duration::from_secs(60),
        }
    }
}

impl PhaseTimings {
    /// Shortest phase accepted; anything below is raised to this.
    pub const MIN_PHASE: Duration = Duration::from_secs(1);

    pub fn validated(mut self) -> Self {
        for (name, d) in [
            ("night", &mut self.night),
            ("day", &mut self.day),
            ("voting", &mut self.voting),
        ] {
            if *d < Self::MIN_PHASE {
                warn!(phase = name, "phase duration below minimum, clamping");
                *d = Self::MIN_PHASE;
            }
        }
        self
    }

    /// Length of `phase`. Untimed phases (lobby, ended) return zero.
    pub fn duration(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Night => self.night,
            Phase::Day => self.day,
            Phase::Voting => self.voting,
            Phase::Lobby | Phase::Ended => Duration::ZERO,
        }
    }
}
