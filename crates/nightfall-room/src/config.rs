//! Room configuration.

use std::time::Duration;

use nightfall_game::PhaseTimings;
use tracing::warn;

/// Settings shared by every room on a server.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// How long a waiting room may be without its host before it is
    /// deleted. Default: 30 seconds.
    pub host_grace: Duration,

    /// How often the host-loss reconciler runs. Default: 10 seconds.
    pub reconcile_interval: Duration,

    /// Whether spectators are allowed.
    pub allow_spectators: bool,

    /// Maximum number of spectators (0 = unlimited when allowed).
    pub max_spectators: usize,

    /// Longest accepted chat message, in characters.
    pub max_chat_len: usize,

    pub phase_timings: PhaseTimings,

    /// Command channel size for game actors.
    pub command_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            host_grace: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(10),
            allow_spectators: true,
            max_spectators: 0,
            max_chat_len: 500,
            phase_timings: PhaseTimings::default(),
            command_buffer: 64,
        }
    }
}

impl RoomConfig {
    pub fn validated(mut self) -> Self {
        if self.reconcile_interval.is_zero() {
            warn!("reconcile_interval is zero, using 1s");
            self.reconcile_interval = Duration::from_secs(1);
        }
        if self.command_buffer == 0 {
            warn!("command_buffer is zero, using 1");
            self.command_buffer = 1;
        }
        if self.max_chat_len == 0 {
            warn!("max_chat_len is zero, using 1");
            self.max_chat_len = 1;
        }
        self.phase_timings = self.phase_timings.validated();
        self
    }

    /// `true` if one more spectator fits next to `current`.
    pub fn spectator_slot_free(&self, current: usize) -> bool {
        self.allow_spectators && (self.max_spectators == 0 || current < self.max_spectators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_config_default() {
        let config = RoomConfig::default();
        assert_eq!(config.host_grace, Duration::from_secs(30));
        assert_eq!(config.reconcile_interval, Duration::from_secs(10));
        assert!(config.allow_spectators);
        assert_eq!(config.max_chat_len, 500);
    }

    #[test]
    fn test_validated_clamps_zero_values() {
        let config = RoomConfig {
            reconcile_interval: Duration::ZERO,
            command_buffer: 0,
            ..RoomConfig::default()
        }
        .validated();
        assert_eq!(config.reconcile_interval, Duration::from_secs(1));
        assert_eq!(config.command_buffer, 1);
    }

    #[test]
    fn test_spectator_slot_free() {
        let open = RoomConfig::default();
        assert!(open.spectator_slot_free(1_000));

        let capped = RoomConfig {
            max_spectators: 2,
            ..RoomConfig::default()
        };
        assert!(capped.spectator_slot_free(1));
        assert!(!capped.spectator_slot_free(2));

        let closed = RoomConfig {
            allow_spectators: false,
            ..RoomConfig::default()
        };
        assert!(!closed.spectator_slot_free(0));
    }
}
