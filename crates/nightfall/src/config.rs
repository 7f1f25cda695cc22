//! Server-wide configuration.

use nightfall_room::RoomConfig;
use nightfall_session::{HeartbeatConfig, InactivityConfig, ReconnectConfig};

/// Everything the server needs besides its bind address.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub heartbeat: HeartbeatConfig,
    pub inactivity: InactivityConfig,
    pub reconnect: ReconnectConfig,
    pub room: RoomConfig,
    /// Accept `force-phase` from room hosts. Debug only; off by default.
    pub allow_force_phase: bool,
}

impl ServerConfig {
    pub fn validated(self) -> Self {
        Self {
            heartbeat: self.heartbeat.validated(),
            inactivity: self.inactivity.validated(),
            reconnect: self.reconnect.validated(),
            room: self.room.validated(),
            allow_force_phase: self.allow_force_phase,
        }
    }
}
