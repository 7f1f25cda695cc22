//! # Nightfall
//!
//! Real-time backend for a social-deduction party game.
//!
//! The server accepts WebSocket connections, resolves each to a user
//! through an [`Authenticator`](nightfall_session::Authenticator), and
//! routes the user's commands to room membership and to the per-room game
//! actor. Heartbeats, idle timeouts, reconnection windows, and host-loss
//! cleanup run as background tasks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nightfall::prelude::*;
//!
//! struct DevAuth;
//!
//! impl Authenticator for DevAuth {
//!     async fn authenticate(&self, credential: &str) -> Result<Identity, SessionError> {
//!         let id: u64 = credential
//!             .parse()
//!             .map_err(|_| SessionError::AuthFailed("not a number".into()))?;
//!         Ok(Identity { user_id: UserId(id), username: format!("player{id}") })
//!     }
//! }
//!
//! # async fn run() -> Result<(), NightfallError> {
//! let directory = InMemoryDirectory::with_rooms([RoomRecord::new(RoomId(1), UserId(1), 12)]);
//! let server = NightfallServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(DevAuth, directory)
//!     .await?;
//! server.run().await
//! # }
//! ```

#![allow(async_fn_in_trait)]

mod commands;
mod config;
mod error;
mod events;
mod handler;
mod router;
mod server;
mod supervisor;

pub use config::ServerConfig;
pub use error::NightfallError;
pub use events::{EventSink, NoopEventSink, RoomEvent};
pub use server::{NightfallServer, NightfallServerBuilder};

/// Everything needed to embed a server.
pub mod prelude {
    pub use crate::{
        EventSink, NightfallError, NightfallServer, NightfallServerBuilder, NoopEventSink,
        RoomEvent, ServerConfig,
    };
    pub use nightfall_game::PhaseTimings;
    pub use nightfall_protocol::{ErrorCode, GameId, RoomId, RoomStatus, UserId};
    pub use nightfall_room::{InMemoryDirectory, RoomConfig, RoomDirectory, RoomRecord};
    pub use nightfall_session::{
        Authenticator, HeartbeatConfig, Identity, InactivityConfig, ReconnectConfig,
        SessionError,
    };
}
