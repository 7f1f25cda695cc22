//! Connection and session state for Nightfall.
//!
//! This crate owns everything the server knows about a live socket apart
//! from room membership:
//!
//! 1. **Identity**: resolving a handshake credential to a user
//!    ([`Authenticator`], [`extract_credential`]).
//! 2. **Connection registry**: one entry per admitted socket, at most one
//!    per user ([`ConnectionRegistry`]).
//! 3. **Reconnection**: short-lived snapshots of a dropped user's room
//!    association ([`ReconnectionStore`]).
//! 4. **Liveness**: idle timeouts ([`InactivityMonitor`]) and heartbeat
//!    probe bookkeeping ([`ConnectionRegistry::probe_cycle`]).
//!
//! ```text
//! Server (above)  ← orchestrates disconnects across these pieces
//!     ↕
//! Session (this crate)
//!     ↕
//! Protocol / Transport / Timer (below)
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod config;
mod error;
mod inactivity;
mod reconnect;
mod registry;
mod sink;

pub use auth::{Authenticator, Identity, extract_credential};
pub use config::{HeartbeatConfig, InactivityConfig, ReconnectConfig};
pub use error::SessionError;
pub use inactivity::{InactivityEvent, InactivityMonitor};
pub use reconnect::{ReconnectionRecord, ReconnectionStore, Snapshot};
pub use registry::{ConnectionEntry, ConnectionRegistry, ProbeCycle, RoomConnections};
pub use sink::{ConnectionSink, Outbound};
