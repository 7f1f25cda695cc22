//! Rooms for Nightfall.
//!
//! Two kinds of room state live here:
//!
//! - **Membership**: which connections sit in which room, as players or
//!   spectators, and who is ready ([`RoomChannelRegistry`]). Broadcasts go
//!   through it.
//! - **Games**: each running game is an isolated Tokio task owning its
//!   [`Game`](nightfall_game::Game) ([`GameHandle`], [`spawn_game`]).
//!
//! Room metadata (host, capacity, status) is external and reached through
//! the [`RoomDirectory`] trait.
//!
//! # Key types
//!
//! - [`RoomChannelRegistry`]: membership and fan-out
//! - [`RoomDirectory`] / [`InMemoryDirectory`]: room records
//! - [`GameHandle`]: send commands to a running game actor
//! - [`GameOutput`]: what game actors hand back to the server
//! - [`RoomConfig`]: spectators, chat limit, host grace, phase timings

#![allow(async_fn_in_trait)]

mod actor;
mod channel;
mod config;
mod directory;
mod error;

pub use actor::{GameHandle, GameOutput, OutputSender, Recipients, spawn_game};
pub use channel::{JoinOutcome, RoomChannel, RoomChannelRegistry, RoomStats};
pub use config::RoomConfig;
pub use directory::{InMemoryDirectory, RoomDirectory, RoomRecord};
pub use error::RoomError;
