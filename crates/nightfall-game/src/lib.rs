//! The authoritative game engine.
//!
//! A [`Game`] is plain synchronous state: it never sleeps, spawns, or
//! touches a socket. Callers feed it commands and phase-close signals and
//! it answers with a list of `(Audience, ServerMessage)` pairs to deliver.
//! Serializing access (one command at a time per game) and running the
//! phase timers are the room layer's job.
//!
//! ```text
//! LOBBY ──start──→ NIGHT ──→ DAY ──→ VOTING ──→ NIGHT ...
//!                    │                  │
//!                    └──────→ ENDED ←───┘
//! ```

mod config;
mod engine;
mod error;
mod roles;

pub use config::PhaseTimings;
pub use engine::{Audience, Game, NightAction, Outcome, Player, Seat};
pub use error::GameError;
pub use roles::{Distribution, MAX_PLAYERS, MIN_PLAYERS, assign_roles, distribution};
