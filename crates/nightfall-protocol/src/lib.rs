//! Wire protocol for Nightfall.
//!
//! This crate defines the language that clients and the server speak:
//!
//! - **Ids** ([`UserId`], [`RoomId`], [`GameId`]) shared by every layer.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]) as closed enums,
//!   wrapped in an envelope carrying a timestamp and optional message id.
//! - **Game vocabulary** ([`Phase`], [`Role`], [`Faction`], snapshots)
//!   used by the engine and serialized verbatim to clients.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) converting envelopes to
//!   and from bytes.
//!
//! ```text
//! Transport (bytes) → Protocol (envelope + typed message) → Router
//! ```

mod codec;
mod error;
mod game;
mod ids;
mod messages;

pub use codec::{Codec, JsonCodec};
pub use error::{ErrorCode, ProtocolError};
pub use game::{
    DeathCause, Death, Execution, Faction, GameSnapshot, GameStatus,
    NightActionKind, Phase, PlayerView, Role, RoleReveal, TallyEntry,
    WinReason,
};
pub use ids::{GameId, RoomId, UserId};
pub use messages::{
    ChatChannel, ClientMessage, InboundEnvelope, LeaveReason, Member,
    RoomState, RoomStatus, ServerEnvelope, ServerMessage, unix_millis,
};
