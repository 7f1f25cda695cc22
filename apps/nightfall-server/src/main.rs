//! Standalone Nightfall server.
//!
//! Seeds a fixed set of rooms in memory and trusts any numeric credential,
//! so it is only fit for local play and client development:
//!
//! ```text
//! nightfall-server --bind 0.0.0.0:8080 --rooms 4 --allow-force-phase
//! ws://localhost:8080/ws?token=3:Alice
//! ```

use std::time::Duration;

use clap::Parser;
use nightfall::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "NIGHTFALL_BIND", default_value = "0.0.0.0:8080")]
    bind: String,
    /// Rooms to create at startup. Room `n` is hosted by user `n`.
    #[arg(long, env = "NIGHTFALL_ROOMS", default_value_t = 4)]
    rooms: u64,
    /// Seats per room.
    #[arg(long, env = "NIGHTFALL_ROOM_CAPACITY", default_value_t = 12)]
    capacity: usize,
    /// Let room hosts close the current phase early.
    #[arg(long, env = "NIGHTFALL_ALLOW_FORCE_PHASE")]
    allow_force_phase: bool,
    /// Night length in seconds.
    #[arg(long, default_value_t = 60)]
    night_secs: u64,
    /// Discussion length in seconds.
    #[arg(long, default_value_t = 120)]
    day_secs: u64,
    /// Voting length in seconds.
    #[arg(long, default_value_t = 60)]
    voting_secs: u64,
}

/// Accepts `<id>` or `<id>:<name>`.
struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<Identity, SessionError> {
        let (id, name) = match credential.split_once(':') {
            Some((id, name)) => (id, Some(name)),
            None => (credential, None),
        };
        let id: u64 = id
            .parse()
            .map_err(|_| SessionError::AuthFailed("credential must start with a number".into()))?;
        let username = match name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("player{id}"),
        };
        Ok(Identity {
            user_id: UserId(id),
            username,
        })
    }
}

/// Writes room lifecycle events to the log.
struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, event: &RoomEvent) {
        match event {
            RoomEvent::RoomDeleted { room_id, reason } => {
                info!(%room_id, reason, "room deleted");
            }
            RoomEvent::GameStarted {
                room_id,
                game_id,
                players,
            } => {
                info!(%room_id, %game_id, players = players.len(), "game started");
            }
            RoomEvent::GameEnded {
                room_id,
                game_id,
                winner,
                reason,
            } => {
                info!(%room_id, %game_id, ?winner, ?reason, "game ended");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = ServerConfig {
        allow_force_phase: args.allow_force_phase,
        ..ServerConfig::default()
    };
    config.room.phase_timings = PhaseTimings {
        night: Duration::from_secs(args.night_secs),
        day: Duration::from_secs(args.day_secs),
        voting: Duration::from_secs(args.voting_secs),
    };

    let directory = InMemoryDirectory::with_rooms(
        (1..=args.rooms).map(|n| RoomRecord::new(RoomId(n), UserId(n), args.capacity)),
    );

    let server = NightfallServer::builder()
        .bind(&args.bind)
        .config(config)
        .event_sink(LogEventSink)
        .build(DevAuthenticator, directory)
        .await?;
    info!(addr = %server.local_addr()?, rooms = args.rooms, "nightfall server listening");

    server.run().await?;
    Ok(())
}
