//! Timing primitives for Nightfall.
//!
//! - [`Ticker`] drives periodic background loops (heartbeat probing,
//!   host-loss reconciliation) and is meant to sit in a `tokio::select!`.
//! - [`TimerSet`] holds one-shot, cancellable tasks keyed by an id
//!   (reconnection expiry per user, inactivity warning/kick per
//!   connection). Scheduling a key always cancels its previous timer.
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.changed() => break,
//!         _ = ticker.wait() => probe_connections().await,
//!     }
//! }
//! ```

mod ticker;
mod timer_set;

pub use ticker::Ticker;
pub use timer_set::TimerSet;
