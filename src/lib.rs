//! # Hakkero Client
//!
//! Client-side synchronization engine for Hakkero, a multiplayer turn-based
//! collaborative writing game: players queue, are matched, confirm a
//! ready-check, then take turns adding sentences to a shared story under a
//! per-turn time limit.
//!
//! The crate keeps a local [`SessionState`] consistent with the game server
//! over two persistent connections (the matchmaking queue and the room) and
//! two one-shot HTTP requests. Rendering is left to the caller, which reads
//! state snapshots and issues intents.
//!
//! ## Architecture
//!
//! - [`Channel`]: one background connection over any [`Transport`], reporting
//!   `Opened`, `Message`, `Errored` and `Closed`.
//! - [`protocol`]: the `{type, message}` envelope codec and wire types.
//! - [`matchmaking`] and [`room`]: the two state machines.
//! - [`store`]: [`SessionState`] and the pure [`apply`] function.
//! - [`Dispatcher`]: turns intents into effects and feeds every asynchronous
//!   result back through `apply`, guarded by a session epoch.
//! - [`display`]: derived clocks for the queue wait and turn countdown.
//!
//! ## Features
//!
//! - `transport-websocket` (default): [`WebSocketTransport`] and
//!   [`WebSocketConnector`] over `tokio-tungstenite`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hakkero_client::{Dispatcher, HakkeroConfig};
//!
//! # async fn run() -> hakkero_client::Result<()> {
//! let config = HakkeroConfig::new("http://localhost:8080")?;
//! let mut dispatcher = Dispatcher::with_defaults(config)?;
//!
//! dispatcher.change_username("alice");
//! dispatcher.connect_queue()?;
//!
//! let state = dispatcher
//!     .run_until(|s| s.matchmaking.awaiting_response())
//!     .await;
//! println!("queue size: {}", state.matchmaking.queue_size);
//! dispatcher.respond_ready_check(true)?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod event;
pub mod fetch;
pub mod matchmaking;
pub mod protocol;
pub mod room;
pub mod store;
pub mod transport;
pub mod transports;
pub mod validate;

// Re-export primary types for ergonomic imports.
pub use channel::{Channel, ChannelEvent, ConnectionState};
pub use config::HakkeroConfig;
pub use dispatcher::Dispatcher;
pub use display::{queue_wait, turn_countdown, DisplayTicker, TurnCountdown};
pub use error::{HakkeroError, Result};
pub use event::{Event, QueueEvent, RoomEvent};
pub use fetch::{Fetcher, HttpFetcher};
pub use matchmaking::{ConsoleLine, MatchStatus, MatchmakingState};
pub use protocol::{PlayerIndex, PlayerStatus, QueueMessage, RoomId, RoomMessage, Sentence};
pub use room::{DisplayStatus, Room, RoomPhase, RoomSlot, RoomState};
pub use store::{apply, SessionState};
pub use transport::{Connector, Transport};
pub use validate::ValidationError;

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
