//! Events consumed by the session store.
//!
//! Every state change, whether it comes from a user intent or from an
//! asynchronous completion (channel traffic, fetch responses, timers), is
//! expressed as an [`Event`] and goes through [`store::apply`](crate::store::apply).
//!
//! Events that need wall-clock time carry the instant they were observed,
//! so the transitions themselves stay pure.

use chrono::{DateTime, Utc};

use crate::protocol::{QueueMessage, RoomId, RoomMessage};
use crate::room::Room;

/// Input to the session store.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Start a new session: matchmaking and room state return to their
    /// defaults, the epoch advances, and only the username survives.
    Reset,
    /// The user edited their username.
    UsernameChanged(String),
    /// The user supplied a player token (jump-to-room).
    PlayerTokenAssigned(String),
    /// A room was chosen, by jump-to or by a matchmaking assignment.
    RoomSelected(RoomId),
    /// A free-form console line, e.g. the server welcome text.
    Console { text: String, at: DateTime<Utc> },
    /// Matchmaking state machine input.
    Queue(QueueEvent),
    /// Room state machine input.
    Room(RoomEvent),
    /// An asynchronous result issued during session `epoch`.
    ///
    /// Applied only if the store is still in that epoch; a reset in between
    /// makes it a no-op.
    Scoped { epoch: u64, event: Box<Event> },
}

impl Event {
    /// Tag this event with the session epoch it belongs to.
    pub fn scoped(self, epoch: u64) -> Self {
        Self::Scoped {
            epoch,
            event: Box::new(self),
        }
    }
}

/// Input to the matchmaking state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// A queue connect intent was issued.
    Connecting,
    /// The queue channel opened.
    Opened { at: DateTime<Utc> },
    /// The queue channel failed.
    Errored { error: String, at: DateTime<Utc> },
    /// The queue channel closed.
    Closed { at: DateTime<Utc> },
    /// A decoded server envelope.
    Message {
        message: QueueMessage,
        at: DateTime<Utc>,
    },
    /// The ready-check answer was sent.
    Responded { accepted: bool, at: DateTime<Utc> },
}

/// Input to the room state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// The room snapshot fetch succeeded.
    Loaded(Room),
    /// The room snapshot fetch failed.
    LoadFailed(String),
    /// A room connect intent was issued.
    Connecting,
    /// The room channel opened.
    Opened,
    /// The room channel failed.
    Errored(String),
    /// The room channel closed.
    Closed,
    /// A decoded server envelope.
    Message(RoomMessage),
    /// The user edited their draft sentence.
    DraftChanged(String),
    /// The draft was sent to the server.
    Submitted,
}
