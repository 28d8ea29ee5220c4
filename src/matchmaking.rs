//! The matchmaking state machine.
//!
//! Connection: `Unconnected → Connecting → Connected`, or `Failed` on a
//! channel error. Match status, while connected:
//!
//! ```text
//! Idle ──Opened──▶ Found(t) ──found──▶ Pending ──respond──▶ Accepted | Rejected
//!                     ▲                                            │
//!                     └──────── announcement{success: false} ──────┘
//! ```
//!
//! A clean close returns the status to `Idle`. A successful announcement is
//! not a state here: the dispatcher schedules the room hand-off from it.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::channel::ConnectionState;
use crate::event::QueueEvent;
use crate::protocol::QueueMessage;

/// Progress of the current match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStatus {
    /// Not queued.
    #[default]
    Idle,
    /// Queued since the given instant, waiting for a match.
    Found(DateTime<Utc>),
    /// A match was found; the ready-check is outstanding.
    Pending,
    /// This player accepted the ready-check.
    Accepted,
    /// This player rejected the ready-check.
    Rejected,
}

/// One timestamped line of the matchmaking console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub at: DateTime<Utc>,
    pub text: String,
}

impl fmt::Display for ConsoleLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.at.format("%Y-%m-%d %H:%M:%S UTC"), self.text)
    }
}

/// Matchmaking state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchmakingState {
    pub connection: ConnectionState,
    /// Console lines, most recent first.
    pub console: VecDeque<ConsoleLine>,
    /// Last queue size reported by the server.
    pub queue_size: u64,
    pub match_status: MatchStatus,
}

impl MatchmakingState {
    /// Returns `true` when the ready-check answer may be sent.
    pub fn awaiting_response(&self) -> bool {
        self.connection.is_connected() && self.match_status == MatchStatus::Pending
    }

    /// Prepend a line to the console.
    pub(crate) fn log(&mut self, at: DateTime<Utc>, text: impl Into<String>) {
        self.console.push_front(ConsoleLine {
            at,
            text: text.into(),
        });
    }

    /// Apply one event. Returns `false` when the event changes nothing.
    pub(crate) fn reduce(&mut self, event: QueueEvent) -> bool {
        match event {
            QueueEvent::Connecting => {
                if self.connection != ConnectionState::Unconnected {
                    debug!(connection = ?self.connection, "queue: ignoring connect");
                    return false;
                }
                self.connection = ConnectionState::Connecting;
            }
            QueueEvent::Opened { at } => {
                self.connection = ConnectionState::Connected;
                self.match_status = MatchStatus::Found(at);
                self.log(
                    at,
                    "You are now connected to the server! Currently in queue...",
                );
            }
            QueueEvent::Errored { error, at } => {
                self.log(at, format!("An error has occurred: {error}"));
                self.connection = ConnectionState::Failed(error);
            }
            QueueEvent::Closed { at } => {
                self.connection.close();
                self.match_status = MatchStatus::Idle;
                self.log(at, "You have been disconnected from queue.");
            }
            QueueEvent::Message { message, at } => return self.on_message(message, at),
            QueueEvent::Responded { accepted, at } => {
                if self.match_status != MatchStatus::Pending {
                    debug!(status = ?self.match_status, "queue: response without ready-check");
                    return false;
                }
                if accepted {
                    self.match_status = MatchStatus::Accepted;
                    self.log(at, "You have accepted the match!");
                } else {
                    self.match_status = MatchStatus::Rejected;
                    self.log(at, "You have rejected the match.");
                }
            }
        }
        true
    }

    fn on_message(&mut self, message: QueueMessage, at: DateTime<Utc>) -> bool {
        match message {
            QueueMessage::Announcement(announcement) => {
                self.log(at, announcement.announcement);
                if !announcement.success && self.connection.is_connected() {
                    self.match_status = MatchStatus::Found(at);
                }
                true
            }
            QueueMessage::Size(size) => {
                let changed = self.queue_size != size;
                self.queue_size = size;
                changed
            }
            QueueMessage::Found => {
                if !matches!(self.match_status, MatchStatus::Found(_)) {
                    debug!(status = ?self.match_status, "queue: `found` outside the queue");
                    return false;
                }
                self.match_status = MatchStatus::Pending;
                self.log(
                    at,
                    "A room has been found! Please accept or reject the ready check.",
                );
                true
            }
            // Identity belongs to the session store.
            QueueMessage::PlayerToken(_) => false,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::Announcement;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn connected() -> MatchmakingState {
        let mut state = MatchmakingState::default();
        assert!(state.reduce(QueueEvent::Connecting));
        assert!(state.reduce(QueueEvent::Opened { at: t(0) }));
        state
    }

    fn msg(message: QueueMessage, secs: i64) -> QueueEvent {
        QueueEvent::Message {
            message,
            at: t(secs),
        }
    }

    #[test]
    fn opening_starts_the_queue_clock() {
        let state = connected();
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.match_status, MatchStatus::Found(t(0)));
        assert_eq!(state.console.len(), 1);
    }

    #[test]
    fn ready_check_accept_path() {
        let mut state = connected();
        assert!(state.reduce(msg(QueueMessage::Found, 5)));
        assert_eq!(state.match_status, MatchStatus::Pending);
        assert!(state.awaiting_response());

        assert!(state.reduce(QueueEvent::Responded {
            accepted: true,
            at: t(6)
        }));
        assert_eq!(state.match_status, MatchStatus::Accepted);
        assert_eq!(state.console[0].text, "You have accepted the match!");
    }

    #[test]
    fn response_outside_pending_is_ignored() {
        let mut state = connected();
        let before = state.clone();
        assert!(!state.reduce(QueueEvent::Responded {
            accepted: false,
            at: t(1)
        }));
        assert_eq!(state, before);
    }

    #[test]
    fn failed_announcement_requeues() {
        let mut state = connected();
        state.reduce(msg(QueueMessage::Found, 1));
        state.reduce(QueueEvent::Responded {
            accepted: true,
            at: t(2),
        });
        state.reduce(msg(
            QueueMessage::Announcement(Announcement {
                success: false,
                room: None,
                announcement: "Match cannot start.".into(),
            }),
            3,
        ));
        assert_eq!(state.match_status, MatchStatus::Found(t(3)));
        assert_eq!(state.console[0].text, "Match cannot start.");
    }

    #[test]
    fn successful_announcement_only_logs() {
        let mut state = connected();
        state.reduce(msg(QueueMessage::Found, 1));
        state.reduce(QueueEvent::Responded {
            accepted: true,
            at: t(2),
        });
        state.reduce(msg(
            QueueMessage::Announcement(Announcement {
                success: true,
                room: Some(42),
                announcement: "Match found".into(),
            }),
            3,
        ));
        assert_eq!(state.match_status, MatchStatus::Accepted);
        assert_eq!(state.console[0].text, "Match found");
    }

    #[test]
    fn size_updates_queue_size() {
        let mut state = connected();
        assert!(state.reduce(msg(QueueMessage::Size(3), 1)));
        assert_eq!(state.queue_size, 3);
        assert!(!state.reduce(msg(QueueMessage::Size(3), 2)));
    }

    #[test]
    fn error_is_distinct_and_survives_close() {
        let mut state = connected();
        state.reduce(QueueEvent::Errored {
            error: "reset by peer".into(),
            at: t(1),
        });
        assert_eq!(
            state.connection,
            ConnectionState::Failed("reset by peer".into())
        );
        state.reduce(QueueEvent::Closed { at: t(2) });
        assert!(state.connection.is_failed());
        assert_eq!(state.match_status, MatchStatus::Idle);
        assert!(!state.reduce(QueueEvent::Connecting));
    }

    #[test]
    fn close_resets_match_status() {
        let mut state = connected();
        state.reduce(msg(QueueMessage::Found, 1));
        state.reduce(QueueEvent::Closed { at: t(2) });
        assert_eq!(state.connection, ConnectionState::Unconnected);
        assert_eq!(state.match_status, MatchStatus::Idle);
    }

    #[test]
    fn console_is_most_recent_first() {
        let state = {
            let mut s = connected();
            s.reduce(msg(QueueMessage::Found, 1));
            s
        };
        assert!(state.console[0].text.starts_with("A room has been found"));
        assert!(state.console[1].text.starts_with("You are now connected"));
        assert!(state.console[0].to_string().ends_with(": A room has been found! Please accept or reject the ready check."));
    }
}
