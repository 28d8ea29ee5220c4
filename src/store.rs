//! The session store: one immutable state value replaced by [`apply`].
//!
//! `apply` is a pure function of the current state and one [`Event`]. It
//! never performs I/O, never spawns, and never reads the clock; every effect
//! lives in the [`Dispatcher`](crate::Dispatcher). This keeps every
//! transition testable without a runtime.
//!
//! Each effective transition bumps [`SessionState::version`]. A reset also
//! bumps [`SessionState::epoch`], which invalidates asynchronous results
//! issued before it (see [`Event::Scoped`]).

use tracing::debug;

use crate::event::{Event, QueueEvent};
use crate::matchmaking::MatchmakingState;
use crate::protocol::{QueueMessage, RoomId};
use crate::room::RoomState;

/// The whole client state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    /// Incremented by every transition that changed something.
    pub version: u64,
    /// Incremented by every reset.
    pub epoch: u64,
    pub username: String,
    /// Opaque token from the queue server; empty until assigned.
    pub player_token: String,
    /// The room to load, once assigned or chosen.
    pub selected_room: Option<RoomId>,
    pub matchmaking: MatchmakingState,
    pub room: RoomState,
}

/// Compute the state after `event`.
///
/// Returns an equal value (same `version`) when the event does not apply:
/// an out-of-order lifecycle event, a duplicate, or a stale scoped result.
pub fn apply(state: &SessionState, event: Event) -> SessionState {
    let mut next = state.clone();
    if reduce(&mut next, event) {
        next.version = next.version.wrapping_add(1);
    }
    next
}

/// Mutate `state` in place. Returns `false`, with `state` untouched, when
/// the event changes nothing.
fn reduce(state: &mut SessionState, event: Event) -> bool {
    match event {
        Event::Reset => {
            *state = SessionState {
                version: state.version,
                epoch: state.epoch.wrapping_add(1),
                username: std::mem::take(&mut state.username),
                ..SessionState::default()
            };
            true
        }
        Event::UsernameChanged(username) => replace(&mut state.username, username),
        Event::PlayerTokenAssigned(token) => replace(&mut state.player_token, token),
        Event::RoomSelected(id) => replace(&mut state.selected_room, Some(id)),
        Event::Console { text, at } => {
            state.matchmaking.log(at, text);
            true
        }
        Event::Queue(QueueEvent::Message {
            message: QueueMessage::PlayerToken(token),
            at,
        }) => {
            state.matchmaking.log(at, format!("Your ID is {token}"));
            state.player_token = token;
            true
        }
        Event::Queue(event) => state.matchmaking.reduce(event),
        Event::Room(event) => state.room.reduce(event),
        Event::Scoped { epoch, event } => {
            if epoch != state.epoch {
                debug!(
                    issued = epoch,
                    current = state.epoch,
                    "discarding result from an earlier session"
                );
                return false;
            }
            reduce(state, *event)
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
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
    use crate::channel::ConnectionState;
    use crate::event::RoomEvent;
    use crate::matchmaking::MatchStatus;
    use crate::room::RoomSlot;
    use chrono::{DateTime, TimeZone, Utc};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn run(events: impl IntoIterator<Item = Event>) -> SessionState {
        events
            .into_iter()
            .fold(SessionState::default(), |state, event| apply(&state, event))
    }

    #[test]
    fn version_counts_effective_transitions() {
        let state = run([
            Event::UsernameChanged("alice".into()),
            Event::UsernameChanged("alice".into()),
            Event::Queue(QueueEvent::Connecting),
        ]);
        assert_eq!(state.version, 2);
    }

    #[test]
    fn player_token_message_sets_identity_and_logs() {
        let state = run([Event::Queue(QueueEvent::Message {
            message: QueueMessage::PlayerToken("AbCd".into()),
            at: t(1),
        })]);
        assert_eq!(state.player_token, "AbCd");
        assert_eq!(state.matchmaking.console[0].text, "Your ID is AbCd");
    }

    #[test]
    fn reset_keeps_only_the_username() {
        let state = run([
            Event::UsernameChanged("alice".into()),
            Event::PlayerTokenAssigned("a".repeat(32)),
            Event::RoomSelected(7),
            Event::Queue(QueueEvent::Connecting),
            Event::Queue(QueueEvent::Opened { at: t(0) }),
            Event::Room(RoomEvent::LoadFailed("gone".into())),
            Event::Reset,
        ]);
        assert_eq!(state.username, "alice");
        assert_eq!(state.epoch, 1);
        assert!(state.player_token.is_empty());
        assert_eq!(state.selected_room, None);
        assert_eq!(state.matchmaking.connection, ConnectionState::Unconnected);
        assert_eq!(state.matchmaking.match_status, MatchStatus::Idle);
        assert!(state.matchmaking.console.is_empty());
        assert_eq!(state.room.room, RoomSlot::Loading);
    }

    #[test]
    fn stale_scoped_events_are_discarded() {
        let before = run([Event::Queue(QueueEvent::Connecting), Event::Reset]);
        let stale = Event::Queue(QueueEvent::Opened { at: t(1) }).scoped(0);
        let after = apply(&before, stale);
        assert_eq!(after, before);

        let fresh = Event::Queue(QueueEvent::Connecting).scoped(1);
        let after = apply(&before, fresh);
        assert_eq!(after.matchmaking.connection, ConnectionState::Connecting);
        assert_eq!(after.version, before.version + 1);
    }

    #[test]
    fn console_event_prepends() {
        let state = run([
            Event::Console {
                text: "Welcome".into(),
                at: t(0),
            },
            Event::Console {
                text: "again".into(),
                at: t(1),
            },
        ]);
        assert_eq!(state.matchmaking.console[0].text, "again");
        assert_eq!(state.matchmaking.console[1].text, "Welcome");
    }
}
