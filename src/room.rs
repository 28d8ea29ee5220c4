//! The room state machine and its derived views.
//!
//! A room moves through `Loading → Active → Ended`, with `Failed` reachable
//! from loading (fetch error) or from any point where the room channel
//! errors. The loaded [`Room`] is only ever changed by merging a validated
//! `turn` patch or inserting a streamed sentence.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::channel::ConnectionState;
use crate::error::{HakkeroError, Result};
use crate::event::RoomEvent;
use crate::protocol::{
    PlayerIndex, PlayerStatus, RoomId, RoomMessage, RoomPatch, RoomSnapshot, Sentence,
};

// ── Room ────────────────────────────────────────────────────────────

/// A loaded room.
///
/// `members` and `status` always have the same length, and `sentences` is
/// never empty: its first entry is the story prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub members: Vec<String>,
    pub status: Vec<PlayerStatus>,
    pub sentences: Vec<Sentence>,
    pub start: DateTime<Utc>,
    pub current: DateTime<Utc>,
    pub timeout: Duration,
}

impl TryFrom<RoomSnapshot> for Room {
    type Error = HakkeroError;

    fn try_from(snapshot: RoomSnapshot) -> Result<Self> {
        check_shape(&snapshot.members, &snapshot.status, &snapshot.sentences)?;
        Ok(Self {
            id: snapshot.id,
            members: snapshot.members,
            status: snapshot.status,
            sentences: snapshot.sentences,
            start: snapshot.start,
            current: snapshot.current,
            timeout: Duration::from_nanos(snapshot.timeout),
        })
    }
}

fn check_shape(members: &[String], status: &[PlayerStatus], sentences: &[Sentence]) -> Result<()> {
    if members.len() != status.len() {
        return Err(HakkeroError::Protocol(format!(
            "{} members but {} statuses",
            members.len(),
            status.len()
        )));
    }
    if sentences.is_empty() {
        return Err(HakkeroError::Protocol("room has no story prompt".into()));
    }
    Ok(())
}

impl Room {
    /// Per-turn duration in seconds.
    pub fn timeout_seconds(&self) -> f64 {
        self.timeout.as_secs_f64()
    }

    /// When the active turn runs out.
    pub fn turn_deadline(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.timeout)
            .ok()
            .and_then(|timeout| self.current.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The story prompt.
    pub fn prompt(&self) -> Option<&Sentence> {
        self.sentences.first()
    }

    /// Everything after the prompt.
    pub fn story(&self) -> &[Sentence] {
        self.sentences.get(1..).unwrap_or_default()
    }

    /// Number of player-written sentences.
    pub fn turns_passed(&self) -> usize {
        self.sentences.iter().filter(|s| !s.system).count()
    }

    /// The member name of a sentence's author, or `None` for system entries.
    pub fn author_of(&self, sentence: &Sentence) -> Option<&str> {
        if sentence.system {
            return None;
        }
        self.members.get(sentence.owner).map(String::as_str)
    }

    /// Overwrite the fields present in `patch`.
    ///
    /// The patch is checked against the merged result first; a patch that
    /// would leave `members` and `status` with different lengths, or empty
    /// the story, is rejected and the room is left untouched.
    pub fn merge(&mut self, patch: RoomPatch) -> Result<()> {
        check_shape(
            patch.members.as_deref().unwrap_or(&self.members),
            patch.status.as_deref().unwrap_or(&self.status),
            patch.sentences.as_deref().unwrap_or(&self.sentences),
        )?;

        if let Some(members) = patch.members {
            self.members = members;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(sentences) = patch.sentences {
            self.sentences = sentences;
        }
        if let Some(start) = patch.start {
            self.start = start;
        }
        if let Some(current) = patch.current {
            self.current = current;
        }
        if let Some(timeout) = patch.timeout {
            self.timeout = Duration::from_nanos(timeout);
        }
        Ok(())
    }

    /// Insert a streamed sentence at `pos`.
    ///
    /// A position past the end is clamped to an append.
    pub fn insert_sentence(&mut self, pos: usize, sentence: Sentence) {
        let len = self.sentences.len();
        let pos = if pos > len {
            warn!(pos, len, "sentence position past the end; appending");
            len
        } else {
            pos
        };
        self.sentences.insert(pos, sentence);
    }
}

// ── Room state ──────────────────────────────────────────────────────

/// The room as far as this client knows it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RoomSlot {
    /// Waiting for the snapshot fetch.
    #[default]
    Loading,
    /// The snapshot fetch failed.
    Failed(String),
    Loaded(Room),
}

/// Coarse lifecycle of the room view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    Loading,
    Active,
    Ended,
    Failed,
}

/// How a player is presented in the member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Active,
    Turn,
    Skipped,
    Disconnected,
    Unknown,
    /// The game ended and this player won.
    Winner,
}

impl From<PlayerStatus> for DisplayStatus {
    fn from(status: PlayerStatus) -> Self {
        match status {
            PlayerStatus::Active => Self::Active,
            PlayerStatus::Turn => Self::Turn,
            PlayerStatus::Skipped => Self::Skipped,
            PlayerStatus::Disconnected => Self::Disconnected,
            PlayerStatus::Unknown => Self::Unknown,
        }
    }
}

/// Room state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoomState {
    pub connection: ConnectionState,
    pub room: RoomSlot,
    /// The winner, once the game has ended. Set at most once.
    pub ended: Option<PlayerIndex>,
    /// This client's position in the member list. Set at most once.
    pub my_player_index: Option<PlayerIndex>,
    pub draft_sentence: String,
}

impl RoomState {
    /// The loaded room, if any.
    pub fn loaded(&self) -> Option<&Room> {
        match &self.room {
            RoomSlot::Loaded(room) => Some(room),
            _ => None,
        }
    }

    /// Where the room is in its lifecycle. A failed load or connection
    /// takes precedence over everything else.
    pub fn phase(&self) -> RoomPhase {
        if matches!(self.room, RoomSlot::Failed(_)) || self.connection.is_failed() {
            return RoomPhase::Failed;
        }
        match (&self.room, self.ended) {
            (RoomSlot::Loaded(_), Some(_)) => RoomPhase::Ended,
            (RoomSlot::Loaded(_), None) => RoomPhase::Active,
            _ => RoomPhase::Loading,
        }
    }

    /// Returns `true` when this client holds the active turn.
    pub fn is_my_turn(&self) -> bool {
        match (self.loaded(), self.my_player_index) {
            (Some(room), Some(me)) => room.status.get(me) == Some(&PlayerStatus::Turn),
            _ => false,
        }
    }

    /// Presentation status of the player at `index`.
    pub fn display_status(&self, index: PlayerIndex) -> Option<DisplayStatus> {
        let status = *self.loaded()?.status.get(index)?;
        if self.ended == Some(index) {
            return Some(DisplayStatus::Winner);
        }
        Some(status.into())
    }

    /// Apply one event. Returns `false` when the event changes nothing.
    pub(crate) fn reduce(&mut self, event: RoomEvent) -> bool {
        match event {
            RoomEvent::Loaded(room) => {
                if self.room != RoomSlot::Loading {
                    debug!(id = room.id, "room: ignoring late snapshot");
                    return false;
                }
                if let Some(me) = self.my_player_index {
                    if me >= room.members.len() {
                        warn!(
                            index = me,
                            members = room.members.len(),
                            "room: player index out of range"
                        );
                    }
                }
                self.room = RoomSlot::Loaded(room);
            }
            RoomEvent::LoadFailed(error) => {
                if self.room != RoomSlot::Loading {
                    return false;
                }
                self.room = RoomSlot::Failed(error);
            }
            RoomEvent::Connecting => {
                if self.connection != ConnectionState::Unconnected {
                    debug!(connection = ?self.connection, "room: ignoring connect");
                    return false;
                }
                self.connection = ConnectionState::Connecting;
            }
            RoomEvent::Opened => self.connection = ConnectionState::Connected,
            RoomEvent::Errored(error) => self.connection = ConnectionState::Failed(error),
            RoomEvent::Closed => {
                if self.room == RoomSlot::Loading {
                    self.connection =
                        ConnectionState::Failed("closed before the room loaded".into());
                } else {
                    self.connection.close();
                }
            }
            RoomEvent::Message(message) => return self.on_message(message),
            RoomEvent::DraftChanged(draft) => {
                if self.draft_sentence == draft {
                    return false;
                }
                self.draft_sentence = draft;
            }
            RoomEvent::Submitted => {
                if self.draft_sentence.is_empty() {
                    return false;
                }
                self.draft_sentence.clear();
            }
        }
        true
    }

    fn on_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Index(index) => {
                if self.my_player_index.is_some() {
                    debug!(index, "room: duplicate index ignored");
                    return false;
                }
                self.my_player_index = Some(index);
            }
            RoomMessage::End { winner } => {
                if self.ended.is_some() {
                    debug!(winner, "room: duplicate end ignored");
                    return false;
                }
                self.ended = Some(winner);
            }
            RoomMessage::Turn(patch) => {
                let RoomSlot::Loaded(room) = &mut self.room else {
                    warn!("room: turn update before the room loaded; dropped");
                    return false;
                };
                if let Err(e) = room.merge(patch) {
                    warn!("room: rejected turn update: {e}");
                    return false;
                }
            }
            RoomMessage::Sentence { pos, sentence } => {
                let RoomSlot::Loaded(room) = &mut self.room else {
                    warn!(pos, "room: sentence before the room loaded; dropped");
                    return false;
                };
                room.insert_sentence(pos, sentence);
            }
        }
        true
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
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn snapshot() -> RoomSnapshot {
        RoomSnapshot {
            id: 42,
            members: vec!["alice".into(), "bob".into()],
            status: vec![PlayerStatus::Turn, PlayerStatus::Active],
            sentences: vec![Sentence::system("It was a dark and stormy night.")],
            start: t(0),
            current: t(5),
            timeout: 30_000_000_000,
        }
    }

    fn loaded() -> RoomState {
        let mut state = RoomState::default();
        assert!(state.reduce(RoomEvent::Loaded(snapshot().try_into().unwrap())));
        state
    }

    #[test]
    fn snapshot_timeout_is_normalized_to_seconds() {
        let room = Room::try_from(snapshot()).unwrap();
        assert_eq!(room.timeout, Duration::from_secs(30));
        assert!((room.timeout_seconds() - 30.0).abs() < f64::EPSILON);
        assert_eq!(room.turn_deadline(), t(35));
    }

    #[test]
    fn snapshot_with_mismatched_status_is_rejected() {
        let mut bad = snapshot();
        bad.status.pop();
        assert!(matches!(Room::try_from(bad), Err(HakkeroError::Protocol(_))));

        let mut bad = snapshot();
        bad.sentences.clear();
        assert!(Room::try_from(bad).is_err());
    }

    #[test]
    fn phases() {
        let mut state = RoomState::default();
        assert_eq!(state.phase(), RoomPhase::Loading);
        state.reduce(RoomEvent::Loaded(snapshot().try_into().unwrap()));
        assert_eq!(state.phase(), RoomPhase::Active);
        state.reduce(RoomEvent::Message(RoomMessage::End { winner: 1 }));
        assert_eq!(state.phase(), RoomPhase::Ended);

        let mut failed = RoomState::default();
        failed.reduce(RoomEvent::LoadFailed("404".into()));
        assert_eq!(failed.phase(), RoomPhase::Failed);
        assert!(!failed.reduce(RoomEvent::Loaded(snapshot().try_into().unwrap())));
    }

    #[test]
    fn turn_patch_overwrites_only_present_keys() {
        let mut state = loaded();
        let patch = RoomPatch {
            status: Some(vec![PlayerStatus::Active, PlayerStatus::Turn]),
            current: Some(t(40)),
            ..RoomPatch::default()
        };
        assert!(state.reduce(RoomEvent::Message(RoomMessage::Turn(patch))));

        let room = state.loaded().unwrap();
        assert_eq!(room.status, vec![PlayerStatus::Active, PlayerStatus::Turn]);
        assert_eq!(room.current, t(40));
        assert_eq!(room.members, vec!["alice", "bob"]);
        assert_eq!(room.start, t(0));
    }

    #[test]
    fn turn_patch_breaking_lengths_is_rejected() {
        let mut state = loaded();
        let before = state.clone();
        let patch = RoomPatch {
            status: Some(vec![PlayerStatus::Turn]),
            ..RoomPatch::default()
        };
        assert!(!state.reduce(RoomEvent::Message(RoomMessage::Turn(patch))));
        assert_eq!(state, before);
    }

    #[test]
    fn sentence_insert_and_clamp() {
        let mut state = loaded();
        state.reduce(RoomEvent::Message(RoomMessage::Sentence {
            pos: 1,
            sentence: Sentence::player(0, "first"),
        }));
        state.reduce(RoomEvent::Message(RoomMessage::Sentence {
            pos: 99,
            sentence: Sentence::player(1, "second"),
        }));
        let room = state.loaded().unwrap();
        assert_eq!(room.sentences.len(), 3);
        assert_eq!(room.sentences[2].content, "second");
        assert_eq!(room.turns_passed(), 2);
        assert_eq!(room.story().len(), 2);
        assert_eq!(room.author_of(&room.sentences[1]), Some("alice"));
        assert_eq!(room.author_of(&room.sentences[0]), None);
    }

    #[test]
    fn sentence_before_load_is_dropped() {
        let mut state = RoomState::default();
        assert!(!state.reduce(RoomEvent::Message(RoomMessage::Sentence {
            pos: 1,
            sentence: Sentence::player(0, "early"),
        })));
        assert_eq!(state.room, RoomSlot::Loading);
    }

    #[test]
    fn index_and_end_are_set_once() {
        let mut state = loaded();
        assert!(state.reduce(RoomEvent::Message(RoomMessage::Index(0))));
        assert!(!state.reduce(RoomEvent::Message(RoomMessage::Index(1))));
        assert_eq!(state.my_player_index, Some(0));

        assert!(state.reduce(RoomEvent::Message(RoomMessage::End { winner: 1 })));
        assert!(!state.reduce(RoomEvent::Message(RoomMessage::End { winner: 0 })));
        assert_eq!(state.ended, Some(1));
    }

    #[test]
    fn my_turn_and_display_status() {
        let mut state = loaded();
        assert!(!state.is_my_turn());
        state.reduce(RoomEvent::Message(RoomMessage::Index(0)));
        assert!(state.is_my_turn());
        assert_eq!(state.display_status(0), Some(DisplayStatus::Turn));
        assert_eq!(state.display_status(2), None);

        state.reduce(RoomEvent::Message(RoomMessage::End { winner: 1 }));
        assert_eq!(state.display_status(1), Some(DisplayStatus::Winner));
    }

    #[test]
    fn channel_error_is_absorbing() {
        let mut state = loaded();
        state.reduce(RoomEvent::Connecting);
        state.reduce(RoomEvent::Opened);
        state.reduce(RoomEvent::Errored("reset".into()));
        state.reduce(RoomEvent::Closed);
        assert_eq!(state.connection, ConnectionState::Failed("reset".into()));
        assert_eq!(state.phase(), RoomPhase::Failed);
    }

    #[test]
    fn draft_clears_on_submit() {
        let mut state = loaded();
        assert!(state.reduce(RoomEvent::DraftChanged("The end.".into())));
        assert!(state.reduce(RoomEvent::Submitted));
        assert!(state.draft_sentence.is_empty());
        assert!(!state.reduce(RoomEvent::Submitted));
    }
}
