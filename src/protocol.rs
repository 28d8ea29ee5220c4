//! Wire-compatible protocol types and the message envelope codec.
//!
//! Every streamed server message is wrapped in a `{type, message}` envelope.
//! [`Envelope`] is the untyped form; [`QueueMessage`] and [`RoomMessage`] are
//! the typed forms for the two connections, converted through the
//! [`WireMessage`] trait. Client-to-server frames are bare JSON objects with
//! no envelope.
//!
//! Key adaptations from the server's JSON:
//!
//! - The turn timeout is sent in nanoseconds (`timeout`); it is kept raw here
//!   and normalized to a [`Duration`](std::time::Duration) by the room state.
//! - Timestamps are RFC 3339 strings and decode into [`DateTime<Utc>`].
//! - The `found` envelope may arrive with `message: {}`, `null`, or no
//!   `message` at all.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{HakkeroError, Result};

// ── Type aliases ────────────────────────────────────────────────────

/// Server-assigned room number.
pub type RoomId = u64;

/// Position of a player in a room's member list.
pub type PlayerIndex = usize;

// ── Shared payload types ────────────────────────────────────────────

/// A player's status within a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    /// Still in the game, waiting for their turn.
    #[default]
    Active,
    /// Currently writing.
    Turn,
    /// Skipped their last turn.
    Skipped,
    /// Timed out or lost their connection.
    Disconnected,
    /// Any status string this client does not know.
    #[serde(other)]
    Unknown,
}

/// One entry in a room's story.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sentence {
    pub content: String,
    /// Index of the author in the member list. Meaningless for system entries.
    #[serde(default)]
    pub owner: PlayerIndex,
    /// System announcements (story prompt, skips, timeouts).
    #[serde(default)]
    pub system: bool,
}

impl Sentence {
    /// A sentence written by the player at `owner`.
    pub fn player(owner: PlayerIndex, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            owner,
            system: false,
        }
    }

    /// A system announcement.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            owner: 0,
            system: true,
        }
    }
}

/// Full room snapshot returned by `POST /rooms/<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub members: Vec<String>,
    pub status: Vec<PlayerStatus>,
    pub sentences: Vec<Sentence>,
    /// When the game began.
    pub start: DateTime<Utc>,
    /// When the active turn began.
    pub current: DateTime<Utc>,
    /// Per-turn duration in nanoseconds.
    pub timeout: u64,
}

/// Partial room snapshot carried by a `turn` envelope.
///
/// Only the supplied keys overwrite the stored room.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoomPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<PlayerStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentences: Option<Vec<Sentence>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DateTime<Utc>>,
    /// Per-turn duration in nanoseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Payload of a queue `announcement` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Announcement {
    /// `true` when a room has been set up for the player.
    pub success: bool,
    /// The assigned room. Only meaningful when `success` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    /// Human-readable text for the console.
    #[serde(default)]
    pub announcement: String,
}

// ── Envelope ────────────────────────────────────────────────────────

/// The untyped `{type, message}` wrapper around every streamed server message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: serde_json::Value,
}

impl Envelope {
    /// Wrap a serializable payload under the given type tag.
    pub fn new<T: Serialize>(kind: &str, message: &T) -> Result<Self> {
        Ok(Self {
            kind: kind.to_string(),
            message: serde_json::to_value(message)?,
        })
    }

    /// Decode the `message` field into `T`.
    fn payload<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.message).map_err(|e| {
            HakkeroError::Protocol(format!("malformed `{}` payload: {e}", self.kind))
        })
    }
}

/// A typed message that travels inside an [`Envelope`].
pub trait WireMessage: Sized {
    /// Convert from the untyped envelope.
    ///
    /// # Errors
    ///
    /// Returns [`HakkeroError::Protocol`] for unknown type tags and for
    /// payloads that do not match the tag.
    fn from_envelope(envelope: Envelope) -> Result<Self>;

    /// Convert into the untyped envelope.
    fn to_envelope(&self) -> Result<Envelope>;
}

/// Parse one text frame into a typed message.
///
/// # Errors
///
/// Returns [`HakkeroError::Protocol`] if the frame is not a JSON envelope or
/// the envelope does not describe a valid `M`.
pub fn decode<M: WireMessage>(text: &str) -> Result<M> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| HakkeroError::Protocol(format!("unparseable envelope: {e}")))?;
    M::from_envelope(envelope)
}

/// Serialize a typed message into one text frame.
pub fn encode<M: WireMessage>(message: &M) -> Result<String> {
    Ok(serde_json::to_string(&message.to_envelope()?)?)
}

// ── Queue connection ────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct SizePayload {
    size: u64,
}

#[derive(Serialize, Deserialize)]
struct IdPayload {
    #[serde(rename = "ID")]
    id: String,
}

/// Messages the server streams on the `/queue` connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    /// Matchmaking outcome, or any other console-worthy notice.
    Announcement(Announcement),
    /// Number of players currently queued.
    Size(u64),
    /// A match was found; a ready-check is outstanding.
    Found,
    /// The opaque token identifying this player to the room server.
    PlayerToken(String),
}

impl WireMessage for QueueMessage {
    fn from_envelope(envelope: Envelope) -> Result<Self> {
        match envelope.kind.as_str() {
            "announcement" => Ok(Self::Announcement(envelope.payload()?)),
            "size" => Ok(Self::Size(envelope.payload::<SizePayload>()?.size)),
            "found" => Ok(Self::Found),
            "ID" => Ok(Self::PlayerToken(envelope.payload::<IdPayload>()?.id)),
            other => Err(HakkeroError::Protocol(format!(
                "unknown queue envelope type `{other}`"
            ))),
        }
    }

    fn to_envelope(&self) -> Result<Envelope> {
        match self {
            Self::Announcement(a) => Envelope::new("announcement", a),
            Self::Size(size) => Envelope::new("size", &SizePayload { size: *size }),
            Self::Found => Envelope::new("found", &serde_json::json!({})),
            Self::PlayerToken(id) => Envelope::new("ID", &IdPayload { id: id.clone() }),
        }
    }
}

// ── Room connection ─────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct IndexPayload {
    index: PlayerIndex,
}

#[derive(Serialize, Deserialize)]
struct SentencePayload {
    pos: usize,
    sentence: Sentence,
}

#[derive(Serialize, Deserialize)]
struct EndPayload {
    #[serde(rename = "Winner")]
    winner: PlayerIndex,
}

/// Messages the server streams on the `/rooms/<id>` connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomMessage {
    /// This client's position in the member list.
    Index(PlayerIndex),
    /// A partial room snapshot, typically at every turn change.
    Turn(RoomPatch),
    /// A sentence to insert at `pos`.
    Sentence { pos: usize, sentence: Sentence },
    /// The game is over.
    End { winner: PlayerIndex },
}

impl WireMessage for RoomMessage {
    fn from_envelope(envelope: Envelope) -> Result<Self> {
        match envelope.kind.as_str() {
            "index" => Ok(Self::Index(envelope.payload::<IndexPayload>()?.index)),
            "turn" => Ok(Self::Turn(envelope.payload()?)),
            "sentence" => {
                let SentencePayload { pos, sentence } = envelope.payload()?;
                Ok(Self::Sentence { pos, sentence })
            }
            "end" => Ok(Self::End {
                winner: envelope.payload::<EndPayload>()?.winner,
            }),
            other => Err(HakkeroError::Protocol(format!(
                "unknown room envelope type `{other}`"
            ))),
        }
    }

    fn to_envelope(&self) -> Result<Envelope> {
        match self {
            Self::Index(index) => Envelope::new("index", &IndexPayload { index: *index }),
            Self::Turn(patch) => Envelope::new("turn", patch),
            Self::Sentence { pos, sentence } => Envelope::new(
                "sentence",
                &SentencePayload {
                    pos: *pos,
                    sentence: sentence.clone(),
                },
            ),
            Self::End { winner } => Envelope::new("end", &EndPayload { winner: *winner }),
        }
    }
}

// ── Client-to-server frames ─────────────────────────────────────────

/// Ready-check answer sent on the queue connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadyCheckResponse {
    pub accepted: bool,
}

/// Turn submission sent on the room connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitSentence {
    pub skip: bool,
    pub content: String,
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

    #[test]
    fn found_accepts_any_message_shape() {
        for text in [
            r#"{"type":"found","message":{}}"#,
            r#"{"type":"found","message":null}"#,
            r#"{"type":"found"}"#,
        ] {
            assert_eq!(decode::<QueueMessage>(text).unwrap(), QueueMessage::Found);
        }
    }

    #[test]
    fn id_uses_upper_case_key() {
        let msg = decode::<QueueMessage>(r#"{"type":"ID","message":{"ID":"abc"}}"#).unwrap();
        assert_eq!(msg, QueueMessage::PlayerToken("abc".into()));
    }

    #[test]
    fn end_uses_capitalized_winner_key() {
        let msg = decode::<RoomMessage>(r#"{"type":"end","message":{"Winner":2}}"#).unwrap();
        assert_eq!(msg, RoomMessage::End { winner: 2 });
    }

    #[test]
    fn failed_announcement_without_room() {
        let msg = decode::<QueueMessage>(
            r#"{"type":"announcement","message":{"success":false,"announcement":"nope"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            QueueMessage::Announcement(Announcement {
                success: false,
                room: None,
                announcement: "nope".into(),
            })
        );
    }

    #[test]
    fn unknown_type_is_a_protocol_violation() {
        let err = decode::<QueueMessage>(r#"{"type":"bogus","message":{}}"#).unwrap_err();
        assert!(matches!(err, HakkeroError::Protocol(_)));
        let err = decode::<RoomMessage>(r#"{"type":"size","message":{"size":1}}"#).unwrap_err();
        assert!(matches!(err, HakkeroError::Protocol(_)));
    }

    #[test]
    fn malformed_payload_is_a_protocol_violation() {
        let err = decode::<QueueMessage>(r#"{"type":"size","message":{"size":"x"}}"#).unwrap_err();
        assert!(matches!(err, HakkeroError::Protocol(_)));
        let err = decode::<RoomMessage>("not json").unwrap_err();
        assert!(matches!(err, HakkeroError::Protocol(_)));
    }

    #[test]
    fn unknown_status_string_decodes_to_unknown() {
        let status: Vec<PlayerStatus> =
            serde_json::from_str(r#"["active","turn","skipped","disconnected","unknown","x"]"#)
                .unwrap();
        assert_eq!(
            status,
            vec![
                PlayerStatus::Active,
                PlayerStatus::Turn,
                PlayerStatus::Skipped,
                PlayerStatus::Disconnected,
                PlayerStatus::Unknown,
                PlayerStatus::Unknown,
            ]
        );
    }

    #[test]
    fn turn_patch_keeps_absent_keys_absent() {
        let msg = decode::<RoomMessage>(
            r#"{"type":"turn","message":{"status":["active","turn"],"current":"2024-01-01T00:00:05Z"}}"#,
        )
        .unwrap();
        let RoomMessage::Turn(patch) = msg else {
            panic!("expected turn");
        };
        assert!(patch.members.is_none());
        assert!(patch.start.is_none());
        assert_eq!(patch.status.unwrap().len(), 2);
        assert!(patch.current.is_some());
    }

    #[test]
    fn client_frames_are_bare_objects() {
        let json = serde_json::to_string(&ReadyCheckResponse { accepted: true }).unwrap();
        assert_eq!(json, r#"{"accepted":true}"#);
        let json = serde_json::to_string(&SubmitSentence {
            skip: false,
            content: "Once upon a time.".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"skip":false,"content":"Once upon a time."}"#);
    }

    #[test]
    fn encode_produces_decodable_envelopes() {
        let msg = RoomMessage::Sentence {
            pos: 3,
            sentence: Sentence::player(1, "hi"),
        };
        let text = encode(&msg).unwrap();
        assert!(text.contains(r#""type":"sentence""#));
        assert_eq!(decode::<RoomMessage>(&text).unwrap(), msg);
    }
}
