#![no_main]

use hakkero_client::protocol::{decode, RoomMessage, RoomSnapshot, Sentence};
use hakkero_client::{apply, Event, PlayerStatus, Room, RoomEvent, SessionState};
use libfuzzer_sys::fuzz_target;

fn loaded() -> Option<SessionState> {
    let room = Room::try_from(RoomSnapshot {
        id: 1,
        members: vec!["a".into(), "b".into()],
        status: vec![PlayerStatus::Turn, PlayerStatus::Active],
        sentences: vec![Sentence::system("prompt")],
        start: chrono::DateTime::UNIX_EPOCH,
        current: chrono::DateTime::UNIX_EPOCH,
        timeout: u64::MAX,
    })
    .ok()?;
    Some(apply(&SessionState::default(), Event::Room(RoomEvent::Loaded(room))))
}

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Decoding must never panic, and neither may merging the result into a room.
    if let (Ok(message), Some(state)) = (decode::<RoomMessage>(text), loaded()) {
        let _ = apply(&state, Event::Room(RoomEvent::Message(message)));
    }
});
