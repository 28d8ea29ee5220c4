#![no_main]

use hakkero_client::protocol::{decode, QueueMessage};
use hakkero_client::{apply, Event, QueueEvent, SessionState};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Decoding must never panic, and neither may applying whatever decodes.
    if let Ok(message) = decode::<QueueMessage>(text) {
        let state = apply(&SessionState::default(), Event::Queue(QueueEvent::Connecting));
        let _ = apply(
            &state,
            Event::Queue(QueueEvent::Message {
                message,
                at: chrono::DateTime::UNIX_EPOCH,
            }),
        );
    }
});
