//! # Scripted Session Example
//!
//! Runs a whole game against an in-process scripted server, no network
//! needed. Shows how to plug a custom [`Connector`] and [`Fetcher`] into the
//! [`Dispatcher`]:
//!
//! 1. Join the queue, get an ID and a ready-check
//! 2. Accept; the server announces room 7
//! 3. The dispatcher fetches room 7 and opens its connection
//! 4. Write one sentence; the server ends the game
//!
//! ## Running
//!
//! ```sh
//! cargo run --example scripted_session
//! RUST_LOG=hakkero_client=debug cargo run --example scripted_session
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hakkero_client::protocol::RoomSnapshot;
use hakkero_client::{
    Connector, Dispatcher, Fetcher, HakkeroConfig, HakkeroError, PlayerStatus, RoomPhase,
    Sentence, Transport,
};
use serde_json::{json, Value};

// ── Scripted server ─────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Stage {
    Queue,
    Room,
}

/// One scripted connection: frames queued for the client, plus reactions
/// to what the client sends.
struct ScriptedTransport {
    stage: Stage,
    pending: VecDeque<String>,
    sentences: usize,
}

fn envelope(kind: &str, message: Value) -> String {
    json!({ "type": kind, "message": message }).to_string()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, message: String) -> Result<(), HakkeroError> {
        let frame: Value = serde_json::from_str(&message)?;
        match self.stage {
            Stage::Queue if frame.get("accepted") == Some(&json!(true)) => {
                self.pending.push_back(envelope(
                    "announcement",
                    json!({
                        "success": true,
                        "room": 7,
                        "announcement": "Match found! Entering room 7.",
                    }),
                ));
            }
            Stage::Queue => {}
            Stage::Room => {
                let content = frame
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.sentences += 1;
                self.pending.push_back(envelope(
                    "sentence",
                    json!({
                        "pos": self.sentences,
                        "sentence": { "content": content, "owner": 0, "system": false },
                    }),
                ));
                self.pending.push_back(envelope("end", json!({ "Winner": 0 })));
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, HakkeroError>> {
        match self.pending.pop_front() {
            Some(frame) => Some(Ok(frame)),
            // Nothing scripted until the client speaks again.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), HakkeroError> {
        Ok(())
    }
}

struct ScriptedConnector;

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(&self, url: &str) -> Result<ScriptedTransport, HakkeroError> {
        tracing::info!("scripted server accepted {url}");
        let (stage, pending) = if url.contains("/queue") {
            (
                Stage::Queue,
                vec![
                    envelope("ID", json!({ "ID": "abcdefghijklmnopqrstuvwxyzABCDEF" })),
                    envelope("size", json!({ "size": 2 })),
                    envelope("found", json!({})),
                ],
            )
        } else {
            (
                Stage::Room,
                vec![
                    envelope("index", json!({ "index": 0 })),
                    envelope(
                        "turn",
                        json!({ "status": ["turn", "active"], "current": Utc::now() }),
                    ),
                ],
            )
        };
        Ok(ScriptedTransport {
            stage,
            pending: pending.into(),
            sentences: 0,
        })
    }
}

struct ScriptedFetcher;

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch_room(&self, _url: &str) -> Result<RoomSnapshot, HakkeroError> {
        Ok(RoomSnapshot {
            id: 7,
            members: vec!["you".into(), "bot".into()],
            status: vec![PlayerStatus::Active, PlayerStatus::Active],
            sentences: vec![Sentence::system("Write about a lighthouse keeper.")],
            start: Utc::now(),
            current: Utc::now(),
            timeout: 30_000_000_000,
        })
    }

    async fn fetch_welcome(&self, _url: &str) -> Result<String, HakkeroError> {
        Ok("Welcome to Hakkero!".to_string())
    }
}

// ── Client ──────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = HakkeroConfig::new("http://scripted.local")?
        .with_announcement_delay(Duration::from_millis(300));
    let mut dispatcher = Dispatcher::new(config, ScriptedConnector, ScriptedFetcher);

    dispatcher.welcome()?;
    dispatcher.change_username("you");
    dispatcher.connect_queue()?;

    let mut printed = 0;
    let mut submitted = false;
    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let state = dispatcher.step().await;

            let console = &state.matchmaking.console;
            for line in console.iter().take(console.len().saturating_sub(printed)).rev() {
                println!("{line}");
            }
            printed = console.len();

            if state.matchmaking.awaiting_response() {
                dispatcher.respond_ready_check(true)?;
            }
            if state.room.is_my_turn() && !submitted {
                dispatcher.change_draft("The lamp flickered once, then held.");
                dispatcher.submit(false)?;
                submitted = true;
                println!("> submitted a sentence");
            }
            if state.room.phase() == RoomPhase::Ended {
                return Ok::<_, HakkeroError>(state);
            }
        }
    })
    .await;

    match finished {
        Ok(Ok(state)) => {
            if let Some(room) = state.room.loaded() {
                println!("\nThe story of room {}:", room.id);
                for sentence in &room.sentences {
                    let author = room.author_of(sentence).unwrap_or("system");
                    println!("  [{author}] {}", sentence.content);
                }
            }
        }
        Ok(Err(e)) => tracing::error!("session failed: {e}"),
        Err(_) => tracing::error!("session did not finish in time"),
    }

    dispatcher.shutdown().await;
    Ok(())
}
