//! # Queue and Play Example
//!
//! Plays one game against a real Hakkero server:
//!
//! 1. Fetch the welcome line
//! 2. Join the queue and accept the ready-check
//! 3. Follow the automatic hand-off into the assigned room
//! 4. Write a sentence on every turn until the game ends
//! 5. Shut down gracefully on Ctrl+C or game end
//!
//! ## Running
//!
//! ```sh
//! # Start a Hakkero server on localhost:8080, then:
//! cargo run --example queue_and_play
//!
//! # Override the server URL or username:
//! HAKKERO_URL=https://hakkero.example HAKKERO_USERNAME=alice cargo run --example queue_and_play
//! ```

use hakkero_client::{
    queue_wait, turn_countdown, Dispatcher, DisplayTicker, HakkeroConfig, RoomPhase, TurnCountdown,
};

/// Default server URL when `HAKKERO_URL` is not set.
const DEFAULT_URL: &str = "http://localhost:8080";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("HAKKERO_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let username = std::env::var("HAKKERO_USERNAME").unwrap_or_else(|_| "rustacean".to_string());
    let config = HakkeroConfig::new(&url)?;
    tracing::info!("Playing on {url} as {username}");

    let mut clock = DisplayTicker::queue_clock(&config);
    let mut ticks = clock.subscribe();
    let mut dispatcher = Dispatcher::with_defaults(config)?;

    // ── Connect ─────────────────────────────────────────────────────
    dispatcher.welcome()?;
    dispatcher.change_username(&username);
    dispatcher.connect_queue()?;

    let mut printed = 0;
    let mut turns_written = 0;
    // The turn we last wrote for, keyed by its start time.
    let mut written_turn = None;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            state = dispatcher.step() => {
                // The console is most-recent-first; print what is new.
                let console = &state.matchmaking.console;
                for line in console.iter().take(console.len().saturating_sub(printed)).rev() {
                    println!("{line}");
                }
                printed = console.len();

                if state.matchmaking.awaiting_response() {
                    dispatcher.respond_ready_check(true)?;
                }

                match state.room.phase() {
                    RoomPhase::Active if state.room.is_my_turn() => {
                        let turn = state.room.loaded().map(|room| room.current);
                        if turn == written_turn {
                            continue;
                        }
                        written_turn = turn;
                        turns_written += 1;
                        dispatcher
                            .change_draft(&format!("{username} adds line number {turns_written}."));
                        dispatcher.submit(false)?;
                    }
                    RoomPhase::Ended => {
                        let winner = state
                            .room
                            .ended
                            .and_then(|i| state.room.loaded()?.members.get(i).cloned());
                        println!("Game over! Winner: {}", winner.unwrap_or_default());
                        break;
                    }
                    RoomPhase::Failed => {
                        tracing::error!(
                            "Room failed: {:?} / {:?}",
                            state.room.room,
                            state.room.connection
                        );
                        break;
                    }
                    _ => {}
                }
            }

            _ = ticks.changed() => {
                let state = dispatcher.state();
                let now = *ticks.borrow_and_update();
                if let Some(waited) = queue_wait(&state.matchmaking.match_status, now) {
                    tracing::info!(
                        "In queue for {}s ({} queued)",
                        waited.as_secs(),
                        state.matchmaking.queue_size
                    );
                }
                if let TurnCountdown::Remaining(left) = turn_countdown(&state.room, now) {
                    tracing::info!("{}s left in this turn", left.as_secs());
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    clock.stop();
    dispatcher.shutdown().await;
    tracing::info!("Example finished");
    Ok(())
}
