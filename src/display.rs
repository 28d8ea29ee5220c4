//! Presentational clocks.
//!
//! The queue-wait clock and the turn countdown are derived from the session
//! state and wall-clock time; they never feed back into the store. A
//! [`DisplayTicker`] publishes "now" on a fixed period for views that redraw
//! them, and stops when the view drops it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::config::HakkeroConfig;
use crate::matchmaking::MatchStatus;
use crate::room::RoomState;

/// Time spent in the queue so far, while a match is being searched for.
pub fn queue_wait(status: &MatchStatus, now: DateTime<Utc>) -> Option<Duration> {
    match status {
        MatchStatus::Found(since) => Some(elapsed(*since, now)),
        _ => None,
    }
}

/// What the turn clock should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnCountdown {
    /// No room loaded yet.
    NotLoaded,
    /// The first turn has not started.
    StartingSoon,
    /// Time left in the active turn.
    Remaining(Duration),
    /// The active turn is over; waiting for the server to move on.
    Expired,
    /// The game is over.
    Ended,
}

/// The turn clock for `room` at `now`.
pub fn turn_countdown(room: &RoomState, now: DateTime<Utc>) -> TurnCountdown {
    if room.ended.is_some() {
        return TurnCountdown::Ended;
    }
    let Some(loaded) = room.loaded() else {
        return TurnCountdown::NotLoaded;
    };
    if loaded.current < loaded.start {
        return TurnCountdown::StartingSoon;
    }
    let deadline = loaded.turn_deadline();
    if deadline >= now {
        TurnCountdown::Remaining(elapsed(now, deadline))
    } else {
        TurnCountdown::Expired
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

// ── Ticker ──────────────────────────────────────────────────────────

/// A cancellable periodic clock.
///
/// Publishes the current time every `period` on a `watch` channel. The task
/// stops on [`stop`](Self::stop) or when the ticker is dropped.
pub struct DisplayTicker {
    now: watch::Receiver<DateTime<Utc>>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl DisplayTicker {
    /// Start ticking. Must be called inside a Tokio runtime.
    ///
    /// A zero period is raised to one millisecond.
    pub fn start(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let (now_tx, now) = watch::channel(Utc::now());
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticks.tick() => {
                        if now_tx.send(Utc::now()).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(?period, "display ticker stopped");
        });

        Self {
            now,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// The queue-wait clock at the configured interval.
    pub fn queue_clock(config: &HakkeroConfig) -> Self {
        Self::start(config.queue_clock_interval)
    }

    /// The turn countdown clock at the configured interval.
    pub fn turn_clock(config: &HakkeroConfig) -> Self {
        Self::start(config.turn_clock_interval)
    }

    /// The most recent tick.
    pub fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    /// A receiver that wakes on every tick.
    pub fn subscribe(&self) -> watch::Receiver<DateTime<Utc>> {
        self.now.clone()
    }

    /// Returns `true` until [`stop`](Self::stop) is called.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop ticking. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DisplayTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DisplayTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayTicker")
            .field("now", &self.now())
            .field("running", &self.is_running())
            .finish()
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
    use crate::event::RoomEvent;
    use crate::protocol::{PlayerStatus, RoomSnapshot, Sentence};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn room(start: i64, current: i64) -> RoomState {
        let mut state = RoomState::default();
        state.reduce(RoomEvent::Loaded(
            RoomSnapshot {
                id: 1,
                members: vec!["a".into()],
                status: vec![PlayerStatus::Turn],
                sentences: vec![Sentence::system("prompt")],
                start: t(start),
                current: t(current),
                timeout: 10_000_000_000,
            }
            .try_into()
            .unwrap(),
        ));
        state
    }

    #[test]
    fn queue_wait_only_while_searching() {
        assert_eq!(
            queue_wait(&MatchStatus::Found(t(0)), t(65)),
            Some(Duration::from_secs(65))
        );
        assert_eq!(queue_wait(&MatchStatus::Pending, t(65)), None);
        assert_eq!(
            queue_wait(&MatchStatus::Found(t(10)), t(0)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn countdown_states() {
        assert_eq!(
            turn_countdown(&RoomState::default(), t(0)),
            TurnCountdown::NotLoaded
        );
        assert_eq!(turn_countdown(&room(5, 0), t(0)), TurnCountdown::StartingSoon);
        assert_eq!(
            turn_countdown(&room(0, 0), t(4)),
            TurnCountdown::Remaining(Duration::from_secs(6))
        );
        assert_eq!(turn_countdown(&room(0, 0), t(11)), TurnCountdown::Expired);

        let mut ended = room(0, 0);
        ended.ended = Some(0);
        assert_eq!(turn_countdown(&ended, t(4)), TurnCountdown::Ended);
    }

    #[tokio::test]
    async fn ticker_publishes_and_stops() {
        let mut ticker = DisplayTicker::start(Duration::from_millis(10));
        let mut rx = ticker.subscribe();
        let first = ticker.now();

        rx.changed().await.unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow() >= first);
        assert!(ticker.is_running());

        ticker.stop();
        assert!(!ticker.is_running());
        ticker.stop();
    }
}
