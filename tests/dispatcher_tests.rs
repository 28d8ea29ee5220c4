#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the dispatcher against mock connections.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    init_tracing, snapshot, test_config, MockConnector, MockFetcher, MockPeer, MockServer, PROMPT,
};
use hakkero_client::validate::ValidationError;
use hakkero_client::{
    ConnectionState, Dispatcher, HakkeroError, MatchStatus, PlayerStatus, RoomPhase, RoomSlot,
    SessionState,
};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

const TOKEN: &str = "abcdefghijklmnopqrstuvwxyzABCDEF";

type TestDispatcher = Dispatcher<MockConnector, MockFetcher>;

fn dispatcher(fetcher: MockFetcher) -> (TestDispatcher, MockServer) {
    init_tracing();
    let (connector, server) = MockConnector::new();
    (Dispatcher::new(test_config(), connector, fetcher), server)
}

async fn settle<P>(dispatcher: &mut TestDispatcher, done: P) -> Arc<SessionState>
where
    P: FnMut(&SessionState) -> bool,
{
    tokio::time::timeout(PROMPT, dispatcher.run_until(done))
        .await
        .expect("state never settled")
}

/// Connect to the queue as `ab` and wait for the channel to open.
async fn queued(dispatcher: &mut TestDispatcher, server: &mut MockServer) -> MockPeer {
    dispatcher.change_username("ab");
    assert_ok!(dispatcher.connect_queue());
    let peer = server.accept().await;
    settle(dispatcher, |s| s.matchmaking.connection.is_connected()).await;
    peer
}

/// Jump into room 7 and wait for the room channel to open.
async fn seated(
    dispatcher: &mut TestDispatcher,
    server: &mut MockServer,
    index: usize,
) -> MockPeer {
    assert_ok!(dispatcher.jump_to_room("7", TOKEN));
    settle(dispatcher, |s| s.room.connection.is_live()).await;
    let peer = server.accept().await;
    settle(dispatcher, |s| s.room.connection.is_connected()).await;
    peer.send_envelope("index", json!({ "index": index }));
    settle(dispatcher, |s| s.room.my_player_index.is_some()).await;
    peer
}

// ── Matchmaking ─────────────────────────────────────────────────────

#[tokio::test]
async fn queue_flow_through_ready_check() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());
    let mut peer = queued(&mut dispatcher, &mut server).await;
    assert_eq!(peer.url, "ws://hakkero.test/queue?username=ab");

    let state = dispatcher.state();
    assert!(matches!(state.matchmaking.match_status, MatchStatus::Found(_)));
    assert_eq!(
        state.matchmaking.console[0].text,
        "You are now connected to the server! Currently in queue..."
    );

    peer.send_envelope("ID", json!({ "ID": TOKEN }));
    peer.send_envelope("size", json!({ "size": 4 }));
    peer.send_envelope("found", json!({}));
    let state = settle(&mut dispatcher, |s| s.matchmaking.awaiting_response()).await;
    assert_eq!(state.player_token, TOKEN);
    assert_eq!(state.matchmaking.queue_size, 4);
    assert!(state
        .matchmaking
        .console
        .iter()
        .any(|line| line.text == format!("Your ID is {TOKEN}")));

    assert_ok!(dispatcher.respond_ready_check(true));
    assert_eq!(peer.next_sent().await, json!({ "accepted": true }));
    assert_eq!(
        dispatcher.state().matchmaking.match_status,
        MatchStatus::Accepted
    );
}

#[tokio::test]
async fn ready_check_requires_connection_and_pending_match() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());
    assert!(matches!(
        dispatcher.respond_ready_check(true),
        Err(HakkeroError::NotConnected)
    ));

    let mut peer = queued(&mut dispatcher, &mut server).await;
    let before = dispatcher.state();
    assert!(matches!(
        dispatcher.respond_ready_check(false),
        Err(HakkeroError::Precondition(_))
    ));
    assert!(peer.nothing_sent());
    assert_eq!(dispatcher.state(), before);
}

#[tokio::test]
async fn announcement_assigns_room_exactly_once_after_delay() {
    let (connector, mut server) = MockConnector::new();
    let config = test_config().with_auto_enter_room(false);
    let mut dispatcher = Dispatcher::new(config, connector, MockFetcher::default());
    dispatcher.change_username("ab");
    assert_ok!(dispatcher.connect_queue());
    let peer = server.accept().await;

    peer.send_envelope(
        "announcement",
        json!({ "success": true, "room": 42, "announcement": "Match found" }),
    );
    let state = settle(&mut dispatcher, |s| {
        s.matchmaking
            .console
            .front()
            .is_some_and(|line| line.text == "Match found")
    })
    .await;
    assert_eq!(state.selected_room, None);
    assert!(dispatcher.assignment_pending());

    let state = settle(&mut dispatcher, |s| s.selected_room.is_some()).await;
    assert_eq!(state.selected_room, Some(42));
    assert!(!dispatcher.assignment_pending());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(dispatcher.process_pending(), 0);
    assert_eq!(dispatcher.state().version, state.version);
    assert!(server.no_connection());
}

#[tokio::test]
async fn later_announcement_supersedes_pending_assignment() {
    let (connector, mut server) = MockConnector::new();
    let config = test_config().with_auto_enter_room(false);
    let mut dispatcher = Dispatcher::new(config, connector, MockFetcher::default());
    dispatcher.change_username("ab");
    assert_ok!(dispatcher.connect_queue());
    let peer = server.accept().await;

    for room in [1, 2] {
        peer.send_envelope(
            "announcement",
            json!({ "success": true, "room": room, "announcement": "Match found" }),
        );
    }
    let state = settle(&mut dispatcher, |s| s.selected_room.is_some()).await;
    assert_eq!(state.selected_room, Some(2));

    tokio::time::sleep(Duration::from_millis(150)).await;
    dispatcher.process_pending();
    assert_eq!(dispatcher.state().selected_room, Some(2));
}

#[tokio::test]
async fn failed_announcement_requeues() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());
    let peer = queued(&mut dispatcher, &mut server).await;

    peer.send_envelope("found", json!({}));
    settle(&mut dispatcher, |s| s.matchmaking.awaiting_response()).await;
    assert_ok!(dispatcher.respond_ready_check(false));

    peer.send_envelope(
        "announcement",
        json!({ "success": false, "announcement": "A player declined." }),
    );
    let state = settle(&mut dispatcher, |s| {
        matches!(s.matchmaking.match_status, MatchStatus::Found(_))
    })
    .await;
    assert_eq!(state.matchmaking.console[0].text, "A player declined.");
    assert!(!dispatcher.assignment_pending());
}

#[tokio::test]
async fn malformed_messages_are_dropped() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());
    let peer = queued(&mut dispatcher, &mut server).await;

    peer.send_text("not json");
    peer.send_envelope("bogus", json!({}));
    peer.send_envelope("size", json!({ "size": "many" }));
    peer.send_envelope("size", json!({ "size": 3 }));

    let state = settle(&mut dispatcher, |s| s.matchmaking.queue_size == 3).await;
    assert!(state.matchmaking.connection.is_connected());
}

#[tokio::test]
async fn server_close_returns_to_unconnected() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());
    let peer = queued(&mut dispatcher, &mut server).await;

    peer.hang_up();
    let state = settle(&mut dispatcher, |s| !s.matchmaking.connection.is_live()).await;
    assert_eq!(state.matchmaking.connection, ConnectionState::Unconnected);
    assert_eq!(state.matchmaking.match_status, MatchStatus::Idle);
    assert_eq!(
        state.matchmaking.console[0].text,
        "You have been disconnected from queue."
    );

    assert_ok!(dispatcher.connect_queue());
    server.accept().await;
}

// ── Validation and channel policy ───────────────────────────────────

#[tokio::test]
async fn connect_intent_is_validated() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());

    let err = dispatcher.connect_queue().unwrap_err();
    assert!(matches!(
        err,
        HakkeroError::Validation(ValidationError::EmptyUsername)
    ));
    dispatcher.change_username(&"x".repeat(21));
    assert_err!(dispatcher.connect_queue());
    assert!(server.no_connection());

    dispatcher.change_username("ab");
    assert_ok!(dispatcher.connect_queue());
    server.accept().await;
}

#[tokio::test]
async fn jump_to_room_is_validated() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::with_room(snapshot(7)));

    assert!(matches!(
        dispatcher.jump_to_room("seven", ""),
        Err(HakkeroError::Validation(ValidationError::InvalidRoomId(_)))
    ));
    assert!(matches!(
        dispatcher.jump_to_room("7", "short"),
        Err(HakkeroError::Validation(
            ValidationError::InvalidPlayerToken
        ))
    ));
    assert_eq!(dispatcher.state().version, 0);

    assert_ok!(dispatcher.jump_to_room("7", ""));
    settle(&mut dispatcher, |s| s.room.connection.is_live()).await;
    let peer = server.accept().await;
    assert_eq!(peer.url, "ws://hakkero.test/rooms/7?player=");
}

#[tokio::test]
async fn only_one_channel_per_stage() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());
    let _peer = queued(&mut dispatcher, &mut server).await;

    assert!(matches!(
        dispatcher.connect_queue(),
        Err(HakkeroError::ChannelBusy("queue"))
    ));
    assert!(matches!(
        dispatcher.jump_to_room("7", ""),
        Err(HakkeroError::ChannelBusy("queue"))
    ));
    assert!(server.no_connection());
}

#[tokio::test]
async fn channel_failure_is_terminal_until_reset() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());
    server.refuse_connections();
    dispatcher.change_username("ab");
    assert_ok!(dispatcher.connect_queue());

    let state = settle(&mut dispatcher, |s| s.matchmaking.connection.is_failed()).await;
    assert!(state.matchmaking.console[0]
        .text
        .starts_with("An error has occurred: "));
    assert!(matches!(
        dispatcher.connect_queue(),
        Err(HakkeroError::Precondition(_))
    ));

    dispatcher.reset();
    assert_eq!(
        dispatcher.state().matchmaking.connection,
        ConnectionState::Unconnected
    );
    assert_ok!(dispatcher.connect_queue());
}

// ── Room ────────────────────────────────────────────────────────────

#[tokio::test]
async fn automatic_hand_off_from_queue_to_room() {
    let fetcher = MockFetcher::with_room(snapshot(42));
    let (mut dispatcher, mut server) = dispatcher(fetcher.clone());
    let queue = queued(&mut dispatcher, &mut server).await;

    queue.send_envelope("ID", json!({ "ID": TOKEN }));
    queue.send_envelope(
        "announcement",
        json!({ "success": true, "room": 42, "announcement": "Match found" }),
    );

    settle(&mut dispatcher, |s| s.room.connection.is_live()).await;
    let room = server.accept().await;
    assert_eq!(room.url, format!("ws://hakkero.test/rooms/42?player={TOKEN}"));
    assert_eq!(fetcher.requests(), vec!["http://hakkero.test/rooms/42"]);

    let state = settle(&mut dispatcher, |s| {
        s.room.connection.is_connected()
            && s.matchmaking.connection == ConnectionState::Unconnected
    })
    .await;
    assert!(queue.client_closed());
    assert_eq!(state.selected_room, Some(42));
    assert_eq!(state.room.phase(), RoomPhase::Active);
    assert_eq!(
        state.room.loaded().unwrap().timeout,
        Duration::from_secs(30)
    );
}

#[tokio::test]
async fn manual_room_connect_closes_the_queue_first() {
    init_tracing();
    let (connector, mut server) = MockConnector::new();
    let config = test_config().with_auto_enter_room(false);
    let mut dispatcher =
        Dispatcher::new(config, connector, MockFetcher::with_room(snapshot(42)));
    let queue = queued(&mut dispatcher, &mut server).await;

    queue.send_envelope("ID", json!({ "ID": TOKEN }));
    queue.send_envelope(
        "announcement",
        json!({ "success": true, "room": 42, "announcement": "Match found" }),
    );
    settle(&mut dispatcher, |s| s.selected_room == Some(42)).await;
    assert_ok!(dispatcher.load_room());
    let state = settle(&mut dispatcher, |s| s.room.loaded().is_some()).await;
    assert!(state.matchmaking.connection.is_connected());
    assert!(server.no_connection());

    assert_ok!(dispatcher.connect_room());
    let state = dispatcher.state();
    assert_eq!(state.matchmaking.connection, ConnectionState::Unconnected);
    assert_eq!(state.matchmaking.match_status, MatchStatus::Idle);
    assert_eq!(state.room.connection, ConnectionState::Connecting);

    let room = server.accept().await;
    assert_eq!(room.url, format!("ws://hakkero.test/rooms/42?player={TOKEN}"));
    queue.wait_closed().await;
    let state = settle(&mut dispatcher, |s| s.room.connection.is_connected()).await;
    assert_eq!(state.matchmaking.connection, ConnectionState::Unconnected);
}

#[tokio::test]
async fn queue_that_never_finishes_closing_does_not_block_requeue() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::with_room(snapshot(42)));
    server.stall_closes();
    let queue = queued(&mut dispatcher, &mut server).await;

    queue.send_envelope("ID", json!({ "ID": TOKEN }));
    queue.send_envelope(
        "announcement",
        json!({ "success": true, "room": 42, "announcement": "Match found" }),
    );
    settle(&mut dispatcher, |s| s.room.connection.is_live()).await;
    let room = server.accept().await;
    let state = settle(&mut dispatcher, |s| s.room.connection.is_connected()).await;
    assert_eq!(state.matchmaking.connection, ConnectionState::Unconnected);

    // The stalled queue loop is aborted after the shutdown timeout.
    tokio::time::sleep(Duration::from_millis(300)).await;
    dispatcher.process_pending();
    let state = dispatcher.state();
    assert_eq!(state.matchmaking.connection, ConnectionState::Unconnected);
    let disconnects = state
        .matchmaking
        .console
        .iter()
        .filter(|line| line.text == "You have been disconnected from queue.")
        .count();
    assert_eq!(disconnects, 1);

    room.hang_up();
    settle(&mut dispatcher, |s| !s.room.connection.is_live()).await;
    assert_ok!(dispatcher.connect_queue());
    let requeued = server.accept().await;
    assert_eq!(requeued.url, "ws://hakkero.test/queue?username=ab");
}

#[tokio::test]
async fn play_a_turn() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::with_room(snapshot(7)));
    let mut peer = seated(&mut dispatcher, &mut server, 0).await;
    assert!(dispatcher.state().room.is_my_turn());

    assert!(matches!(
        dispatcher.submit(false),
        Err(HakkeroError::Precondition(_))
    ));

    dispatcher.change_draft("The wind howled.");
    assert_ok!(dispatcher.submit(false));
    assert_eq!(
        peer.next_sent().await,
        json!({ "skip": false, "content": "The wind howled." })
    );
    assert!(dispatcher.state().room.draft_sentence.is_empty());

    peer.send_envelope(
        "sentence",
        json!({ "pos": 1, "sentence": { "content": "The wind howled.", "owner": 0, "system": false } }),
    );
    peer.send_envelope(
        "turn",
        json!({ "status": ["active", "turn"], "current": "2023-11-14T22:14:00Z" }),
    );
    let state = settle(&mut dispatcher, |s| !s.room.is_my_turn()).await;
    let room = state.room.loaded().unwrap();
    assert_eq!(room.sentences.len(), 2);
    assert_eq!(room.author_of(&room.sentences[1]), Some("alice"));
    assert_eq!(room.members, vec!["alice", "bob"]);
    assert_eq!(room.status, vec![PlayerStatus::Active, PlayerStatus::Turn]);

    peer.send_envelope("end", json!({ "Winner": 0 }));
    let state = settle(&mut dispatcher, |s| s.room.ended.is_some()).await;
    assert_eq!(state.room.phase(), RoomPhase::Ended);
    assert_eq!(
        state.room.display_status(0),
        Some(hakkero_client::DisplayStatus::Winner)
    );
}

#[tokio::test]
async fn skip_sends_even_with_empty_draft() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::with_room(snapshot(7)));
    let mut peer = seated(&mut dispatcher, &mut server, 0).await;

    assert_ok!(dispatcher.submit(true));
    assert_eq!(peer.next_sent().await, json!({ "skip": true, "content": "" }));
}

#[tokio::test]
async fn submit_out_of_turn_is_rejected_without_side_effects() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::with_room(snapshot(7)));
    let mut peer = seated(&mut dispatcher, &mut server, 1).await;
    dispatcher.change_draft("Not yet.");
    let before = dispatcher.state();

    assert!(matches!(
        dispatcher.submit(false),
        Err(HakkeroError::Precondition(_))
    ));
    assert!(matches!(
        dispatcher.submit(true),
        Err(HakkeroError::Precondition(_))
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(peer.nothing_sent());
    assert_eq!(dispatcher.state(), before);
}

#[tokio::test]
async fn submit_without_room_channel_is_rejected() {
    let (mut dispatcher, _server) = dispatcher(MockFetcher::default());
    assert!(matches!(
        dispatcher.submit(true),
        Err(HakkeroError::NotConnected)
    ));
}

#[tokio::test]
async fn room_fetch_failure_is_stored_as_the_room() {
    let fetcher = MockFetcher::default();
    fetcher.set_room(Err("404 Not Found".into()));
    let (mut dispatcher, mut server) = dispatcher(fetcher);

    assert_ok!(dispatcher.jump_to_room("9", ""));
    let state = settle(&mut dispatcher, |s| s.room.phase() == RoomPhase::Failed).await;
    assert!(matches!(state.room.room, RoomSlot::Failed(ref e) if e.contains("404")));
    assert!(server.no_connection());
    assert!(matches!(
        dispatcher.connect_room(),
        Err(HakkeroError::Precondition(_))
    ));
}

#[tokio::test]
async fn room_channel_error_fails_the_room() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::with_room(snapshot(7)));
    let peer = seated(&mut dispatcher, &mut server, 0).await;

    peer.fail("connection reset");
    let state = settle(&mut dispatcher, |s| s.room.connection.is_failed()).await;
    assert_eq!(state.room.phase(), RoomPhase::Failed);
    assert!(matches!(
        dispatcher.submit(true),
        Err(HakkeroError::NotConnected)
    ));
}

// ── Reset and stale results ─────────────────────────────────────────

#[tokio::test]
async fn reset_cancels_the_pending_assignment() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::with_room(snapshot(42)));
    let queue = queued(&mut dispatcher, &mut server).await;

    queue.send_envelope(
        "announcement",
        json!({ "success": true, "room": 42, "announcement": "Match found" }),
    );
    settle(&mut dispatcher, |s| s.matchmaking.console.len() == 2).await;
    assert!(dispatcher.assignment_pending());

    dispatcher.reset();
    tokio::time::sleep(Duration::from_millis(150)).await;
    dispatcher.process_pending();

    let state = dispatcher.state();
    assert_eq!(state.epoch, 1);
    assert_eq!(state.username, "ab");
    assert_eq!(state.selected_room, None);
    assert_eq!(state.matchmaking.connection, ConnectionState::Unconnected);
    assert!(state.matchmaking.console.is_empty());
    assert!(queue.client_closed());
    assert!(server.no_connection());
}

#[tokio::test]
async fn stale_fetch_after_reset_is_ignored() {
    let fetcher = MockFetcher::with_room(snapshot(7));
    fetcher.set_delay(Duration::from_millis(50));
    let (mut dispatcher, mut server) = dispatcher(fetcher);

    assert_ok!(dispatcher.jump_to_room("7", TOKEN));
    dispatcher.reset();
    tokio::time::sleep(Duration::from_millis(150)).await;
    dispatcher.process_pending();

    let state = dispatcher.state();
    assert_eq!(state.room.room, RoomSlot::Loading);
    assert!(state.player_token.is_empty());
    assert!(server.no_connection());
}

#[tokio::test]
async fn reset_closes_the_room_and_ignores_its_close() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::with_room(snapshot(7)));
    let peer = seated(&mut dispatcher, &mut server, 0).await;

    dispatcher.reset();
    let after_reset = dispatcher.state();
    tokio::time::sleep(Duration::from_millis(100)).await;
    dispatcher.process_pending();

    assert!(peer.client_closed());
    assert_eq!(dispatcher.state(), after_reset);
    assert_eq!(after_reset.room.phase(), RoomPhase::Loading);
    assert_eq!(after_reset.room.my_player_index, None);
}

// ── Welcome and subscription ────────────────────────────────────────

#[tokio::test]
async fn welcome_line_reaches_the_console() {
    let fetcher = MockFetcher::default();
    fetcher.set_welcome("Welcome to Hakkero!");
    let (mut dispatcher, _server) = dispatcher(fetcher.clone());

    assert_ok!(dispatcher.welcome());
    let state = settle(&mut dispatcher, |s| !s.matchmaking.console.is_empty()).await;
    assert_eq!(state.matchmaking.console[0].text, "Welcome to Hakkero!");
    assert_eq!(fetcher.requests(), vec!["http://hakkero.test/"]);
}

#[tokio::test]
async fn subscribers_see_each_new_state() {
    let (mut dispatcher, _server) = dispatcher(MockFetcher::default());
    let mut rx = dispatcher.subscribe();

    dispatcher.change_username("ab");
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().username, "ab");

    dispatcher.change_username("ab");
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn shutdown_closes_live_channels() {
    let (mut dispatcher, mut server) = dispatcher(MockFetcher::default());
    let peer = queued(&mut dispatcher, &mut server).await;

    dispatcher.shutdown().await;
    assert!(peer.client_closed());
}
