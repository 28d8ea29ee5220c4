#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Hakkero client integration tests.
//!
//! Provides a channel-backed [`MockConnector`] whose connections are handed
//! to the test as [`MockPeer`]s, a scripted [`MockFetcher`], and helpers for
//! building server envelopes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hakkero_client::protocol::RoomSnapshot;
use hakkero_client::{
    Connector, Fetcher, HakkeroConfig, HakkeroError, PlayerStatus, Sentence, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// How long a test waits for something that should happen promptly.
pub const PROMPT: Duration = Duration::from_secs(2);

// ── MockTransport ───────────────────────────────────────────────────

type Feed = Option<Result<String, HakkeroError>>;

/// The client side of one mock connection.
///
/// `recv` yields whatever the paired [`MockPeer`] pushes; a pushed `None`, or
/// dropping the peer, closes the connection cleanly.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Feed>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
    stall_close: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), HakkeroError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HakkeroError::TransportClosed);
        }
        self.outgoing
            .send(message)
            .map_err(|e| HakkeroError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, HakkeroError>> {
        self.incoming.recv().await.flatten()
    }

    async fn close(&mut self) -> Result<(), HakkeroError> {
        self.closed.store(true, Ordering::Release);
        if self.stall_close {
            // The close handshake never completes.
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// The server side of one mock connection.
pub struct MockPeer {
    /// The URL the client connected to.
    pub url: String,
    to_client: mpsc::UnboundedSender<Feed>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    /// Push one raw text frame.
    pub fn send_text(&self, text: &str) {
        self.to_client.send(Some(Ok(text.to_string()))).unwrap();
    }

    /// Push one `{type, message}` envelope.
    pub fn send_envelope(&self, kind: &str, message: Value) {
        self.send_text(&json!({ "type": kind, "message": message }).to_string());
    }

    /// Close the connection from the server side.
    pub fn hang_up(&self) {
        let _ = self.to_client.send(None);
    }

    /// Fail the connection with a receive error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .send(Some(Err(HakkeroError::TransportReceive(reason.to_string()))));
    }

    /// The next frame the client sent, parsed as JSON.
    pub async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(PROMPT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client transport dropped");
        serde_json::from_str(&text).unwrap()
    }

    /// Returns `true` if the client sent nothing that has not been read yet.
    pub fn nothing_sent(&mut self) -> bool {
        self.from_client.try_recv().is_err()
    }

    /// Returns `true` once the client closed the transport.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// A [`Connector`] that hands each new connection to the test.
pub struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse: Arc<AtomicBool>,
    stall_close: Arc<AtomicBool>,
}

/// The test's end of a [`MockConnector`].
pub struct MockServer {
    peers: mpsc::UnboundedReceiver<MockPeer>,
    refuse: Arc<AtomicBool>,
    stall_close: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> (Self, MockServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicBool::new(false));
        let stall_close = Arc::new(AtomicBool::new(false));
        (
            Self {
                peers: tx,
                refuse: Arc::clone(&refuse),
                stall_close: Arc::clone(&stall_close),
            },
            MockServer {
                peers: rx,
                refuse,
                stall_close,
            },
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, url: &str) -> Result<MockTransport, HakkeroError> {
        if self.refuse.load(Ordering::Acquire) {
            return Err(HakkeroError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let peer = MockPeer {
            url: url.to_string(),
            to_client,
            from_client,
            closed: Arc::clone(&closed),
        };
        self.peers
            .send(peer)
            .map_err(|_| HakkeroError::Io(std::io::Error::other("mock server dropped")))?;
        Ok(MockTransport {
            incoming,
            outgoing,
            closed,
            stall_close: self.stall_close.load(Ordering::Acquire),
        })
    }
}

impl MockServer {
    /// Wait for the client's next connection.
    pub async fn accept(&mut self) -> MockPeer {
        tokio::time::timeout(PROMPT, self.peers.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Returns `true` if the client opened no connection that has not been
    /// accepted yet.
    pub fn no_connection(&mut self) -> bool {
        self.peers.try_recv().is_err()
    }

    /// Make every following connect attempt fail.
    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::Release);
    }

    /// Make the close handshake of every following connection hang.
    pub fn stall_closes(&self) {
        self.stall_close.store(true, Ordering::Release);
    }
}

impl MockPeer {
    /// Wait until the client closed the transport.
    pub async fn wait_closed(&self) {
        tokio::time::timeout(PROMPT, async {
            while !self.client_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client never closed the connection");
    }
}

// ── MockFetcher ─────────────────────────────────────────────────────

/// A [`Fetcher`] answering from a script.
#[derive(Clone, Default)]
pub struct MockFetcher {
    room: Arc<StdMutex<Option<Result<RoomSnapshot, String>>>>,
    welcome: Arc<StdMutex<Option<String>>>,
    delay: Arc<StdMutex<Duration>>,
    requests: Arc<StdMutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn with_room(snapshot: RoomSnapshot) -> Self {
        let fetcher = Self::default();
        fetcher.set_room(Ok(snapshot));
        fetcher
    }

    pub fn set_room(&self, room: Result<RoomSnapshot, String>) {
        *self.room.lock().unwrap() = Some(room);
    }

    pub fn set_welcome(&self, text: &str) {
        *self.welcome.lock().unwrap() = Some(text.to_string());
    }

    /// Hold every response back for `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Every URL requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    async fn wait(&self, url: &str) {
        self.requests.lock().unwrap().push(url.to_string());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch_room(&self, url: &str) -> Result<RoomSnapshot, HakkeroError> {
        self.wait(url).await;
        let scripted = self.room.lock().unwrap().clone();
        match scripted {
            Some(Ok(snapshot)) => Ok(snapshot),
            Some(Err(reason)) => Err(HakkeroError::Fetch(reason)),
            None => Err(HakkeroError::Fetch("404 Not Found".into())),
        }
    }

    async fn fetch_welcome(&self, url: &str) -> Result<String, HakkeroError> {
        self.wait(url).await;
        let scripted = self.welcome.lock().unwrap().clone();
        scripted.ok_or_else(|| HakkeroError::Fetch("500 Internal Server Error".into()))
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A two-player room where player 0 holds the turn.
pub fn snapshot(id: u64) -> RoomSnapshot {
    RoomSnapshot {
        id,
        members: vec!["alice".into(), "bob".into()],
        status: vec![PlayerStatus::Turn, PlayerStatus::Active],
        sentences: vec![Sentence::system("It was a dark and stormy night.")],
        start: at(0),
        current: at(5),
        timeout: 30_000_000_000,
    }
}

/// Configuration with a short announcement delay so tests stay fast.
pub fn test_config() -> HakkeroConfig {
    HakkeroConfig::new("http://hakkero.test")
        .unwrap()
        .with_announcement_delay(Duration::from_millis(50))
        .with_shutdown_timeout(Duration::from_millis(200))
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
