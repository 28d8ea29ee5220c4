//! The connection channel: one live server connection driven in the background.
//!
//! [`Channel::open`] spawns a loop task that connects through a
//! [`Connector`], then multiplexes outgoing frames, a shutdown signal and
//! incoming frames via `tokio::select!`. Its only output is a stream of
//! [`ChannelEvent`]s, delivered in order on an unbounded channel supplied by
//! the caller. The channel knows nothing about the game protocol.
//!
//! # Example
//!
//! ```rust,ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let channel = Channel::open(connector, url, tx, |event| event);
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         ChannelEvent::Opened => channel.send(r#"{"accepted":true}"#.into())?,
//!         ChannelEvent::Message(text) => { /* decode */ }
//!         ChannelEvent::Errored(_) | ChannelEvent::Closed => break,
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{HakkeroError, Result};
use crate::transport::{Connector, Transport};

/// Lifecycle and data events emitted by a [`Channel`].
///
/// A channel emits at most one `Opened`, then any number of `Message`s, and
/// ends with exactly one of `Errored` or `Closed`. A failed connect emits
/// only `Errored`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The connection is established; `send` now works.
    Opened,
    /// One text frame from the server.
    Message(String),
    /// The connection failed. Terminal.
    Errored(String),
    /// The connection closed cleanly, from either side. Terminal.
    Closed,
}

/// How the session store sees a channel.
///
/// `Failed` is distinct from `Unconnected` and is terminal for that
/// connection: only a reset clears it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No channel, or the last one closed cleanly.
    #[default]
    Unconnected,
    /// A connect intent was issued; waiting for `Opened`.
    Connecting,
    /// The channel is open.
    Connected,
    /// The channel failed with the given error.
    Failed(String),
}

impl ConnectionState {
    /// Returns `true` when the channel is open.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while connecting or connected.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Returns `true` after a channel failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Apply a clean close: back to `Unconnected`, unless already `Failed`.
    pub(crate) fn close(&mut self) {
        if !self.is_failed() {
            *self = Self::Unconnected;
        }
    }
}

/// Handle to one background connection.
///
/// Dropping the handle aborts the loop task without a close handshake; call
/// [`close`](Channel::close) or [`shutdown`](Channel::shutdown) first for a
/// graceful close.
pub struct Channel {
    url: String,
    outgoing: mpsc::UnboundedSender<String>,
    live: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Channel {
    /// Start connecting to `url` in the background.
    ///
    /// Returns immediately. Every [`ChannelEvent`] is passed through `tag`
    /// and sent on `events`, so one receiver can serve several channels.
    pub fn open<C, T, F>(
        connector: Arc<C>,
        url: String,
        events: mpsc::UnboundedSender<T>,
        tag: F,
    ) -> Self
    where
        C: Connector,
        T: Send + 'static,
        F: Fn(ChannelEvent) -> T + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let live = Arc::new(AtomicBool::new(false));

        let emitter = Emitter { events, tag };
        let task = tokio::spawn(channel_loop(
            connector,
            url.clone(),
            outgoing_rx,
            shutdown_rx,
            Arc::clone(&live),
            emitter,
        ));

        Self {
            url,
            outgoing,
            live,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Queue one text frame for the server.
    ///
    /// # Errors
    ///
    /// Fails fast with [`HakkeroError::NotConnected`] before `Opened` and after
    /// `Errored`/`Closed`; a send is never silently swallowed.
    pub fn send(&self, message: String) -> Result<()> {
        if !self.is_live() {
            return Err(HakkeroError::NotConnected);
        }
        self.outgoing
            .send(message)
            .map_err(|_| HakkeroError::TransportClosed)
    }

    /// Returns `true` between `Opened` and the terminal event.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// The address this channel was opened for.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the loop to close the connection. Returns immediately.
    ///
    /// The loop answers with a final [`ChannelEvent::Closed`].
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.live.store(false, Ordering::Release);
    }

    /// Close the connection and wait up to `timeout` for the loop to exit,
    /// aborting it after that.
    pub async fn shutdown(&mut self, timeout: Duration) {
        self.close();
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!(url = %self.url, "channel loop join error: {join_err}"),
                Err(_) => {
                    warn!(url = %self.url, "channel loop did not exit in time; aborting");
                    task.abort();
                }
            }
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("url", &self.url)
            .field("live", &self.is_live())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Loop ────────────────────────────────────────────────────────────

struct Emitter<T, F> {
    events: mpsc::UnboundedSender<T>,
    tag: F,
}

impl<T, F: Fn(ChannelEvent) -> T> Emitter<T, F> {
    fn emit(&self, event: ChannelEvent) {
        if self.events.send((self.tag)(event)).is_err() {
            debug!("channel event receiver dropped");
        }
    }
}

async fn channel_loop<C, T, F>(
    connector: Arc<C>,
    url: String,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
    live: Arc<AtomicBool>,
    emitter: Emitter<T, F>,
) where
    C: Connector,
    F: Fn(ChannelEvent) -> T,
{
    let connected = tokio::select! {
        result = connector.connect(&url) => result,
        _ = &mut shutdown_rx => {
            debug!(url = %url, "channel closed before connecting");
            emitter.emit(ChannelEvent::Closed);
            return;
        }
    };

    let mut transport = match connected {
        Ok(transport) => transport,
        Err(e) => {
            error!(url = %url, "connect failed: {e}");
            emitter.emit(ChannelEvent::Errored(e.to_string()));
            return;
        }
    };

    live.store(true, Ordering::Release);
    info!(url = %url, "channel opened");
    emitter.emit(ChannelEvent::Opened);

    let terminal = loop {
        tokio::select! {
            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    let _ = transport.close().await;
                    break ChannelEvent::Closed;
                };
                if let Err(e) = transport.send(frame).await {
                    error!(url = %url, "send failed: {e}");
                    break ChannelEvent::Errored(e.to_string());
                }
            }

            _ = &mut shutdown_rx => {
                debug!(url = %url, "channel shutdown requested");
                if let Err(e) = transport.close().await {
                    debug!(url = %url, "close handshake failed: {e}");
                }
                break ChannelEvent::Closed;
            }

            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => emitter.emit(ChannelEvent::Message(text)),
                Some(Err(e)) => {
                    error!(url = %url, "receive failed: {e}");
                    break ChannelEvent::Errored(e.to_string());
                }
                None => {
                    debug!(url = %url, "connection closed by server");
                    break ChannelEvent::Closed;
                }
            }
        }
    };

    live.store(false, Ordering::Release);
    emitter.emit(terminal);
    debug!(url = %url, "channel loop exited");
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
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Transport fed by an mpsc receiver; `None` on the feed closes cleanly.
    struct FeedTransport {
        feed: mpsc::UnboundedReceiver<Option<std::result::Result<String, HakkeroError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for FeedTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), HakkeroError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, HakkeroError>> {
            match self.feed.recv().await {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), HakkeroError> {
            Ok(())
        }
    }

    struct FeedConnector {
        transport: StdMutex<Option<FeedTransport>>,
        fail: bool,
    }

    #[async_trait]
    impl Connector for FeedConnector {
        type Transport = FeedTransport;

        async fn connect(&self, _url: &str) -> std::result::Result<FeedTransport, HakkeroError> {
            if self.fail {
                return Err(HakkeroError::Io(std::io::Error::other("refused")));
            }
            self.transport
                .lock()
                .unwrap()
                .take()
                .ok_or(HakkeroError::NotConnected)
        }
    }

    #[allow(clippy::type_complexity)]
    fn feed(
        fail: bool,
    ) -> (
        Arc<FeedConnector>,
        mpsc::UnboundedSender<Option<std::result::Result<String, HakkeroError>>>,
        Arc<StdMutex<Vec<String>>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = FeedTransport {
            feed: rx,
            sent: Arc::clone(&sent),
        };
        let connector = Arc::new(FeedConnector {
            transport: StdMutex::new(Some(transport)),
            fail,
        });
        (connector, tx, sent)
    }

    #[tokio::test]
    async fn events_arrive_in_server_order() {
        let (connector, server, _sent) = feed(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _channel = Channel::open(connector, "mock://queue".into(), tx, |e| e);

        for text in ["a", "b", "c"] {
            server.send(Some(Ok(text.to_string()))).unwrap();
        }
        server.send(None).unwrap();

        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Opened);
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Message("a".into()));
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Message("b".into()));
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Message("c".into()));
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Closed);
    }

    #[tokio::test]
    async fn connect_failure_is_the_only_event() {
        let (connector, _server, _sent) = feed(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = Channel::open(connector, "mock://queue".into(), tx, |e| e);

        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::Errored(_)));
        assert!(!channel.is_live());
        assert!(matches!(
            channel.send("{}".into()),
            Err(HakkeroError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn send_reaches_transport_once_opened() {
        let (connector, _server, sent) = feed(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = Channel::open(connector, "mock://room".into(), tx, |e| e);

        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Opened);
        channel.send(r#"{"accepted":false}"#.into()).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sent.lock().unwrap().as_slice(), [r#"{"accepted":false}"#]);
    }

    #[tokio::test]
    async fn receive_error_is_terminal() {
        let (connector, server, _sent) = feed(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = Channel::open(connector, "mock://room".into(), tx, |e| e);

        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Opened);
        server
            .send(Some(Err(HakkeroError::TransportReceive("reset".into()))))
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ChannelEvent::Errored(_)));
        assert!(!channel.is_live());
        assert!(channel.send("{}".into()).is_err());
    }

    #[tokio::test]
    async fn close_emits_closed_and_blocks_sends() {
        let (connector, _server, _sent) = feed(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = Channel::open(connector, "mock://queue".into(), tx, |e| ("q", e));

        assert_eq!(rx.recv().await.unwrap(), ("q", ChannelEvent::Opened));
        channel.close();
        assert!(matches!(
            channel.send("{}".into()),
            Err(HakkeroError::NotConnected)
        ));
        assert_eq!(rx.recv().await.unwrap(), ("q", ChannelEvent::Closed));
    }

    #[tokio::test]
    async fn shutdown_waits_for_loop() {
        let (connector, _server, _sent) = feed(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut channel = Channel::open(connector, "mock://queue".into(), tx, |e| e);

        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Opened);
        channel.shutdown(Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await.unwrap(), ChannelEvent::Closed);
        assert!(format!("{channel:?}").contains("has_task: false"));
    }
}
