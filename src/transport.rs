//! Transport abstraction for the game server connections.
//!
//! The [`Transport`] trait is one live, bidirectional text message connection.
//! The [`Connector`] trait opens one from an address. The client only ever
//! exchanges JSON text frames, so every implementation must handle message
//! framing internally (WebSocket frames, length-prefixed TCP, in-memory
//! channels in tests).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use hakkero_client::error::HakkeroError;
//! use hakkero_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), HakkeroError> {
//!         // Send the JSON text message over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, HakkeroError>> {
//!         // Receive the next JSON text message
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), HakkeroError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Transport = MyTransport;
//!
//!     async fn connect(&self, url: &str) -> Result<MyTransport, HakkeroError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::HakkeroError;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message.
/// Each call to [`recv`](Transport::recv) returns one complete JSON message,
/// in the order the server sent them.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is
/// used inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`HakkeroError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), HakkeroError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, HakkeroError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), HakkeroError>;
}

/// Opens [`Transport`]s.
///
/// Shared by the dispatcher across every channel it opens, hence `Sync`.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by a successful connect.
    type Transport: Transport;

    /// Open a new connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or unreachable.
    async fn connect(&self, url: &str) -> Result<Self::Transport, HakkeroError>;
}
