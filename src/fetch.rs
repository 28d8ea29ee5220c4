//! One-shot HTTP requests: the room snapshot and the welcome line.
//!
//! The dispatcher only sees the [`Fetcher`] trait, so tests can substitute a
//! scripted implementation for [`HttpFetcher`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{HakkeroError, Result};
use crate::protocol::RoomSnapshot;

/// Request/response calls against the game server.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// `POST /rooms/<id>`: the full room snapshot.
    async fn fetch_room(&self, url: &str) -> Result<RoomSnapshot>;

    /// `POST /`: the server's welcome text.
    async fn fetch_welcome(&self, url: &str) -> Result<String>;
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// A fetcher with default client settings.
    ///
    /// # Errors
    ///
    /// Returns [`HakkeroError::Fetch`] if the TLS backend cannot be
    /// initialized.
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(reqwest::Client::builder().build()?))
    }

    /// A fetcher whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(
            reqwest::Client::builder().timeout(timeout).build()?,
        ))
    }

    /// Wrap a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_room(&self, url: &str) -> Result<RoomSnapshot> {
        debug!(url = %url, "fetching room snapshot");
        let response = self.client.post(url).send().await?.error_for_status()?;
        response
            .json::<RoomSnapshot>()
            .await
            .map_err(|e| HakkeroError::Fetch(format!("malformed room snapshot: {e}")))
    }

    async fn fetch_welcome(&self, url: &str) -> Result<String> {
        debug!(url = %url, "fetching welcome");
        let response = self.client.post(url).send().await?.error_for_status()?;
        let value = response.json::<serde_json::Value>().await?;
        Ok(welcome_text(value))
    }
}

/// The console text for a welcome payload: a JSON string as-is, any other
/// value as its JSON text.
pub fn welcome_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
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
    use serde_json::json;

    #[test]
    fn welcome_string_is_unquoted() {
        assert_eq!(welcome_text(json!("Welcome to Hakkero!")), "Welcome to Hakkero!");
    }

    #[test]
    fn welcome_object_is_rendered_as_json() {
        assert_eq!(welcome_text(json!({"motd": "hi"})), r#"{"motd":"hi"}"#);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_fetch_error() {
        let fetcher = HttpFetcher::with_timeout(Duration::from_millis(200)).unwrap();
        let err = fetcher
            .fetch_room("http://127.0.0.1:1/rooms/1")
            .await
            .unwrap_err();
        assert!(matches!(err, HakkeroError::Fetch(_) | HakkeroError::Timeout));
    }
}
