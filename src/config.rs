//! Client configuration and endpoint URL construction.

use std::time::Duration;

use reqwest::Url;

use crate::error::{HakkeroError, Result};
use crate::protocol::RoomId;

/// Default pause between a successful announcement and the room hand-off.
pub const DEFAULT_ANNOUNCEMENT_DELAY: Duration = Duration::from_secs(1);

/// Default grace period for closing a channel.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default refresh period of the queue-wait clock.
pub const DEFAULT_QUEUE_CLOCK_INTERVAL: Duration = Duration::from_secs(1);

/// Default refresh period of the turn countdown.
pub const DEFAULT_TURN_CLOCK_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hakkero_client::HakkeroConfig;
///
/// let config = HakkeroConfig::new("https://hakkero.example")
///     .unwrap()
///     .with_announcement_delay(Duration::from_millis(500));
/// assert_eq!(
///     config.queue_url("ab").unwrap().as_str(),
///     "wss://hakkero.example/queue?username=ab"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct HakkeroConfig {
    /// Base for one-shot HTTP requests.
    pub http_url: Url,
    /// Base for the queue and room connections.
    pub ws_url: Url,
    /// Delay between a successful announcement and the room assignment, so
    /// the announcement stays readable before the view changes.
    ///
    /// Defaults to **1 second**.
    pub announcement_delay: Duration,
    /// How long [`Dispatcher::shutdown`](crate::Dispatcher::shutdown) waits
    /// for each channel loop before aborting it.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Upper bound for opening a connection. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Close the queue and enter the room as soon as one is assigned.
    ///
    /// Defaults to **true**.
    pub auto_enter_room: bool,
    /// Refresh period for the queue-wait display clock.
    pub queue_clock_interval: Duration,
    /// Refresh period for the turn countdown display clock.
    pub turn_clock_interval: Duration,
}

impl HakkeroConfig {
    /// Configuration for the server at `server_url` (`http` or `https`).
    ///
    /// The WebSocket base is derived by swapping the scheme to `ws`/`wss`.
    ///
    /// # Errors
    ///
    /// Returns [`HakkeroError::InvalidUrl`] if `server_url` does not parse or
    /// is not an `http`/`https` URL.
    pub fn new(server_url: &str) -> Result<Self> {
        let mut http_url = parse_base(server_url)?;
        http_url.set_query(None);
        http_url.set_fragment(None);

        let ws_scheme = match http_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(HakkeroError::InvalidUrl(format!(
                    "{server_url}: expected http or https, got `{other}`"
                )))
            }
        };
        let mut ws_url = http_url.clone();
        ws_url
            .set_scheme(ws_scheme)
            .map_err(|()| HakkeroError::InvalidUrl(server_url.to_string()))?;

        Ok(Self {
            http_url,
            ws_url,
            announcement_delay: DEFAULT_ANNOUNCEMENT_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: None,
            auto_enter_room: true,
            queue_clock_interval: DEFAULT_QUEUE_CLOCK_INTERVAL,
            turn_clock_interval: DEFAULT_TURN_CLOCK_INTERVAL,
        })
    }

    /// Use a separate WebSocket base, e.g. when the socket server sits
    /// behind a different host.
    ///
    /// # Errors
    ///
    /// Returns [`HakkeroError::InvalidUrl`] if `ws_url` does not parse or is
    /// not a `ws`/`wss` URL.
    pub fn with_ws_url(mut self, ws_url: &str) -> Result<Self> {
        let url = parse_base(ws_url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(HakkeroError::InvalidUrl(format!(
                "{ws_url}: expected ws or wss"
            )));
        }
        self.ws_url = url;
        Ok(self)
    }

    /// Set the delay before a successful announcement hands off to the room.
    #[must_use]
    pub fn with_announcement_delay(mut self, delay: Duration) -> Self {
        self.announcement_delay = delay;
        self
    }

    /// Set the grace period for closing channels.
    ///
    /// A zero timeout aborts channel loops without waiting.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bound every connection attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Turn the automatic queue-to-room hand-off on or off.
    #[must_use]
    pub fn with_auto_enter_room(mut self, enabled: bool) -> Self {
        self.auto_enter_room = enabled;
        self
    }

    /// Tick period of the queue wait clock.
    #[must_use]
    pub fn with_queue_clock_interval(mut self, interval: Duration) -> Self {
        self.queue_clock_interval = interval;
        self
    }

    /// Tick period of the turn countdown clock.
    #[must_use]
    pub fn with_turn_clock_interval(mut self, interval: Duration) -> Self {
        self.turn_clock_interval = interval;
        self
    }

    // ── Endpoints ───────────────────────────────────────────────────

    /// `<ws>/queue?username=<username>`
    pub fn queue_url(&self, username: &str) -> Result<Url> {
        let mut url = with_path(&self.ws_url, &["queue"])?;
        url.query_pairs_mut().append_pair("username", username);
        Ok(url)
    }

    /// `<ws>/rooms/<room>?player=<token>`
    pub fn room_ws_url(&self, room: RoomId, player_token: &str) -> Result<Url> {
        let mut url = with_path(&self.ws_url, &["rooms", &room.to_string()])?;
        url.query_pairs_mut().append_pair("player", player_token);
        Ok(url)
    }

    /// `<http>/rooms/<room>`
    pub fn room_fetch_url(&self, room: RoomId) -> Result<Url> {
        with_path(&self.http_url, &["rooms", &room.to_string()])
    }

    /// `<http>/`
    pub fn welcome_url(&self) -> Result<Url> {
        with_path(&self.http_url, &[""])
    }
}

fn parse_base(text: &str) -> Result<Url> {
    let url = Url::parse(text).map_err(|e| HakkeroError::InvalidUrl(format!("{text}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(HakkeroError::InvalidUrl(format!("{text}: not a base URL")));
    }
    Ok(url)
}

fn with_path(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| HakkeroError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
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

    #[test]
    fn defaults() {
        let config = HakkeroConfig::new("http://localhost:8080").unwrap();
        assert_eq!(config.ws_url.as_str(), "ws://localhost:8080/");
        assert_eq!(config.announcement_delay, Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.turn_clock_interval, Duration::from_millis(100));
        assert!(config.connect_timeout.is_none());
        assert!(config.auto_enter_room);
    }

    #[test]
    fn endpoints() {
        let config = HakkeroConfig::new("https://example.com").unwrap();
        assert_eq!(
            config.room_ws_url(7, "abc").unwrap().as_str(),
            "wss://example.com/rooms/7?player=abc"
        );
        assert_eq!(
            config.room_fetch_url(7).unwrap().as_str(),
            "https://example.com/rooms/7"
        );
        assert_eq!(config.welcome_url().unwrap().as_str(), "https://example.com/");
    }

    #[test]
    fn endpoints_under_a_path_prefix() {
        let config = HakkeroConfig::new("http://example.com/game/").unwrap();
        assert_eq!(
            config.queue_url("ab").unwrap().as_str(),
            "ws://example.com/game/queue?username=ab"
        );
        assert_eq!(
            config.welcome_url().unwrap().as_str(),
            "http://example.com/game/"
        );
    }

    #[test]
    fn username_is_percent_encoded() {
        let config = HakkeroConfig::new("http://example.com").unwrap();
        let url = config.queue_url("a&b=c").unwrap();
        assert_eq!(url.query(), Some("username=a%26b%3Dc"));
    }

    #[test]
    fn rejects_non_http_bases() {
        assert!(matches!(
            HakkeroConfig::new("ftp://example.com"),
            Err(HakkeroError::InvalidUrl(_))
        ));
        assert!(HakkeroConfig::new("not a url").is_err());

        let config = HakkeroConfig::new("http://example.com").unwrap();
        assert!(config.clone().with_ws_url("http://other").is_err());
        let config = config.with_ws_url("wss://sockets.example.com").unwrap();
        assert_eq!(
            config.queue_url("ab").unwrap().as_str(),
            "wss://sockets.example.com/queue?username=ab"
        );
    }
}
