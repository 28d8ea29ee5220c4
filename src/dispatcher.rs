//! The dispatcher: intents in, effects out, one store.
//!
//! Every intent method validates its precondition against the current
//! [`SessionState`], performs its side effect (open a [`Channel`], send a
//! frame, start a fetch or timer), and applies the matching [`Event`].
//! Asynchronous results come back as completions on one internal queue;
//! [`step`](Dispatcher::step) takes the next one, decodes it and applies it
//! through the same [`store::apply`] path. The dispatcher is the only owner
//! of the state; readers get immutable snapshots through
//! [`subscribe`](Dispatcher::subscribe).
//!
//! Every completion is tagged with the session epoch it was issued in.
//! After a [`reset`](Dispatcher::reset), results from the previous session
//! (late channel events, fetch responses, the announcement timer) are
//! discarded.
//!
//! Intent methods spawn tasks and must be called inside a Tokio runtime.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ChannelEvent, ConnectionState};
use crate::config::HakkeroConfig;
use crate::error::{HakkeroError, Result};
use crate::event::{Event, QueueEvent, RoomEvent};
use crate::fetch::Fetcher;
use crate::matchmaking::MatchStatus;
use crate::protocol::{
    self, QueueMessage, ReadyCheckResponse, RoomId, RoomMessage, RoomSnapshot, SubmitSentence,
};
use crate::room::{Room, RoomSlot};
use crate::store::{self, SessionState};
use crate::validate::{parse_room_id, validate_player_token, validate_username};

#[cfg(feature = "transport-websocket")]
use crate::{fetch::HttpFetcher, transports::WebSocketConnector};

use crate::transport::Connector;

/// Which of the two connections an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Queue,
    Room,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Room => "room",
        }
    }
}

/// An asynchronous result waiting to be applied.
#[derive(Debug)]
enum Completion {
    Channel {
        stage: Stage,
        epoch: u64,
        serial: u64,
        event: ChannelEvent,
    },
    RoomFetched {
        epoch: u64,
        result: Result<RoomSnapshot>,
    },
    Welcome {
        epoch: u64,
        result: Result<String>,
    },
    RoomAssigned {
        epoch: u64,
        room: RoomId,
    },
}

impl Completion {
    fn epoch(&self) -> u64 {
        match self {
            Self::Channel { epoch, .. }
            | Self::RoomFetched { epoch, .. }
            | Self::Welcome { epoch, .. }
            | Self::RoomAssigned { epoch, .. } => *epoch,
        }
    }
}

/// A channel together with the serial its events are tagged with.
#[derive(Debug)]
struct OpenChannel {
    serial: u64,
    channel: Channel,
}

/// Owns the session state, the channels and the pending timers.
///
/// # Example
///
/// ```rust,ignore
/// let config = HakkeroConfig::new("http://localhost:8080")?;
/// let mut dispatcher = Dispatcher::with_defaults(config)?;
///
/// dispatcher.change_username("alice");
/// dispatcher.connect_queue()?;
///
/// loop {
///     let state = dispatcher.step().await;
///     if state.matchmaking.awaiting_response() {
///         dispatcher.respond_ready_check(true)?;
///     }
/// }
/// ```
pub struct Dispatcher<C: Connector, F: Fetcher> {
    config: HakkeroConfig,
    connector: Arc<C>,
    fetcher: Arc<F>,
    state: Arc<SessionState>,
    published: watch::Sender<Arc<SessionState>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    queue: Option<OpenChannel>,
    room: Option<OpenChannel>,
    next_serial: u64,
    assignment: Option<JoinHandle<()>>,
}

#[cfg(feature = "transport-websocket")]
impl Dispatcher<WebSocketConnector, HttpFetcher> {
    /// A dispatcher over WebSocket connections and `reqwest` requests.
    ///
    /// # Errors
    ///
    /// Returns [`HakkeroError::Fetch`] if the HTTP client cannot be built.
    pub fn with_defaults(config: HakkeroConfig) -> Result<Self> {
        let mut connector = WebSocketConnector::new();
        let fetcher = match config.connect_timeout {
            Some(timeout) => {
                connector = connector.with_connect_timeout(timeout);
                HttpFetcher::with_timeout(timeout)?
            }
            None => HttpFetcher::new()?,
        };
        Ok(Self::new(config, connector, fetcher))
    }
}

impl<C: Connector, F: Fetcher> Dispatcher<C, F> {
    /// A dispatcher over any connector and fetcher, starting from the
    /// default state.
    pub fn new(config: HakkeroConfig, connector: C, fetcher: F) -> Self {
        let state = Arc::new(SessionState::default());
        let (published, _) = watch::channel(Arc::clone(&state));
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector: Arc::new(connector),
            fetcher: Arc::new(fetcher),
            state,
            published,
            completions_tx,
            completions_rx,
            queue: None,
            room: None,
            next_serial: 0,
            assignment: None,
        }
    }

    /// The configuration this dispatcher was built with.
    pub fn config(&self) -> &HakkeroConfig {
        &self.config
    }

    /// The current state.
    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    /// A receiver that sees every new state.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionState>> {
        self.published.subscribe()
    }

    /// Returns `true` while the announcement-to-room timer is pending.
    pub fn assignment_pending(&self) -> bool {
        self.assignment
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    // ── Intents ─────────────────────────────────────────────────────

    /// Store a new username. It is validated when the queue is joined.
    pub fn change_username(&mut self, username: &str) {
        self.apply(Event::UsernameChanged(username.to_string()));
    }

    /// Join the matchmaking queue under the current username.
    ///
    /// # Errors
    ///
    /// - [`HakkeroError::Validation`] if the username is invalid.
    /// - [`HakkeroError::ChannelBusy`] if a queue or room channel is live.
    /// - [`HakkeroError::Precondition`] if the last queue channel failed and
    ///   no reset happened since.
    pub fn connect_queue(&mut self) -> Result<()> {
        validate_username(&self.state.username)?;
        if self.queue.is_some() || self.state.matchmaking.connection.is_live() {
            return Err(HakkeroError::ChannelBusy("queue"));
        }
        if self.room.is_some() {
            return Err(HakkeroError::ChannelBusy("room"));
        }
        if self.state.matchmaking.connection.is_failed() {
            return Err(HakkeroError::Precondition(
                "queue connection failed; reset before reconnecting",
            ));
        }

        let url = self.config.queue_url(&self.state.username)?;
        self.apply(Event::Queue(QueueEvent::Connecting));
        let open = self.open(Stage::Queue, url.as_str());
        self.queue = Some(open);
        Ok(())
    }

    /// Answer the outstanding ready-check.
    ///
    /// # Errors
    ///
    /// - [`HakkeroError::NotConnected`] if the queue channel is not open.
    /// - [`HakkeroError::Precondition`] if no ready-check is outstanding.
    pub fn respond_ready_check(&mut self, accepted: bool) -> Result<()> {
        if !self.state.matchmaking.connection.is_connected() {
            return Err(HakkeroError::NotConnected);
        }
        if self.state.matchmaking.match_status != MatchStatus::Pending {
            return Err(HakkeroError::Precondition("no ready-check is outstanding"));
        }
        let open = self.queue.as_ref().ok_or(HakkeroError::NotConnected)?;
        open.channel.send(serde_json::to_string(&ReadyCheckResponse { accepted })?)?;

        self.apply(Event::Queue(QueueEvent::Responded {
            accepted,
            at: Utc::now(),
        }));
        Ok(())
    }

    /// Enter a room directly with a known room id and player token.
    ///
    /// # Errors
    ///
    /// - [`HakkeroError::Validation`] if either field is invalid.
    /// - [`HakkeroError::ChannelBusy`] if a queue or room channel is live.
    pub fn jump_to_room(&mut self, room_id: &str, player_token: &str) -> Result<()> {
        let room = parse_room_id(room_id)?;
        validate_player_token(player_token)?;
        if self.queue.is_some() || self.state.matchmaking.connection.is_live() {
            return Err(HakkeroError::ChannelBusy("queue"));
        }
        if self.room.is_some() {
            return Err(HakkeroError::ChannelBusy("room"));
        }

        self.apply(Event::PlayerTokenAssigned(player_token.to_string()));
        self.apply(Event::RoomSelected(room));
        self.load_room()
    }

    /// Fetch the snapshot of the selected room.
    ///
    /// With [`auto_enter_room`](HakkeroConfig::auto_enter_room) set, the room
    /// channel opens as soon as the snapshot is stored.
    ///
    /// # Errors
    ///
    /// Returns [`HakkeroError::Precondition`] if no room is selected or one
    /// is already loaded.
    pub fn load_room(&mut self) -> Result<()> {
        let room = self
            .state
            .selected_room
            .ok_or(HakkeroError::Precondition("no room selected"))?;
        if self.state.room.room != RoomSlot::Loading {
            return Err(HakkeroError::Precondition("room already loaded"));
        }
        let url = self.config.room_fetch_url(room)?.to_string();

        let fetcher = Arc::clone(&self.fetcher);
        let completions = self.completions_tx.clone();
        let epoch = self.state.epoch;
        info!(room, "loading room");
        tokio::spawn(async move {
            let result = fetcher.fetch_room(&url).await;
            let _ = completions.send(Completion::RoomFetched { epoch, result });
        });
        Ok(())
    }

    /// Open the room channel.
    ///
    /// A live queue channel is closed first; the two never run together.
    ///
    /// # Errors
    ///
    /// - [`HakkeroError::Precondition`] if the room is not loaded or its last
    ///   channel failed.
    /// - [`HakkeroError::ChannelBusy`] if a room channel is live.
    pub fn connect_room(&mut self) -> Result<()> {
        let room = match (&self.state.room.room, self.state.selected_room) {
            (RoomSlot::Loaded(_), Some(room)) => room,
            _ => return Err(HakkeroError::Precondition("room is not loaded")),
        };
        if self.room.is_some() || self.state.room.connection.is_live() {
            return Err(HakkeroError::ChannelBusy("room"));
        }
        if self.state.room.connection.is_failed() {
            return Err(HakkeroError::Precondition(
                "room connection failed; reset before reconnecting",
            ));
        }

        let url = self.config.room_ws_url(room, &self.state.player_token)?;
        self.close_queue();
        self.apply(Event::Room(RoomEvent::Connecting));
        let open = self.open(Stage::Room, url.as_str());
        self.room = Some(open);
        Ok(())
    }

    /// Replace the draft sentence.
    pub fn change_draft(&mut self, draft: &str) {
        self.apply(Event::Room(RoomEvent::DraftChanged(draft.to_string())));
    }

    /// Submit the draft, or skip the turn.
    ///
    /// The draft is sent as `content` either way and cleared afterwards.
    ///
    /// # Errors
    ///
    /// - [`HakkeroError::NotConnected`] if the room channel is not open.
    /// - [`HakkeroError::Precondition`] if it is not this player's turn, or
    ///   the draft is empty and `skip` is not set.
    ///
    /// On error nothing is sent and the state is unchanged.
    pub fn submit(&mut self, skip: bool) -> Result<()> {
        if !self.state.room.connection.is_connected() {
            return Err(HakkeroError::NotConnected);
        }
        if !self.state.room.is_my_turn() {
            return Err(HakkeroError::Precondition("not this player's turn"));
        }
        if !skip && self.state.room.draft_sentence.is_empty() {
            return Err(HakkeroError::Precondition("cannot submit an empty sentence"));
        }
        let open = self.room.as_ref().ok_or(HakkeroError::NotConnected)?;
        let frame = SubmitSentence {
            skip,
            content: self.state.room.draft_sentence.clone(),
        };
        open.channel.send(serde_json::to_string(&frame)?)?;

        self.apply(Event::Room(RoomEvent::Submitted));
        Ok(())
    }

    /// Ask the server for its welcome text; it is appended to the console.
    pub fn welcome(&mut self) -> Result<()> {
        let url = self.config.welcome_url()?.to_string();
        let fetcher = Arc::clone(&self.fetcher);
        let completions = self.completions_tx.clone();
        let epoch = self.state.epoch;
        tokio::spawn(async move {
            let result = fetcher.fetch_welcome(&url).await;
            let _ = completions.send(Completion::Welcome { epoch, result });
        });
        Ok(())
    }

    /// Start a new session.
    ///
    /// Cancels the announcement timer, closes both channels and restores
    /// the default state, keeping only the username. Results from the old
    /// session that arrive later are ignored.
    pub fn reset(&mut self) {
        self.cancel_assignment();
        if let Some(open) = self.queue.take() {
            self.retire(open.channel);
        }
        if let Some(open) = self.room.take() {
            self.retire(open.channel);
        }
        self.apply(Event::Reset);
        info!(epoch = self.state.epoch, "session reset");
    }

    /// Close both channels, waiting up to the configured shutdown timeout
    /// for each.
    pub async fn shutdown(&mut self) {
        self.cancel_assignment();
        let timeout = self.config.shutdown_timeout;
        if let Some(mut open) = self.queue.take() {
            open.channel.shutdown(timeout).await;
        }
        if let Some(mut open) = self.room.take() {
            open.channel.shutdown(timeout).await;
        }
    }

    // ── Completions ─────────────────────────────────────────────────

    /// Wait for the next asynchronous result and apply it.
    ///
    /// Returns the state afterwards, which is unchanged if the result was
    /// stale or malformed.
    pub async fn step(&mut self) -> Arc<SessionState> {
        if let Some(completion) = self.completions_rx.recv().await {
            self.complete(completion);
        }
        self.state()
    }

    /// Apply every result that is already waiting, without blocking.
    ///
    /// Returns how many were processed.
    pub fn process_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.complete(completion);
            processed += 1;
        }
        processed
    }

    /// Step until `done` holds for the current state.
    pub async fn run_until<P>(&mut self, mut done: P) -> Arc<SessionState>
    where
        P: FnMut(&SessionState) -> bool,
    {
        while !done(&self.state) {
            self.step().await;
        }
        self.state()
    }

    fn complete(&mut self, completion: Completion) {
        let epoch = completion.epoch();
        if epoch != self.state.epoch {
            debug!(
                issued = epoch,
                current = self.state.epoch,
                "discarding completion from an earlier session"
            );
            return;
        }

        match completion {
            Completion::Channel { stage, serial, .. } if !self.is_current(stage, serial) => {
                debug!(stage = stage.name(), serial, "discarding event from a retired channel");
            }
            Completion::Channel {
                stage: Stage::Queue,
                event,
                ..
            } => self.on_queue_event(epoch, event),
            Completion::Channel {
                stage: Stage::Room,
                event,
                ..
            } => self.on_room_event(epoch, event),
            Completion::RoomFetched { result, .. } => self.on_room_fetched(epoch, result),
            Completion::Welcome { result, .. } => match result {
                Ok(text) => self.apply(
                    Event::Console {
                        text,
                        at: Utc::now(),
                    }
                    .scoped(epoch),
                ),
                Err(e) => warn!("welcome request failed: {e}"),
            },
            Completion::RoomAssigned { room, .. } => self.on_room_assigned(epoch, room),
        }
    }

    fn on_queue_event(&mut self, epoch: u64, event: ChannelEvent) {
        let at = Utc::now();
        let event = match event {
            ChannelEvent::Opened => QueueEvent::Opened { at },
            ChannelEvent::Message(text) => match protocol::decode::<QueueMessage>(&text) {
                Ok(message) => {
                    if let QueueMessage::Announcement(announcement) = &message {
                        match (announcement.success, announcement.room) {
                            (true, Some(room)) => self.schedule_assignment(room),
                            (true, None) => warn!("successful announcement without a room"),
                            _ => {}
                        }
                    }
                    QueueEvent::Message { message, at }
                }
                Err(e) => {
                    warn!(raw = %text, "dropping malformed queue message: {e}");
                    return;
                }
            },
            ChannelEvent::Errored(error) => {
                self.queue = None;
                QueueEvent::Errored { error, at }
            }
            ChannelEvent::Closed => {
                self.queue = None;
                QueueEvent::Closed { at }
            }
        };
        self.apply(Event::Queue(event).scoped(epoch));
    }

    fn on_room_event(&mut self, epoch: u64, event: ChannelEvent) {
        let event = match event {
            ChannelEvent::Opened => RoomEvent::Opened,
            ChannelEvent::Message(text) => match protocol::decode::<RoomMessage>(&text) {
                Ok(message) => RoomEvent::Message(message),
                Err(e) => {
                    warn!(raw = %text, "dropping malformed room message: {e}");
                    return;
                }
            },
            ChannelEvent::Errored(error) => {
                self.room = None;
                RoomEvent::Errored(error)
            }
            ChannelEvent::Closed => {
                self.room = None;
                RoomEvent::Closed
            }
        };
        self.apply(Event::Room(event).scoped(epoch));
    }

    fn on_room_fetched(&mut self, epoch: u64, result: Result<RoomSnapshot>) {
        let event = match result.and_then(Room::try_from) {
            Ok(room) => {
                info!(room = room.id, members = room.members.len(), "room loaded");
                RoomEvent::Loaded(room)
            }
            Err(e) => {
                error!("room load failed: {e}");
                RoomEvent::LoadFailed(e.to_string())
            }
        };
        self.apply(Event::Room(event).scoped(epoch));

        if self.config.auto_enter_room
            && self.state.room.loaded().is_some()
            && self.state.room.connection == ConnectionState::Unconnected
            && self.room.is_none()
        {
            if let Err(e) = self.connect_room() {
                error!("could not open the room channel: {e}");
            }
        }
    }

    fn on_room_assigned(&mut self, epoch: u64, room: RoomId) {
        self.assignment = None;
        info!(room, "room assigned");
        self.apply(Event::RoomSelected(room).scoped(epoch));

        if !self.config.auto_enter_room {
            return;
        }
        self.close_queue();
        if let Err(e) = self.load_room() {
            error!(room, "could not load the assigned room: {e}");
        }
    }

    // ── Effects ─────────────────────────────────────────────────────

    fn open(&mut self, stage: Stage, url: &str) -> OpenChannel {
        let epoch = self.state.epoch;
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        info!(stage = stage.name(), url = %url, serial, "opening channel");
        let channel = Channel::open(
            Arc::clone(&self.connector),
            url.to_string(),
            self.completions_tx.clone(),
            move |event| Completion::Channel {
                stage,
                epoch,
                serial,
                event,
            },
        );
        OpenChannel { serial, channel }
    }

    fn is_current(&self, stage: Stage, serial: u64) -> bool {
        let open = match stage {
            Stage::Queue => &self.queue,
            Stage::Room => &self.room,
        };
        open.as_ref().is_some_and(|open| open.serial == serial)
    }

    /// Close the queue channel and apply its terminal event now. Whatever
    /// the retired channel reports afterwards is discarded.
    fn close_queue(&mut self) {
        let Some(open) = self.queue.take() else {
            return;
        };
        self.retire(open.channel);
        self.apply(Event::Queue(QueueEvent::Closed { at: Utc::now() }));
    }

    /// Close a channel without waiting for the loop to exit.
    fn retire(&self, mut channel: Channel) {
        channel.close();
        let timeout = self.config.shutdown_timeout;
        tokio::spawn(async move { channel.shutdown(timeout).await });
    }

    fn schedule_assignment(&mut self, room: RoomId) {
        if self.cancel_assignment() {
            debug!(room, "superseding pending room assignment");
        }
        let delay = self.config.announcement_delay;
        let completions = self.completions_tx.clone();
        let epoch = self.state.epoch;
        self.assignment = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = completions.send(Completion::RoomAssigned { epoch, room });
        }));
    }

    /// Returns `true` if a timer was still pending.
    fn cancel_assignment(&mut self) -> bool {
        match self.assignment.take() {
            Some(timer) => {
                let pending = !timer.is_finished();
                timer.abort();
                pending
            }
            None => false,
        }
    }

    fn apply(&mut self, event: Event) {
        let next = store::apply(&self.state, event);
        if next.version == self.state.version {
            return;
        }
        self.state = Arc::new(next);
        self.published.send_replace(Arc::clone(&self.state));
    }
}

impl<C: Connector, F: Fetcher> Drop for Dispatcher<C, F> {
    fn drop(&mut self) {
        self.cancel_assignment();
    }
}

impl<C: Connector, F: Fetcher> std::fmt::Debug for Dispatcher<C, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("version", &self.state.version)
            .field("epoch", &self.state.epoch)
            .field("queue", &self.queue)
            .field("room", &self.room)
            .field("assignment_pending", &self.assignment_pending())
            .finish()
    }
}
