//! ActionCable WebSocket transport and event loop.
//!
//! [`CableTransport`] owns one WebSocket connection to an ActionCable server
//! and multiplexes subscriptions over it.
//!
//! # Event Loop
//!
//! The transport spawns a tokio task that handles:
//!
//! - The WebSocket handshake and the `welcome` message
//! - Incoming control messages and broadcasts, routed by identifier
//! - Outgoing frames queued by subscriptions
//! - Shutdown on [`Transport::teardown`]
//!
//! # Lifecycle of a Subscription
//!
//! 1. `create_subscription` registers callbacks and fires `initialized`
//! 2. `subscribe` is sent once the server said `welcome`
//! 3. `confirm_subscription` fires `connected`, `reject_subscription` fires `rejected`
//! 4. broadcasts fire `received`
//! 5. socket loss fires `disconnected` (no reconnection)

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request as ClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{CableCommand, CableMessage, ChannelDescriptor, ParsedMessage};

use super::{Connector, Subscription, SubscriptionEvents, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for the WebSocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the server's `welcome` message.
const DEFAULT_WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

/// Subprotocols offered by the Rails client.
const DEFAULT_PROTOCOLS: [&str; 2] = ["actioncable-v1-json", "actioncable-unsupported"];

// ============================================================================
// Types
// ============================================================================

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// ============================================================================
// CableOptions
// ============================================================================

/// Connection settings for [`CableTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableOptions {
    /// Maximum time for the WebSocket handshake.
    pub connect_timeout: Duration,

    /// Maximum time between handshake and `welcome`.
    pub welcome_timeout: Duration,

    /// `Origin` header, required by servers enforcing allowed origins.
    pub origin: Option<String>,

    /// Offered `Sec-WebSocket-Protocol` values. Empty sends no header.
    pub protocols: Vec<String>,
}

impl Default for CableOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CableOptions {
    /// Creates options with default timeouts and the Rails subprotocols.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            welcome_timeout: DEFAULT_WELCOME_TIMEOUT,
            origin: None,
            protocols: DEFAULT_PROTOCOLS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets the `welcome` timeout.
    #[inline]
    #[must_use]
    pub fn with_welcome_timeout(mut self, welcome_timeout: Duration) -> Self {
        self.welcome_timeout = welcome_timeout;
        self
    }

    /// Sets the `Origin` header.
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Replaces the offered subprotocols.
    #[inline]
    #[must_use]
    pub fn with_protocols(mut self, protocols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() || self.welcome_timeout.is_zero() {
            return Err(Error::config("Cable timeouts must be greater than zero"));
        }
        Ok(())
    }

    /// Builds the client handshake request for `url`.
    fn client_request(&self, url: &Url) -> Result<ClientRequest> {
        let mut request = url.as_str().into_client_request()?;

        if !self.protocols.is_empty() {
            let value = HeaderValue::from_str(&self.protocols.join(", "))
                .map_err(|e| Error::config(format!("Invalid subprotocol: {e}")))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| Error::config(format!("Invalid origin '{origin}': {e}")))?;
            request.headers_mut().insert("Origin", value);
        }

        Ok(request)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// One registered subscription.
struct Subscriber {
    /// Handle given out to the session, used for identity on removal.
    handle: Weak<CableSubscription>,
    /// Callbacks.
    events: SubscriptionEvents,
}

/// All subscriptions sharing one identifier.
///
/// The server knows a single subscription per identifier, so `subscribe`
/// is sent for the first subscriber and `unsubscribe` after the last.
#[derive(Default)]
struct Group {
    subscribers: Vec<Subscriber>,
    confirmed: bool,
    rejected: bool,
}

impl Group {
    fn events(&self) -> Vec<SubscriptionEvents> {
        self.subscribers.iter().map(|s| s.events.clone()).collect()
    }
}

/// Subscription state shared between the transport and its event loop.
#[derive(Default)]
struct Registry {
    /// Groups by identifier.
    groups: FxHashMap<String, Group>,
    /// Server sent `welcome`.
    welcomed: bool,
    /// Event loop has stopped or teardown was requested.
    closed: bool,
}

// ============================================================================
// LoopCommand
// ============================================================================

/// Internal commands for the event loop.
enum LoopCommand {
    /// Write a text frame.
    Frame(String),
    /// Close the connection.
    Shutdown,
}

// ============================================================================
// CableTransport
// ============================================================================

/// ActionCable transport over one WebSocket connection.
///
/// # Thread Safety
///
/// `CableTransport` is `Send + Sync`. Subscription callbacks run on the
/// event loop task, except `initialized` (and `connected` for an already
/// confirmed identifier), which run inside `create_subscription`.
pub struct CableTransport {
    /// Connection URL.
    url: Url,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    /// Registry (shared with event loop).
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for CableTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CableTransport")
            .field("url", &self.url.as_str())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

impl CableTransport {
    /// Starts connecting to `url`.
    ///
    /// Returns immediately; the handshake runs on the spawned event loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if called outside a Tokio runtime or the options
    ///   are invalid
    /// - [`Error::WebSocket`] if `url` cannot form a handshake request
    pub fn connect(url: Url, options: CableOptions) -> Result<Self> {
        options.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("CableTransport requires a Tokio runtime"))?;
        let request = options.client_request(&url)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Mutex::new(Registry::default()));

        runtime.spawn(Self::run_event_loop(
            request,
            options,
            command_rx,
            Arc::clone(&registry),
        ));

        debug!(url = %url, "Cable event loop spawned");

        Ok(Self {
            url,
            command_tx,
            registry,
        })
    }

    /// Returns the connection URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns `true` once the server has sent `welcome`.
    #[inline]
    #[must_use]
    pub fn is_welcomed(&self) -> bool {
        self.registry.lock().welcomed
    }

    /// Returns `true` once the connection has closed or teardown was requested.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.registry.lock().closed
    }

    /// Returns the number of registered subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry
            .lock()
            .groups
            .values()
            .map(|group| group.subscribers.len())
            .sum()
    }

    /// Queues a frame for the event loop.
    fn send_frame(command_tx: &mpsc::UnboundedSender<LoopCommand>, frame: String) -> Result<()> {
        command_tx
            .send(LoopCommand::Frame(frame))
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// CableTransport - Transport
// ============================================================================

impl Transport for CableTransport {
    fn create_subscription(
        &self,
        descriptor: &ChannelDescriptor,
        events: SubscriptionEvents,
    ) -> Result<Arc<dyn Subscription>> {
        let identifier = descriptor.identifier()?;
        let handle = Arc::new(CableSubscription {
            identifier: identifier.clone(),
            channel: descriptor.channel.clone(),
            command_tx: self.command_tx.clone(),
            registry: Arc::clone(&self.registry),
        });

        let (send_subscribe, already_confirmed) = {
            let mut registry = self.registry.lock();
            if registry.closed {
                return Err(Error::ConnectionClosed);
            }

            let welcomed = registry.welcomed;
            let group = registry.groups.entry(identifier.clone()).or_default();
            group.subscribers.push(Subscriber {
                handle: Arc::downgrade(&handle),
                events: events.clone(),
            });

            (welcomed && group.subscribers.len() == 1, group.confirmed)
        };

        debug!(%identifier, "Subscription created");
        events.initialized();

        if send_subscribe {
            Self::send_frame(&self.command_tx, CableCommand::subscribe(&identifier).to_frame()?)?;
        }

        if already_confirmed {
            events.connected();
        }

        Ok(handle)
    }

    fn remove_subscription(&self, subscription: &dyn Subscription) {
        let identifier = subscription.identifier().to_string();

        let send_unsubscribe = {
            let mut registry = self.registry.lock();
            let welcomed = registry.welcomed;
            let Some(group) = registry.groups.get_mut(&identifier) else {
                return;
            };

            group
                .subscribers
                .retain(|s| !std::ptr::addr_eq(s.handle.as_ptr(), subscription));

            if group.subscribers.is_empty() {
                registry.groups.remove(&identifier);
                welcomed
            } else {
                false
            }
        };

        debug!(%identifier, "Subscription removed");

        if send_unsubscribe
            && let Ok(frame) = CableCommand::unsubscribe(&identifier).to_frame()
            && Self::send_frame(&self.command_tx, frame).is_err()
        {
            trace!(%identifier, "Event loop gone, unsubscribe not sent");
        }
    }

    fn teardown(&self) {
        self.registry.lock().closed = true;
        let _ = self.command_tx.send(LoopCommand::Shutdown);
    }
}

// ============================================================================
// CableTransport - Event Loop
// ============================================================================

impl CableTransport {
    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        request: ClientRequest,
        options: CableOptions,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
        registry: Arc<Mutex<Registry>>,
    ) {
        let ws_stream = match timeout(options.connect_timeout, connect_async(request)).await {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                warn!(error = %e, "Cable handshake failed");
                Self::close_registry(&registry);
                return;
            }
            Err(_) => {
                warn!(
                    timeout_ms = options.connect_timeout.as_millis() as u64,
                    "Cable handshake timed out"
                );
                Self::close_registry(&registry);
                return;
            }
        };

        debug!("Cable WebSocket established");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let welcome_deadline = Instant::now() + options.welcome_timeout;
        let mut welcomed = false;

        loop {
            tokio::select! {
                // Incoming messages from server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let (flow, frames) = Self::handle_incoming_message(&text, &registry);
                            welcomed |= registry.lock().welcomed;

                            for frame in frames {
                                Self::write_frame(&mut ws_write, frame).await;
                            }

                            if matches!(flow, Flow::Close) {
                                let _ = ws_write.close().await;
                                break;
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from subscriptions
                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Frame(frame)) => {
                            Self::write_frame(&mut ws_write, frame).await;
                        }

                        Some(LoopCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }

                // Server never said welcome
                _ = sleep_until(welcome_deadline), if !welcomed => {
                    warn!(
                        timeout_ms = options.welcome_timeout.as_millis() as u64,
                        "No welcome from cable server"
                    );
                    let _ = ws_write.close().await;
                    break;
                }
            }
        }

        Self::close_registry(&registry);

        debug!("Cable event loop terminated");
    }

    /// Handles an incoming text frame.
    ///
    /// Returns whether to keep running and the frames to write in response.
    fn handle_incoming_message(text: &str, registry: &Arc<Mutex<Registry>>) -> (Flow, Vec<String>) {
        let message = match from_str::<CableMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse cable message");
                return (Flow::Continue, Vec::new());
            }
        };

        match message.parse() {
            ParsedMessage::Welcome => {
                let mut registry = registry.lock();
                registry.welcomed = true;
                let frames = registry
                    .groups
                    .keys()
                    .filter_map(|identifier| CableCommand::subscribe(identifier).to_frame().ok())
                    .collect();
                debug!("Welcome received");
                (Flow::Continue, frames)
            }

            ParsedMessage::Ping => {
                trace!("Ping");
                (Flow::Continue, Vec::new())
            }

            ParsedMessage::Confirmed { identifier } => {
                let events = Self::mark_group(registry, &identifier, |group| group.confirmed = true);
                debug!(%identifier, "Subscription confirmed");
                for events in events {
                    events.connected();
                }
                (Flow::Continue, Vec::new())
            }

            ParsedMessage::Rejected { identifier } => {
                let events = Self::mark_group(registry, &identifier, |group| group.rejected = true);
                debug!(%identifier, "Subscription rejected");
                for events in events {
                    events.rejected();
                }
                (Flow::Continue, Vec::new())
            }

            ParsedMessage::Broadcast {
                identifier,
                message,
            } => {
                let events = Self::mark_group(registry, &identifier, |_| {});
                if events.is_empty() {
                    trace!(%identifier, "Broadcast for unknown subscription");
                }
                for events in events {
                    events.received(message.clone());
                }
                (Flow::Continue, Vec::new())
            }

            ParsedMessage::Disconnect { reason, reconnect } => {
                debug!(?reason, reconnect, "Server requested disconnect");
                (Flow::Close, Vec::new())
            }

            ParsedMessage::Unknown { message_type } => {
                trace!(%message_type, "Ignoring unknown cable message");
                (Flow::Continue, Vec::new())
            }
        }
    }

    /// Updates a group and returns its callbacks.
    fn mark_group(
        registry: &Arc<Mutex<Registry>>,
        identifier: &str,
        update: impl FnOnce(&mut Group),
    ) -> Vec<SubscriptionEvents> {
        let mut registry = registry.lock();
        match registry.groups.get_mut(identifier) {
            Some(group) => {
                update(group);
                group.events()
            }
            None => Vec::new(),
        }
    }

    /// Writes one frame, logging failures.
    async fn write_frame(ws_write: &mut WsSink, frame: String) {
        trace!(frame = %frame, "Frame sent");
        if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
            warn!(error = %e, "Failed to write cable frame");
        }
    }

    /// Marks the registry closed and reports `disconnected` to confirmed
    /// subscriptions.
    fn close_registry(registry: &Arc<Mutex<Registry>>) {
        let events: Vec<SubscriptionEvents> = {
            let mut registry = registry.lock();
            registry.closed = true;
            registry.welcomed = false;
            registry
                .groups
                .values_mut()
                .filter(|group| group.confirmed)
                .flat_map(|group| {
                    group.confirmed = false;
                    group.events()
                })
                .collect()
        };

        let count = events.len();
        for events in events {
            events.disconnected();
        }

        if count > 0 {
            debug!(count, "Reported disconnect to subscriptions");
        }
    }
}

/// Whether the event loop keeps running after a message.
enum Flow {
    Continue,
    Close,
}

// ============================================================================
// CableSubscription
// ============================================================================

/// A subscription on a [`CableTransport`].
pub struct CableSubscription {
    /// JSON-encoded descriptor.
    identifier: String,
    /// Channel name, for errors.
    channel: String,
    /// Channel to the event loop.
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    /// Registry (shared with event loop).
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for CableSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CableSubscription")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Subscription for CableSubscription {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn perform(&self, action: &str, payload: &Value) -> Result<()> {
        {
            let registry = self.registry.lock();
            if registry.closed {
                return Err(Error::ConnectionClosed);
            }

            match registry.groups.get(&self.identifier) {
                Some(group) if group.rejected => {
                    return Err(Error::rejected_subscription(&self.channel));
                }
                Some(group) if group.confirmed => {}
                Some(_) => return Err(Error::connection("Subscription not confirmed yet")),
                None => return Err(Error::connection("Subscription was removed")),
            }
        }

        let frame = CableCommand::perform(&self.identifier, action, payload)?.to_frame()?;
        CableTransport::send_frame(&self.command_tx, frame)
    }
}

// ============================================================================
// CableConnector
// ============================================================================

/// [`Connector`] opening [`CableTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct CableConnector {
    /// Options for every transport opened.
    options: CableOptions,
}

impl CableConnector {
    /// Creates a connector with the given options.
    #[inline]
    #[must_use]
    pub fn new(options: CableOptions) -> Self {
        Self { options }
    }
}

impl Connector for CableConnector {
    fn connect(&self, url: &Url) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(CableTransport::connect(url.clone(), self.options.clone())?))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_CONNECT_TIMEOUT.as_secs(), 10);
        assert_eq!(DEFAULT_WELCOME_TIMEOUT.as_secs(), 10);
        assert_eq!(DEFAULT_PROTOCOLS[0], "actioncable-v1-json");
    }

    #[test]
    fn test_options_builder_chain() {
        let options = CableOptions::new()
            .with_connect_timeout(Duration::from_secs(1))
            .with_welcome_timeout(Duration::from_secs(2))
            .with_origin("https://example.com")
            .with_protocols(["actioncable-v1-json"]);

        assert_eq!(options.connect_timeout, Duration::from_secs(1));
        assert_eq!(options.welcome_timeout, Duration::from_secs(2));
        assert_eq!(options.origin.as_deref(), Some("https://example.com"));
        assert_eq!(options.protocols, vec!["actioncable-v1-json".to_string()]);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let options = CableOptions::new().with_welcome_timeout(Duration::ZERO);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_client_request_headers() {
        let url = Url::parse("ws://127.0.0.1:3000/cable").expect("url");
        let request = CableOptions::new()
            .with_origin("http://127.0.0.1:3000")
            .client_request(&url)
            .expect("request");

        assert_eq!(
            request.headers().get("Sec-WebSocket-Protocol").and_then(|v| v.to_str().ok()),
            Some("actioncable-v1-json, actioncable-unsupported")
        );
        assert_eq!(
            request.headers().get("Origin").and_then(|v| v.to_str().ok()),
            Some("http://127.0.0.1:3000")
        );
    }

    #[test]
    fn test_connect_requires_runtime() {
        let url = Url::parse("ws://127.0.0.1:1/cable").expect("url");
        let result = CableTransport::connect(url, CableOptions::new());
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_subscription_lifecycle_without_server() {
        // Port 1 refuses connections, so the loop closes the registry.
        let url = Url::parse("ws://127.0.0.1:1/cable").expect("url");
        let transport = CableTransport::connect(url, CableOptions::new()).expect("spawn");

        let descriptor = ChannelDescriptor::new("ChatChannel");
        if let Ok(subscription) = transport.create_subscription(&descriptor, SubscriptionEvents::ignore()) {
            assert!(subscription.perform("speak", &Value::Null).is_err());
            transport.remove_subscription(subscription.as_ref());
        }
        assert_eq!(transport.subscription_count(), 0);

        transport.teardown();
        assert!(transport.is_closed());
        assert!(
            transport
                .create_subscription(&descriptor, SubscriptionEvents::ignore())
                .is_err()
        );
    }
}
