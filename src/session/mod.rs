//! Channel sessions.
//!
//! A [`ChannelSession`] is one logical channel subscription on a shared
//! [`ConnectionHandle`], plus an outbound queue.
//!
//! # Sending
//!
//! - [`ChannelSession::send_now`] performs right away or fails with
//!   [`Error::NotSubscribed`], [`Error::NotConnected`] or
//!   [`Error::PerformFailed`].
//! - [`ChannelSession::enqueue`] never fails. Queued actions are performed in
//!   order once the session is subscribed and connected. A failing head
//!   stays in place and is retried on the next state or queue change.
//!
//! # Scheduling
//!
//! Transitions come from [`SessionState::apply`]. Callbacks, drains and
//! "queue paused" reports are deferred: they run after the mutation that
//! raised them, with no lock held. Effects raised while effects are already
//! running (for example by an event fired from inside `perform`) are run by
//! the outer loop.
//!
//! # Example
//!
//! ```no_run
//! use cable_session::{ChannelCallbacks, ChannelDescriptor, ConnectionHandle, SessionOptions};
//! use serde_json::json;
//!
//! # async fn example() -> cable_session::Result<()> {
//! let connection = ConnectionHandle::open("ws://localhost:3000/cable")?;
//! let session = connection.session(SessionOptions::new().with_case_conversion());
//!
//! session.subscribe(
//!     ChannelDescriptor::new("ChatChannel").with_param("roomId", 1),
//!     ChannelCallbacks::new().on_received(|message| println!("{message}")),
//! )?;
//!
//! session.enqueue("speak", json!({ "messageBody": "hello" }));
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `callbacks` | Caller callbacks |
//! | `options` | Session options |
//! | `queue` | Outbound queue |
//! | `state` | Pure state machine |

// ============================================================================
// Submodules
// ============================================================================

/// Caller callbacks.
pub mod callbacks;

/// Session options.
pub mod options;

/// Outbound queue.
pub mod queue;

/// Pure state machine.
pub mod state;

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Error, Result};
use crate::identifiers::{SessionId, SubscriptionToken};
use crate::protocol::ChannelDescriptor;
use crate::transform::TransformPipeline;
use crate::transport::{ConnectionHandle, Subscription, SubscriptionEvents, TransportEvent};

// ============================================================================
// Re-exports
// ============================================================================

pub use callbacks::ChannelCallbacks;
pub use options::{ResubscribePolicy, SessionOptions};
pub use queue::{MessageQueue, QueueItem};
pub use state::{Effect, Notification, Phase, SessionEvent, SessionState, Transition};

// ============================================================================
// open_session
// ============================================================================

/// Opens a session on `connection`.
///
/// Same as [`ConnectionHandle::session`].
#[must_use]
pub fn open_session(connection: &ConnectionHandle, options: SessionOptions) -> ChannelSession {
    ChannelSession::open(connection, options)
}

// ============================================================================
// SendRequest
// ============================================================================

/// An action to send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    /// Action name.
    pub action: String,
    /// Payload, before the outgoing transform.
    pub payload: Value,
    /// Queue instead of performing right away.
    pub use_queue: bool,
}

impl SendRequest {
    /// Creates a request performed right away.
    #[inline]
    #[must_use]
    pub fn immediate(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
            use_queue: false,
        }
    }

    /// Creates a queued request.
    #[inline]
    #[must_use]
    pub fn queued(action: impl Into<String>, payload: Value) -> Self {
        Self {
            use_queue: true,
            ..Self::immediate(action, payload)
        }
    }

    /// Sets whether to queue.
    #[inline]
    #[must_use]
    pub fn with_queue(mut self, use_queue: bool) -> Self {
        self.use_queue = use_queue;
        self
    }
}

// ============================================================================
// Internal Types
// ============================================================================

/// One subscription owned by the session.
struct ActiveSubscription {
    /// Events carrying another token are stale.
    token: SubscriptionToken,
    /// `None` while the transport is still creating it.
    handle: Option<Arc<dyn Subscription>>,
    /// Callbacks given to `subscribe`.
    callbacks: ChannelCallbacks,
    /// Channel name, for diagnostics.
    channel: String,
}

/// Effect waiting to run outside the lock.
enum Deferred {
    Notify(ChannelCallbacks, Notification),
    Drain,
    QueuePaused {
        subscribed: bool,
        connected: bool,
        queue_len: usize,
    },
}

/// Mutable session state.
struct SessionInner {
    state: SessionState,
    queue: MessageQueue,
    subscriptions: Vec<ActiveSubscription>,
    effects: VecDeque<Deferred>,
    /// An effect loop is running.
    flushing: bool,
    /// `create_subscription` calls in progress.
    creating: usize,
    next_token: SubscriptionToken,
    closed: bool,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            state: SessionState::default(),
            queue: MessageQueue::new(),
            subscriptions: Vec::new(),
            effects: VecDeque::new(),
            flushing: false,
            creating: 0,
            next_token: SubscriptionToken::FIRST,
            closed: false,
        }
    }

    fn subscription(&self, token: SubscriptionToken) -> Option<&ActiveSubscription> {
        self.subscriptions.iter().find(|s| s.token == token)
    }

    /// Created handles, in subscription order.
    fn handles(&self) -> Vec<Arc<dyn Subscription>> {
        self.subscriptions
            .iter()
            .filter_map(|s| s.handle.clone())
            .collect()
    }

    /// Drops every subscription and returns the created handles.
    fn take_subscriptions(&mut self) -> Vec<Arc<dyn Subscription>> {
        self.subscriptions
            .drain(..)
            .filter_map(|s| s.handle)
            .collect()
    }

    /// Applies `event`, defers the asynchronous effects and returns the ones
    /// the caller must run right away.
    ///
    /// Notifications go to the callbacks of the subscription `source`.
    fn apply(&mut self, event: SessionEvent, source: Option<SubscriptionToken>) -> Vec<Effect> {
        let Transition { state, effects } = self.state.apply(event, self.queue.len());
        self.state = state;

        let mut immediate = Vec::new();
        for effect in effects {
            match effect {
                Effect::CreateSubscription | Effect::RemoveSubscriptions => immediate.push(effect),

                Effect::Notify(notification) => {
                    if let Some(subscription) = source.and_then(|token| self.subscription(token)) {
                        let callbacks = subscription.callbacks.clone();
                        self.effects.push_back(Deferred::Notify(callbacks, notification));
                    }
                }

                Effect::Drain => {
                    if !self.effects.iter().any(|d| matches!(d, Deferred::Drain)) {
                        self.effects.push_back(Deferred::Drain);
                    }
                }

                Effect::QueuePaused {
                    subscribed,
                    connected,
                    queue_len,
                } => self.effects.push_back(Deferred::QueuePaused {
                    subscribed,
                    connected,
                    queue_len,
                }),
            }
        }
        immediate
    }
}

// ============================================================================
// SessionCore
// ============================================================================

/// Shared part of a session, reachable from transport callbacks.
struct SessionCore {
    id: SessionId,
    connection: ConnectionHandle,
    transforms: TransformPipeline,
    diagnostics: Diagnostics,
    policy: ResubscribePolicy,
    inner: Mutex<SessionInner>,
}

impl SessionCore {
    /// Transport callbacks for subscription `token`.
    fn events_for(self: &Arc<Self>, token: SubscriptionToken) -> SubscriptionEvents {
        let core = Arc::downgrade(self);
        SubscriptionEvents::new(move |event| {
            if let Some(core) = core.upgrade() {
                core.handle_transport_event(token, event);
            }
        })
    }

    fn handle_transport_event(&self, token: SubscriptionToken, event: TransportEvent) {
        let (event, raw) = match event {
            TransportEvent::Initialized => (SessionEvent::Initialized, None),
            TransportEvent::Connected => (SessionEvent::Connected, None),
            TransportEvent::Disconnected => (SessionEvent::Disconnected, None),
            TransportEvent::Rejected => (SessionEvent::Rejected, None),
            TransportEvent::Received(raw) => {
                let logged = self.diagnostics.is_enabled().then(|| raw.clone());
                (SessionEvent::Received(self.transforms.incoming(raw)), logged)
            }
        };

        let diagnostic = {
            let mut inner = self.inner.lock();
            let Some(subscription) = inner.subscription(token).filter(|_| !inner.closed) else {
                trace!(session = %self.id, %token, "Ignoring event from removed subscription");
                return;
            };

            let session = self.id;
            let channel = subscription.channel.clone();
            let diagnostic = match &event {
                SessionEvent::Initialized => Diagnostic::Initialized { session, channel },
                SessionEvent::Connected => Diagnostic::Connected { session, channel },
                SessionEvent::Disconnected => Diagnostic::Disconnected { session, channel },
                SessionEvent::Rejected => Diagnostic::Rejected { session, channel },
                _ => Diagnostic::Received {
                    session,
                    message: raw.unwrap_or(Value::Null),
                },
            };

            inner.apply(event, Some(token));
            diagnostic
        };

        self.diagnostics.emit(diagnostic);
        self.flush();
    }

    /// Runs deferred effects until none are left.
    fn flush(&self) {
        let mut inner = self.inner.lock();
        if inner.flushing || inner.creating > 0 {
            return;
        }
        inner.flushing = true;

        loop {
            // Creation in progress: its caller flushes afterwards.
            if inner.creating > 0 {
                break;
            }
            let Some(deferred) = inner.effects.pop_front() else {
                break;
            };

            drop(inner);
            self.run(deferred);
            inner = self.inner.lock();
        }

        inner.flushing = false;
    }

    fn run(&self, deferred: Deferred) {
        match deferred {
            Deferred::Notify(callbacks, notification) => callbacks.dispatch(notification),

            Deferred::Drain => self.drain(),

            Deferred::QueuePaused {
                subscribed,
                connected,
                queue_len,
            } => {
                trace!(session = %self.id, subscribed, connected, queue_len, "Queue paused");
                self.diagnostics.emit(Diagnostic::QueuePaused {
                    session: self.id,
                    subscribed,
                    connected,
                    queue_len,
                });
            }
        }
    }

    /// Performs the head of the queue.
    fn drain(&self) {
        let (item, handles) = {
            let inner = self.inner.lock();
            if inner.closed || !inner.state.is_ready() {
                return;
            }
            let Some(item) = inner.queue.head().cloned() else {
                return;
            };
            (item, inner.handles())
        };

        match self.perform_on(&handles, &item.action, &item.payload) {
            Ok(()) => {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return;
                }
                inner.queue.pop_head();
                inner.apply(SessionEvent::QueueChanged, None);
            }
            Err(e) => {
                debug!(session = %self.id, action = %item.action, error = %e, "Head of queue not performed");
                self.diagnostics.emit(Diagnostic::DrainFailed {
                    session: self.id,
                    action: item.action,
                });
                self.inner.lock().apply(SessionEvent::DrainFailed, None);
            }
        }
    }

    /// Performs on every handle in order. Any failure is reported as
    /// [`Error::PerformFailed`].
    fn perform_on(&self, handles: &[Arc<dyn Subscription>], action: &str, payload: &Value) -> Result<()> {
        if handles.is_empty() {
            return Err(Error::perform_failed(action));
        }

        if self.diagnostics.is_enabled() {
            self.diagnostics.emit(Diagnostic::Sending {
                session: self.id,
                action: action.to_string(),
                payload: payload.clone(),
            });
        }

        for handle in handles {
            handle.perform(action, payload).map_err(|e| {
                debug!(
                    session = %self.id,
                    identifier = handle.identifier(),
                    action,
                    error = %e,
                    "Perform failed"
                );
                Error::perform_failed(action)
            })?;
        }
        Ok(())
    }

    /// Removes subscriptions from the transport.
    fn remove_from_transport(&self, handles: Vec<Arc<dyn Subscription>>) {
        for handle in handles {
            debug!(session = %self.id, identifier = handle.identifier(), "Unsubscribing");
            self.diagnostics.emit(Diagnostic::Unsubscribing {
                session: self.id,
                identifier: handle.identifier().to_string(),
            });
            self.connection.transport().remove_subscription(handle.as_ref());
        }
    }

    /// Removes every subscription, drops the queue and ignores later events.
    fn shutdown(&self) {
        let removed = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.queue.clear();
            inner.effects.clear();
            inner.state = SessionState::default();
            inner.take_subscriptions()
        };

        self.remove_from_transport(removed);
        debug!(session = %self.id, "Session closed");
    }
}

// ============================================================================
// ChannelSession
// ============================================================================

/// One channel subscription with an ordered outbound queue.
///
/// Dropping the session (or calling [`close`](Self::close)) removes its
/// subscriptions and discards queued items.
///
/// # Thread Safety
///
/// `ChannelSession` is `Send + Sync`. No lock is held while callbacks,
/// transforms, diagnostics sinks or transport calls run.
pub struct ChannelSession {
    core: Arc<SessionCore>,
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.core.inner.lock();
        f.debug_struct("ChannelSession")
            .field("id", &self.core.id)
            .field("phase", &inner.state.phase())
            .field("subscriptions", &inner.subscriptions.len())
            .field("queue_len", &inner.queue.len())
            .finish_non_exhaustive()
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}

// ============================================================================
// ChannelSession - Lifecycle
// ============================================================================

impl ChannelSession {
    /// Opens a session on `connection`.
    #[must_use]
    pub fn open(connection: &ConnectionHandle, options: SessionOptions) -> Self {
        let id = SessionId::generate();
        debug!(session = %id, connection = connection.url(), "Session opened");

        Self {
            core: Arc::new(SessionCore {
                id,
                connection: connection.clone(),
                transforms: options.transforms,
                diagnostics: options.diagnostics,
                policy: options.policy,
                inner: Mutex::new(SessionInner::new()),
            }),
        }
    }

    /// Subscribes to the channel described by `descriptor`.
    ///
    /// The descriptor's params go through the outgoing transform. While a
    /// subscription exists, the [`ResubscribePolicy`] decides whether it is
    /// replaced or kept alongside the new one.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if it cannot create the subscription
    /// (for example [`Error::ConnectionClosed`]). The session is then left
    /// as if this call had not added a subscription.
    pub fn subscribe(
        &self,
        descriptor: impl Into<ChannelDescriptor>,
        callbacks: ChannelCallbacks,
    ) -> Result<()> {
        let core = &self.core;
        let descriptor = core.transforms.outgoing_descriptor(&descriptor.into());
        let replace = core.policy == ResubscribePolicy::Replace;

        let (removed, token) = {
            let mut inner = core.inner.lock();
            let immediate = inner.apply(SessionEvent::Subscribe { replace }, None);
            let removed = if immediate.contains(&Effect::RemoveSubscriptions) {
                inner.take_subscriptions()
            } else {
                Vec::new()
            };

            let token = inner.next_token;
            inner.next_token = token.next();
            inner.subscriptions.push(ActiveSubscription {
                token,
                handle: None,
                callbacks,
                channel: descriptor.channel.clone(),
            });
            inner.creating += 1;
            (removed, token)
        };

        core.remove_from_transport(removed);

        debug!(session = %core.id, channel = %descriptor.channel, %token, "Subscribing");
        core.diagnostics.emit(Diagnostic::Subscribing {
            session: core.id,
            channel: descriptor.channel.clone(),
        });

        let created = core
            .connection
            .transport()
            .create_subscription(&descriptor, core.events_for(token));

        let (result, orphan) = {
            let mut inner = core.inner.lock();
            inner.creating -= 1;

            match created {
                Ok(handle) => match inner.subscriptions.iter_mut().find(|s| s.token == token) {
                    Some(entry) => {
                        entry.handle = Some(handle);
                        (Ok(()), None)
                    }
                    // Unsubscribed or closed while the transport was creating it.
                    None => (Ok(()), Some(handle)),
                },
                Err(e) => {
                    inner.subscriptions.retain(|s| s.token != token);
                    if inner.subscriptions.is_empty() {
                        inner.state = SessionState::default();
                    }
                    (Err(e), None)
                }
            }
        };

        if let Some(handle) = orphan {
            core.remove_from_transport(vec![handle]);
        }

        core.flush();
        result
    }

    /// Removes every subscription of this session.
    ///
    /// Queued items stay queued; events from the removed subscriptions are
    /// ignored from now on.
    pub fn unsubscribe(&self) {
        let removed = {
            let mut inner = self.core.inner.lock();
            let immediate = inner.apply(SessionEvent::Unsubscribe, None);
            if immediate.contains(&Effect::RemoveSubscriptions) {
                inner.take_subscriptions()
            } else {
                Vec::new()
            }
        };

        self.core.remove_from_transport(removed);
        self.core.flush();
    }

    /// Closes the session.
    ///
    /// Same as dropping it: subscriptions are removed and queued items are
    /// discarded. The connection stays open.
    pub fn close(self) {
        drop(self);
    }
}

// ============================================================================
// ChannelSession - Sending
// ============================================================================

impl ChannelSession {
    /// Sends a request, queued or right away.
    ///
    /// # Errors
    ///
    /// Only immediate requests fail, see [`send_now`](Self::send_now).
    pub fn send(&self, request: SendRequest) -> Result<()> {
        if request.use_queue {
            self.enqueue(request.action, request.payload);
            Ok(())
        } else {
            self.send_now(&request.action, request.payload)
        }
    }

    /// Performs `action` right away.
    ///
    /// # Errors
    ///
    /// - [`Error::NotSubscribed`] before the transport initialized the
    ///   subscription
    /// - [`Error::NotConnected`] while the transport is down
    /// - [`Error::PerformFailed`] if the transport failed to perform
    pub fn send_now(&self, action: &str, payload: Value) -> Result<()> {
        let payload = self.core.transforms.outgoing(payload);

        let handles = {
            let inner = self.core.inner.lock();
            if !inner.state.subscribed {
                return Err(Error::NotSubscribed);
            }
            if !inner.state.connected {
                return Err(Error::NotConnected);
            }
            inner.handles()
        };

        self.core.perform_on(&handles, action, &payload)
    }

    /// Queues `action`.
    ///
    /// Performed before this returns if the session is ready and no other
    /// effect is running.
    pub fn enqueue(&self, action: impl Into<String>, payload: Value) {
        let item = QueueItem::new(action, self.core.transforms.outgoing(payload));
        let diagnostic = self.core.diagnostics.is_enabled().then(|| Diagnostic::Enqueued {
            session: self.core.id,
            action: item.action.clone(),
            payload: item.payload.clone(),
        });

        {
            let mut inner = self.core.inner.lock();
            inner.queue.push(item);
            inner.apply(SessionEvent::QueueChanged, None);
        }

        if let Some(diagnostic) = diagnostic {
            self.core.diagnostics.emit(diagnostic);
        }
        self.core.flush();
    }
}

// ============================================================================
// ChannelSession - Observers
// ============================================================================

impl ChannelSession {
    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.core.id
    }

    /// Returns the connection the session runs on.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.core.connection
    }

    /// Returns the current flags.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.core.inner.lock().state
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state().phase()
    }

    /// Returns `true` once the transport initialized the subscription.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state().subscribed
    }

    /// Returns `true` while the transport is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.core.inner.lock().queue.len()
    }

    /// Returns the queued items, head first.
    #[must_use]
    pub fn pending(&self) -> Vec<QueueItem> {
        self.core.inner.lock().queue.iter().cloned().collect()
    }

    /// Returns the number of subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.core.inner.lock().subscriptions.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    use crate::diagnostics::{Level, MemorySink};
    use crate::transport::MemoryTransport;

    fn session_on(transport: &Arc<MemoryTransport>, options: SessionOptions) -> ChannelSession {
        let connection = ConnectionHandle::from_transport(transport.clone());
        connection.session(options)
    }

    fn with_sink() -> (SessionOptions, Arc<MemorySink>) {
        let sink = MemorySink::new();
        (SessionOptions::new().with_sink(sink.clone()), sink)
    }

    fn chat() -> ChannelDescriptor {
        ChannelDescriptor::new("ChatChannel")
    }

    #[test]
    fn test_new_session_is_idle() {
        let transport = MemoryTransport::new();
        let session = session_on(&transport, SessionOptions::new());

        assert_eq!(session.phase(), Phase::Idle);
        assert!(!session.is_subscribed());
        assert!(!session.is_connected());
        assert_eq!(session.queue_len(), 0);
        assert_eq!(session.subscription_count(), 0);
    }

    #[test]
    fn test_queued_send_when_ready() {
        let transport = MemoryTransport::new();
        let session = session_on(&transport, SessionOptions::new());

        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");
        transport.connect();
        session
            .send(SendRequest::queued("ping", json!({})))
            .expect("queued send never fails");

        let performed = transport.performed();
        assert_eq!(performed.len(), 1);
        assert_eq!(performed[0].action, "ping");
        assert_eq!(performed[0].payload, json!({}));
        assert_eq!(session.queue_len(), 0);
    }

    #[test]
    fn test_immediate_send_not_connected() {
        let transport = MemoryTransport::new();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        assert_eq!(session.phase(), Phase::SubscribedDisconnected);
        let result = session.send(SendRequest::immediate("ping", json!({})));
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(transport.attempts(), 0);
    }

    #[test]
    fn test_immediate_send_not_subscribed() {
        let transport = MemoryTransport::new();
        let session = session_on(&transport, SessionOptions::new());

        let result = session.send_now("ping", json!({}));
        assert!(matches!(result, Err(Error::NotSubscribed)));
    }

    #[test]
    fn test_immediate_send_not_subscribed_while_initializing() {
        let transport = MemoryTransport::new().manual();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        // Connected but never initialized: the subscription check comes first.
        transport.connect();
        assert_eq!(session.phase(), Phase::Initializing);
        assert!(matches!(session.send_now("ping", json!({})), Err(Error::NotSubscribed)));
    }

    #[test]
    fn test_failing_head_stays_queued() {
        let transport = MemoryTransport::new().auto_connect();
        let (options, sink) = with_sink();
        let session = session_on(&transport, options);
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        transport.set_failing(true);
        session.enqueue("ping", json!({}));

        assert_eq!(transport.attempts(), 1);
        assert_eq!(session.queue_len(), 1);
        assert_eq!(session.pending(), vec![QueueItem::new("ping", json!({}))]);

        let warnings = sink.at_level(Level::Warn);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].to_string(),
            "Unable to perform action 'ping'. It will stay at the front of the queue."
        );
    }

    #[test]
    fn test_unsubscribe_stops_draining() {
        let transport = MemoryTransport::new().auto_connect();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        transport.set_failing(true);
        session.enqueue("ping", json!({}));
        assert_eq!(transport.attempts(), 1);

        session.unsubscribe();
        assert_eq!(transport.removed().len(), 1);
        assert_eq!(transport.live_count(), 0);
        assert_eq!(session.phase(), Phase::Idle);

        transport.set_failing(false);
        let stale = transport.events_of(0).expect("first subscription");
        stale.disconnected();
        stale.connected();
        stale.initialized();
        stale.connected();

        assert_eq!(transport.attempts(), 1);
        assert!(transport.performed().is_empty());
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.queue_len(), 1);
    }

    #[test]
    fn test_queue_drains_in_order_on_connect() {
        let transport = MemoryTransport::new();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        for action in ["a", "b", "c"] {
            session.enqueue(action, json!({ "action": action }));
        }
        assert!(transport.performed().is_empty());
        assert_eq!(session.queue_len(), 3);

        transport.connect();
        assert_eq!(transport.performed_actions(), vec!["a", "b", "c"]);
        assert_eq!(session.queue_len(), 0);
    }

    #[test]
    fn test_head_retried_before_later_items() {
        let transport = MemoryTransport::new();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        session.enqueue("a", json!(1));
        session.enqueue("b", json!(2));

        transport.fail_next(1);
        transport.connect();
        assert!(transport.performed().is_empty());
        assert_eq!(session.pending()[0], QueueItem::new("a", json!(1)));

        transport.disconnect();
        transport.connect();
        assert_eq!(transport.performed_actions(), vec!["a", "b"]);
        assert_eq!(transport.attempts(), 3);
    }

    #[test]
    fn test_enqueue_retries_blocked_head() {
        let transport = MemoryTransport::new().auto_connect();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        transport.fail_next(1);
        session.enqueue("a", json!(null));
        assert_eq!(session.queue_len(), 1);

        session.enqueue("b", json!(null));
        assert_eq!(transport.performed_actions(), vec!["a", "b"]);
        assert_eq!(session.queue_len(), 0);
    }

    #[test]
    fn test_queue_paused_diagnostics() {
        let transport = MemoryTransport::new();
        let (options, sink) = with_sink();
        let session = session_on(&transport, options);
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        sink.clear();
        session.enqueue("ping", json!({}));

        assert_eq!(
            sink.messages(),
            vec![
                "Adding action to queue - ping: {}".to_string(),
                "Queue paused. Subscribed: true. Connected: false. Queue length: 1".to_string(),
            ]
        );
    }

    #[test]
    fn test_lifecycle_diagnostics() {
        let transport = MemoryTransport::new();
        let (options, sink) = with_sink();
        let session = session_on(&transport, options);

        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");
        transport.connect();
        session.send_now("ping", json!({})).expect("send");
        transport.deliver(json!({ "body": "hi" }));
        transport.disconnect();
        session.unsubscribe();

        assert_eq!(
            sink.messages(),
            vec![
                "Connecting to ChatChannel".to_string(),
                "Init ChatChannel".to_string(),
                "Connected to ChatChannel".to_string(),
                "Sending ping with payload {}".to_string(),
                r#"Received {"body":"hi"}"#.to_string(),
                "Disconnected".to_string(),
                r#"Unsubscribing from {"channel":"ChatChannel"}"#.to_string(),
            ]
        );
        assert!(sink.events().iter().all(|d| d.session() == Some(session.id())));
    }

    #[test]
    fn test_disabled_diagnostics_do_not_change_behaviour() {
        let transport = MemoryTransport::new().auto_connect();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        session.enqueue("a", json!(1));
        session.send_now("b", json!(2)).expect("send");
        assert_eq!(transport.performed_actions(), vec!["a", "b"]);
    }

    #[test]
    fn test_callbacks_in_order() {
        let transport = MemoryTransport::new().manual();
        let session = session_on(&transport, SessionOptions::new());

        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c, d, e) = (
            Arc::clone(&log),
            Arc::clone(&log),
            Arc::clone(&log),
            Arc::clone(&log),
            Arc::clone(&log),
        );
        let callbacks = ChannelCallbacks::new()
            .on_initialized(move || a.lock().push("initialized".to_string()))
            .on_connected(move || b.lock().push("connected".to_string()))
            .on_received(move |m| c.lock().push(format!("received {m}")))
            .on_disconnected(move || d.lock().push("disconnected".to_string()))
            .on_rejected(move || e.lock().push("rejected".to_string()));

        session.subscribe(chat(), callbacks).expect("subscribe");
        transport.initialize();
        transport.connect();
        transport.deliver(json!({ "n": 1 }));
        transport.disconnect();
        transport.reject();

        assert_eq!(
            *log.lock(),
            vec![
                "initialized".to_string(),
                "connected".to_string(),
                r#"received {"n":1}"#.to_string(),
                "disconnected".to_string(),
                "rejected".to_string(),
            ]
        );
    }

    #[test]
    fn test_rejected_keeps_session_initializing() {
        let transport = MemoryTransport::new().manual();
        let (options, sink) = with_sink();
        let session = session_on(&transport, options);

        let rejected = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&rejected);
        session
            .subscribe(
                chat(),
                ChannelCallbacks::new().on_rejected(move || *flag.lock() = true),
            )
            .expect("subscribe");

        transport.reject();
        assert!(*rejected.lock());
        assert_eq!(session.phase(), Phase::Initializing);
        assert!(sink.messages().contains(&"Rejected".to_string()));
    }

    #[test]
    fn test_callbacks_observe_updated_state() {
        let transport = MemoryTransport::new();
        let session = Arc::new(session_on(&transport, SessionOptions::new()));

        let observed = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&session);
        let slot = Arc::clone(&observed);
        session
            .subscribe(
                chat(),
                ChannelCallbacks::new().on_connected(move || {
                    if let Some(session) = weak.upgrade() {
                        *slot.lock() = Some(session.is_connected());
                        session.enqueue("hello", json!({}));
                    }
                }),
            )
            .expect("subscribe");

        transport.connect();
        assert_eq!(*observed.lock(), Some(true));
        assert_eq!(transport.performed_actions(), vec!["hello"]);
    }

    #[test]
    fn test_transforms_applied_once() {
        let transport = MemoryTransport::new();
        let options = SessionOptions::new()
            .with_outgoing(|v| json!({ "wrapped": v }))
            .with_incoming(|v| json!({ "unwrapped": v }));
        let session = session_on(&transport, options);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        session
            .subscribe(chat(), ChannelCallbacks::new().on_received(move |m| sink.lock().push(m)))
            .expect("subscribe");

        session.enqueue("queued", json!(1));
        transport.connect();
        session.send_now("direct", json!(2)).expect("send");
        transport.deliver(json!(3));

        let payloads: Vec<Value> = transport.performed().into_iter().map(|p| p.payload).collect();
        assert_eq!(payloads, vec![json!({ "wrapped": 1 }), json!({ "wrapped": 2 })]);
        assert_eq!(*received.lock(), vec![json!({ "unwrapped": 3 })]);
    }

    #[test]
    fn test_case_conversion_end_to_end() {
        let transport = MemoryTransport::new().auto_connect();
        let session = session_on(&transport, SessionOptions::new().with_case_conversion());

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        session
            .subscribe(
                ChannelDescriptor::new("ChatChannel").with_param("roomId", 7),
                ChannelCallbacks::new().on_received(move |m| sink.lock().push(m)),
            )
            .expect("subscribe");

        assert!(transport.created()[0].contains(r#""room_id":7"#));

        session.enqueue("speak", json!({ "messageBody": "hi" }));
        assert_eq!(transport.performed()[0].payload, json!({ "message_body": "hi" }));

        transport.deliver(json!({ "user_name": "ann" }));
        assert_eq!(*received.lock(), vec![json!({ "userName": "ann" })]);
    }

    #[test]
    fn test_perform_failure_is_opaque() {
        let transport = MemoryTransport::new().auto_connect();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        transport.fail_next(1);
        let err = session.send_now("speak", json!({})).expect_err("perform fails");
        assert!(matches!(&err, Error::PerformFailed { action } if action == "speak"));
        assert!(err.is_recoverable());

        // Session stays usable.
        session.send_now("speak", json!({})).expect("second send");
    }

    #[test]
    fn test_replace_policy() {
        let transport = MemoryTransport::new().auto_connect();
        let received = Arc::new(Mutex::new(Vec::new()));
        let session = session_on(&transport, SessionOptions::new());

        let first = Arc::clone(&received);
        session
            .subscribe(chat(), ChannelCallbacks::new().on_received(move |_| first.lock().push(1)))
            .expect("first");
        let second = Arc::clone(&received);
        session
            .subscribe(
                ChannelDescriptor::new("NotesChannel"),
                ChannelCallbacks::new().on_received(move |_| second.lock().push(2)),
            )
            .expect("second");

        assert_eq!(transport.created().len(), 2);
        assert_eq!(transport.removed(), vec![r#"{"channel":"ChatChannel"}"#.to_string()]);
        assert_eq!(session.subscription_count(), 1);
        assert_eq!(session.phase(), Phase::SubscribedConnected);

        transport.events_of(0).expect("first").received(json!("stale"));
        transport.deliver(json!("live"));
        assert_eq!(*received.lock(), vec![2]);
    }

    #[test]
    fn test_accumulate_policy() {
        let transport = MemoryTransport::new().auto_connect();
        let session = session_on(
            &transport,
            SessionOptions::new().with_policy(ResubscribePolicy::Accumulate),
        );

        session.subscribe(chat(), ChannelCallbacks::new()).expect("first");
        session
            .subscribe(ChannelDescriptor::new("NotesChannel"), ChannelCallbacks::new())
            .expect("second");
        assert_eq!(session.subscription_count(), 2);
        assert!(transport.removed().is_empty());

        session.send_now("ping", json!({})).expect("send");
        let identifiers: Vec<String> =
            transport.performed().into_iter().map(|p| p.identifier).collect();
        assert_eq!(
            identifiers,
            vec![
                r#"{"channel":"ChatChannel"}"#.to_string(),
                r#"{"channel":"NotesChannel"}"#.to_string()
            ]
        );

        session.unsubscribe();
        assert_eq!(transport.removed().len(), 2);
        assert_eq!(transport.live_count(), 0);
    }

    fn accumulating(transport: &Arc<MemoryTransport>) -> ChannelSession {
        session_on(
            transport,
            SessionOptions::new().with_policy(ResubscribePolicy::Accumulate),
        )
    }

    fn notes() -> ChannelDescriptor {
        ChannelDescriptor::new("NotesChannel")
    }

    #[test]
    fn test_accumulate_late_subscription_retries_head() {
        let transport = MemoryTransport::new().manual();
        let session = accumulating(&transport);

        session.subscribe(chat(), ChannelCallbacks::new()).expect("first");
        transport.initialize();
        transport.connect();

        session.subscribe(notes(), ChannelCallbacks::new()).expect("second");
        transport.fail_next(1);
        session.enqueue("x", json!({}));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(session.queue_len(), 1);

        // Flags are already set, the late subscription's events still retry.
        let late = transport.events_of(1).expect("second subscription");
        late.initialized();
        late.connected();

        assert_eq!(session.queue_len(), 0);
        assert_eq!(transport.performed_actions(), vec!["x", "x"]);
        assert_eq!(transport.attempts(), 3);
    }

    #[test]
    fn test_accumulate_partial_failure_performs_again_on_earlier() {
        let transport = MemoryTransport::new().auto_connect();
        let session = accumulating(&transport);
        session.subscribe(chat(), ChannelCallbacks::new()).expect("first");
        session.subscribe(notes(), ChannelCallbacks::new()).expect("second");

        let chat_id = chat().identifier().expect("chat identifier");
        let notes_id = notes().identifier().expect("notes identifier");

        transport.set_failing_for(&notes_id, true);
        session.enqueue("x", json!({}));
        assert_eq!(session.queue_len(), 1);
        assert_eq!(transport.performed().len(), 1);

        transport.set_failing_for(&notes_id, false);
        transport.events_of(1).expect("second subscription").connected();

        let identifiers: Vec<String> =
            transport.performed().into_iter().map(|p| p.identifier).collect();
        assert_eq!(identifiers, vec![chat_id.clone(), chat_id, notes_id]);
        assert_eq!(session.queue_len(), 0);
    }

    #[test]
    fn test_accumulate_any_disconnect_pauses_queue() {
        let transport = MemoryTransport::new().auto_connect();
        let (options, sink) = with_sink();
        let session = session_on(&transport, options.with_policy(ResubscribePolicy::Accumulate));
        session.subscribe(chat(), ChannelCallbacks::new()).expect("first");
        session.subscribe(notes(), ChannelCallbacks::new()).expect("second");

        transport.events_of(1).expect("second subscription").disconnected();
        assert_eq!(session.phase(), Phase::SubscribedDisconnected);

        session.enqueue("y", json!({}));
        assert!(transport.performed().is_empty());
        assert_eq!(session.queue_len(), 1);
        assert!(sink.messages().iter().any(|m| m.starts_with("Queue paused")));
        assert!(matches!(session.send_now("y", json!({})), Err(Error::NotConnected)));

        transport.events_of(1).expect("second subscription").connected();
        assert_eq!(session.queue_len(), 0);
        assert_eq!(transport.performed_actions(), vec!["y", "y"]);
    }

    #[test]
    fn test_event_from_inside_perform() {
        let transport = MemoryTransport::new();
        let session = session_on(&transport, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

        session.enqueue("a", json!(null));
        session.enqueue("b", json!(null));
        transport.set_perform_hook(|_, events| events.disconnected());
        transport.connect();

        assert_eq!(transport.performed_actions(), vec!["a"]);
        assert_eq!(session.queue_len(), 1);
        assert_eq!(session.phase(), Phase::SubscribedDisconnected);
    }

    #[test]
    fn test_subscribe_on_closed_connection() {
        let transport = MemoryTransport::new();
        let connection = ConnectionHandle::from_transport(transport.clone());
        connection.close();

        let session = connection.session(SessionOptions::new());
        let result = session.subscribe(chat(), ChannelCallbacks::new());
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.subscription_count(), 0);
    }

    #[test]
    fn test_close_discards_queue_and_releases() {
        let transport = MemoryTransport::new();
        let connection = ConnectionHandle::from_transport(transport.clone());
        let session = open_session(&connection, SessionOptions::new());
        session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");
        session.enqueue("a", json!(null));

        session.close();
        assert_eq!(transport.live_count(), 0);
        assert!(connection.is_open());

        // Late events from the removed subscription are ignored.
        let stale = transport.events_of(0).expect("subscription");
        stale.connected();
        assert!(transport.performed().is_empty());

        drop(connection);
        assert_eq!(transport.teardown_count(), 1);
    }

    #[test]
    fn test_session_keeps_connection_alive() {
        let transport = MemoryTransport::new();
        let connection = ConnectionHandle::from_transport(transport.clone());
        let session = connection.session(SessionOptions::new());

        drop(connection);
        assert_eq!(transport.teardown_count(), 0);
        assert!(session.connection().is_open());

        drop(session);
        assert_eq!(transport.teardown_count(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue,
        Connect,
        Disconnect,
        FailNext,
    }

    fn any_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Enqueue),
            1 => Just(Op::Connect),
            1 => Just(Op::Disconnect),
            1 => Just(Op::FailNext),
        ]
    }

    proptest! {
        #[test]
        fn prop_queued_actions_perform_in_order(ops in prop::collection::vec(any_op(), 0..60)) {
            let transport = MemoryTransport::new();
            let session = session_on(&transport, SessionOptions::new());
            session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");

            let mut enqueued = Vec::new();
            for op in ops {
                match op {
                    Op::Enqueue => {
                        let action = format!("a{}", enqueued.len());
                        session.enqueue(action.clone(), json!(null));
                        enqueued.push(action);
                    }
                    Op::Connect => transport.connect(),
                    Op::Disconnect => transport.disconnect(),
                    Op::FailNext => transport.fail_next(1),
                }

                let performed = transport.performed_actions();
                prop_assert_eq!(&performed[..], &enqueued[..performed.len()]);
                prop_assert_eq!(performed.len() + session.queue_len(), enqueued.len());
            }

            transport.fail_next(0);
            transport.disconnect();
            transport.connect();
            prop_assert_eq!(transport.performed_actions(), enqueued);
        }

        #[test]
        fn prop_immediate_send_is_gated(text in ".*", number in any::<i64>()) {
            let payload = json!({ "text": text, "number": number });
            let transport = MemoryTransport::new();
            let session = session_on(&transport, SessionOptions::new());

            prop_assert!(matches!(session.send_now("x", payload.clone()), Err(Error::NotSubscribed)));

            session.subscribe(chat(), ChannelCallbacks::new()).expect("subscribe");
            prop_assert!(matches!(session.send_now("x", payload.clone()), Err(Error::NotConnected)));

            transport.connect();
            prop_assert!(session.send_now("x", payload.clone()).is_ok());
            prop_assert_eq!(transport.performed()[0].payload.clone(), payload);
        }
    }
}
