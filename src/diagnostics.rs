//! Structured diagnostics emitted at session and connection decision points.
//!
//! Diagnostics are a side channel: the session calls [`Diagnostics::emit`]
//! at every observation point whether or not a sink is installed, and no
//! sink can influence control flow.
//!
//! # Observation Points
//!
//! | Variant | Level | Text |
//! |---------|-------|------|
//! | [`Diagnostic::ConnectionCreated`] | info | `Created Action Cable` |
//! | [`Diagnostic::ConnectionClosed`] | info | `Disconnected Action Cable` |
//! | [`Diagnostic::Subscribing`] | info | `Connecting to ChatChannel` |
//! | [`Diagnostic::Initialized`] | info | `Init ChatChannel` |
//! | [`Diagnostic::Connected`] | info | `Connected to ChatChannel` |
//! | [`Diagnostic::Disconnected`] | info | `Disconnected` |
//! | [`Diagnostic::Received`] | info | `Received {...}` |
//! | [`Diagnostic::Rejected`] | info | `Rejected` |
//! | [`Diagnostic::Unsubscribing`] | info | `Unsubscribing from {...}` |
//! | [`Diagnostic::Enqueued`] | info | `Adding action to queue - ping: {}` |
//! | [`Diagnostic::Sending`] | info | `Sending ping with payload {}` |
//! | [`Diagnostic::QueuePaused`] | info | `Queue paused. Subscribed: ...` |
//! | [`Diagnostic::DrainFailed`] | warn | `Unable to perform action 'ping'. ...` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use crate::identifiers::SessionId;

// ============================================================================
// Level
// ============================================================================

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Normal lifecycle activity.
    Info,
    /// Something did not go as planned but the session carries on.
    Warn,
}

// ============================================================================
// Diagnostic
// ============================================================================

/// A structured diagnostic event.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A connection was created.
    ConnectionCreated {
        /// Connection URL.
        url: String,
    },

    /// A connection was torn down.
    ConnectionClosed {
        /// Connection URL.
        url: String,
    },

    /// A subscription is being created.
    Subscribing {
        /// Session that subscribes.
        session: SessionId,
        /// Channel name.
        channel: String,
    },

    /// The transport initialized the subscription.
    Initialized {
        /// Session owning the subscription.
        session: SessionId,
        /// Channel name.
        channel: String,
    },

    /// The transport reported the subscription as connected.
    Connected {
        /// Session owning the subscription.
        session: SessionId,
        /// Channel name.
        channel: String,
    },

    /// The transport reported the subscription as disconnected.
    Disconnected {
        /// Session owning the subscription.
        session: SessionId,
        /// Channel name.
        channel: String,
    },

    /// A message was received (before the incoming transform).
    Received {
        /// Session owning the subscription.
        session: SessionId,
        /// Raw message.
        message: Value,
    },

    /// The server rejected the subscription.
    Rejected {
        /// Session owning the subscription.
        session: SessionId,
        /// Channel name.
        channel: String,
    },

    /// A subscription is being removed.
    Unsubscribing {
        /// Session owning the subscription.
        session: SessionId,
        /// Transport identifier of the subscription.
        identifier: String,
    },

    /// An action was appended to the queue.
    Enqueued {
        /// Session owning the queue.
        session: SessionId,
        /// Action name.
        action: String,
        /// Transformed payload.
        payload: Value,
    },

    /// An action is being performed on the transport.
    Sending {
        /// Session performing the action.
        session: SessionId,
        /// Action name.
        action: String,
        /// Transformed payload.
        payload: Value,
    },

    /// The queue holds items but the session cannot send.
    QueuePaused {
        /// Session owning the queue.
        session: SessionId,
        /// Whether the session is subscribed.
        subscribed: bool,
        /// Whether the session is connected.
        connected: bool,
        /// Items waiting.
        queue_len: usize,
    },

    /// The head of the queue could not be performed and stays in place.
    DrainFailed {
        /// Session owning the queue.
        session: SessionId,
        /// Action at the head of the queue.
        action: String,
    },
}

impl Diagnostic {
    /// Returns the severity.
    #[must_use]
    pub fn level(&self) -> Level {
        match self {
            Self::DrainFailed { .. } => Level::Warn,
            _ => Level::Info,
        }
    }

    /// Returns a short, stable name of the observation point.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionCreated { .. } => "connection_created",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::Subscribing { .. } => "subscribing",
            Self::Initialized { .. } => "initialized",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Received { .. } => "received",
            Self::Rejected { .. } => "rejected",
            Self::Unsubscribing { .. } => "unsubscribing",
            Self::Enqueued { .. } => "enqueued",
            Self::Sending { .. } => "sending",
            Self::QueuePaused { .. } => "queue_paused",
            Self::DrainFailed { .. } => "drain_failed",
        }
    }

    /// Returns the session the diagnostic belongs to, if any.
    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Self::ConnectionCreated { .. } | Self::ConnectionClosed { .. } => None,
            Self::Subscribing { session, .. }
            | Self::Initialized { session, .. }
            | Self::Connected { session, .. }
            | Self::Disconnected { session, .. }
            | Self::Received { session, .. }
            | Self::Rejected { session, .. }
            | Self::Unsubscribing { session, .. }
            | Self::Enqueued { session, .. }
            | Self::Sending { session, .. }
            | Self::QueuePaused { session, .. }
            | Self::DrainFailed { session, .. } => Some(*session),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionCreated { .. } => write!(f, "Created Action Cable"),
            Self::ConnectionClosed { .. } => write!(f, "Disconnected Action Cable"),
            Self::Subscribing { channel, .. } => write!(f, "Connecting to {channel}"),
            Self::Initialized { channel, .. } => write!(f, "Init {channel}"),
            Self::Connected { channel, .. } => write!(f, "Connected to {channel}"),
            Self::Disconnected { .. } => write!(f, "Disconnected"),
            Self::Received { message, .. } => write!(f, "Received {message}"),
            Self::Rejected { .. } => write!(f, "Rejected"),
            Self::Unsubscribing { identifier, .. } => {
                write!(f, "Unsubscribing from {identifier}")
            }
            Self::Enqueued {
                action, payload, ..
            } => write!(f, "Adding action to queue - {action}: {payload}"),
            Self::Sending {
                action, payload, ..
            } => write!(f, "Sending {action} with payload {payload}"),
            Self::QueuePaused {
                subscribed,
                connected,
                queue_len,
                ..
            } => write!(
                f,
                "Queue paused. Subscribed: {subscribed}. Connected: {connected}. Queue length: {queue_len}"
            ),
            Self::DrainFailed { action, .. } => write!(
                f,
                "Unable to perform action '{action}'. It will stay at the front of the queue."
            ),
        }
    }
}

// ============================================================================
// DiagnosticsSink
// ============================================================================

/// Receives diagnostics.
///
/// Implementations must not call back into the session that emitted the
/// diagnostic.
pub trait DiagnosticsSink: Send + Sync {
    /// Handles one diagnostic.
    fn emit(&self, diagnostic: &Diagnostic);
}

// ============================================================================
// TracingSink
// ============================================================================

/// Forwards diagnostics to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        let session = diagnostic.session().map(|id| id.to_string()).unwrap_or_default();
        match diagnostic.level() {
            Level::Info => info!(kind = diagnostic.kind(), %session, "{diagnostic}"),
            Level::Warn => warn!(kind = diagnostic.kind(), %session, "{diagnostic}"),
        }
    }
}

// ============================================================================
// MemorySink
// ============================================================================

/// Keeps every diagnostic in memory.
///
/// Handy for asserting on session behaviour in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Recorded diagnostics, oldest first.
    events: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[inline]
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a copy of the recorded diagnostics.
    #[must_use]
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    /// Returns the display text of every recorded diagnostic.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }

    /// Returns the recorded diagnostics of the given level.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<Diagnostic> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level() == level)
            .cloned()
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, diagnostic: &Diagnostic) {
        self.events.lock().push(diagnostic.clone());
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// The diagnostics hook held by connections and sessions.
///
/// Disabled hooks accept and drop every diagnostic.
#[derive(Clone, Default)]
pub struct Diagnostics {
    /// Installed sink, `None` when disabled.
    sink: Option<Arc<dyn DiagnosticsSink>>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

impl Diagnostics {
    /// Creates a disabled hook.
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Creates a hook forwarding to [`TracingSink`].
    #[inline]
    #[must_use]
    pub fn tracing() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    /// Creates a hook forwarding to `sink`.
    #[inline]
    #[must_use]
    pub fn with_sink(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Returns `true` if a sink is installed.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Emits a diagnostic.
    #[inline]
    pub fn emit(&self, diagnostic: Diagnostic) {
        if let Some(sink) = &self.sink {
            sink.emit(&diagnostic);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
