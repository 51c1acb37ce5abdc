//! Transport boundary.
//!
//! The session layer never touches sockets. It talks to a [`Transport`]
//! (one physical connection) through [`Subscription`] handles, and the
//! transport reports subscription lifecycle through [`SubscriptionEvents`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   create / remove    ┌──────────────────┐
//! │  ChannelSession  │─────────────────────►│    Transport     │
//! │                  │   perform(action)    │  (one socket)    │
//! │                  │─────────────────────►│                  │
//! │                  │◄─────────────────────│                  │
//! └──────────────────┘  SubscriptionEvents  └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `cable` | ActionCable WebSocket transport and event loop |
//! | `connection` | Shared connection handle |
//! | `memory` | In-process transport for tests and benchmarks |

// ============================================================================
// Submodules
// ============================================================================

/// ActionCable WebSocket transport.
pub mod cable;

/// Shared, ref-counted connection handle.
pub mod connection;

/// Scriptable in-process transport.
pub mod memory;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::error::Result;
use crate::protocol::ChannelDescriptor;

// ============================================================================
// Re-exports
// ============================================================================

pub use cable::{CableConnector, CableOptions, CableTransport};
pub use connection::{ConnectionBuilder, ConnectionHandle, cable_url};
pub use memory::{MemoryConnector, MemoryTransport, Performed};

// ============================================================================
// TransportEvent
// ============================================================================

/// A lifecycle event reported by the transport for one subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The subscription object exists on the client.
    Initialized,
    /// The server confirmed the subscription and the socket is live.
    Connected,
    /// The socket went down.
    Disconnected,
    /// A broadcast arrived.
    Received(Value),
    /// The server refused the subscription.
    Rejected,
}

// ============================================================================
// SubscriptionEvents
// ============================================================================

/// Event handler callback type.
///
/// Called for each event the transport reports for one subscription.
pub type EventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Callbacks a transport invokes for one subscription.
///
/// Transports may invoke them from any thread, including synchronously from
/// inside [`Transport::create_subscription`] or [`Subscription::perform`].
#[derive(Clone)]
pub struct SubscriptionEvents {
    /// Dispatch target.
    handler: EventHandler,
}

impl fmt::Debug for SubscriptionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEvents").finish_non_exhaustive()
    }
}

impl SubscriptionEvents {
    /// Creates events dispatching to `handler`.
    #[inline]
    #[must_use]
    pub fn new(handler: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Creates events that ignore everything.
    #[inline]
    #[must_use]
    pub fn ignore() -> Self {
        Self::new(|_| {})
    }

    /// Dispatches an event.
    #[inline]
    pub fn emit(&self, event: TransportEvent) {
        (self.handler)(event);
    }

    /// Reports `initialized`.
    #[inline]
    pub fn initialized(&self) {
        self.emit(TransportEvent::Initialized);
    }

    /// Reports `connected`.
    #[inline]
    pub fn connected(&self) {
        self.emit(TransportEvent::Connected);
    }

    /// Reports `disconnected`.
    #[inline]
    pub fn disconnected(&self) {
        self.emit(TransportEvent::Disconnected);
    }

    /// Reports a received message.
    #[inline]
    pub fn received(&self, raw: Value) {
        self.emit(TransportEvent::Received(raw));
    }

    /// Reports `rejected`.
    #[inline]
    pub fn rejected(&self) {
        self.emit(TransportEvent::Rejected);
    }
}

// ============================================================================
// Traits
// ============================================================================

/// One subscription created on a transport.
pub trait Subscription: Send + Sync {
    /// Transport-level identifier of the subscription.
    fn identifier(&self) -> &str;

    /// Performs `action` with `payload`.
    ///
    /// # Errors
    ///
    /// Any error; the session treats every failure as opaque.
    fn perform(&self, action: &str, payload: &Value) -> Result<()>;
}

/// One physical duplex connection.
pub trait Transport: Send + Sync {
    /// Creates a subscription and registers its callbacks.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport can no longer accept subscriptions.
    fn create_subscription(
        &self,
        descriptor: &ChannelDescriptor,
        events: SubscriptionEvents,
    ) -> Result<Arc<dyn Subscription>>;

    /// Removes a subscription. Unknown subscriptions are ignored.
    fn remove_subscription(&self, subscription: &dyn Subscription);

    /// Tears the connection down.
    fn teardown(&self);
}

/// Opens transports.
pub trait Connector: Send + Sync {
    /// Opens a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be started.
    fn connect(&self, url: &Url) -> Result<Arc<dyn Transport>>;
}

// ============================================================================
// Tests
// ============================================================================
