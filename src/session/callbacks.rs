//! Caller callbacks of a subscription.
//!
//! All callbacks are optional; a missing one is a no-op.
//!
//! # Example
//!
//! ```
//! use cable_session::ChannelCallbacks;
//!
//! let callbacks = ChannelCallbacks::new()
//!     .on_connected(|| println!("connected"))
//!     .on_received(|message| println!("received {message}"));
//! assert!(callbacks.has_any());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::state::Notification;

// ============================================================================
// Types
// ============================================================================

/// Callback without arguments.
pub type OnEventCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback receiving a message after the incoming transform.
pub type OnReceivedCallback = Arc<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// ChannelCallbacks
// ============================================================================

/// Callbacks invoked by a session.
///
/// Callbacks run with no session lock held and may call back into the
/// session.
#[derive(Clone, Default)]
pub struct ChannelCallbacks {
    received: Option<OnReceivedCallback>,
    initialized: Option<OnEventCallback>,
    connected: Option<OnEventCallback>,
    disconnected: Option<OnEventCallback>,
    rejected: Option<OnEventCallback>,
}

impl fmt::Debug for ChannelCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCallbacks")
            .field("received", &self.received.is_some())
            .field("initialized", &self.initialized.is_some())
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .field("rejected", &self.rejected.is_some())
            .finish()
    }
}

impl ChannelCallbacks {
    /// Creates an empty set of callbacks.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for each message, after the incoming transform.
    #[must_use]
    pub fn on_received(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.received = Some(Arc::new(f));
        self
    }

    /// Called when the transport initialized the subscription.
    #[must_use]
    pub fn on_initialized(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.initialized = Some(Arc::new(f));
        self
    }

    /// Called when the transport is live.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.connected = Some(Arc::new(f));
        self
    }

    /// Called when the transport went down.
    #[must_use]
    pub fn on_disconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.disconnected = Some(Arc::new(f));
        self
    }

    /// Called when the server refused the subscription.
    #[must_use]
    pub fn on_rejected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.rejected = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any callback is set.
    #[must_use]
    pub fn has_any(&self) -> bool {
        self.received.is_some()
            || self.initialized.is_some()
            || self.connected.is_some()
            || self.disconnected.is_some()
            || self.rejected.is_some()
    }

    /// Invokes the callback matching `notification`.
    pub(crate) fn dispatch(&self, notification: Notification) {
        let callback = match notification {
            Notification::Received(message) => {
                if let Some(cb) = &self.received {
                    cb(message);
                }
                return;
            }
            Notification::Initialized => &self.initialized,
            Notification::Connected => &self.connected,
            Notification::Disconnected => &self.disconnected,
            Notification::Rejected => &self.rejected,
        };

        if let Some(cb) = callback {
            cb();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
