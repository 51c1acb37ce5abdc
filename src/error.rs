//! Error types for cable sessions.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```no_run
//! use cable_session::{ChannelSession, Error, Result, SendRequest};
//! use serde_json::json;
//!
//! fn ping(session: &ChannelSession) -> Result<()> {
//!     match session.send(SendRequest::immediate("ping", json!({}))) {
//!         Err(Error::NotConnected) => {
//!             session.enqueue("ping", json!({}));
//!             Ok(())
//!         }
//!         other => other,
//!     }
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Session state | [`Error::NotSubscribed`], [`Error::NotConnected`] |
//! | Delivery | [`Error::PerformFailed`], [`Error::RejectedSubscription`] |
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session State Errors
    // ========================================================================
    /// Immediate send attempted before the transport initialized the subscription.
    #[error("not subscribed")]
    NotSubscribed,

    /// Immediate send attempted while the subscription is initialized but the
    /// transport is down.
    #[error("not connected")]
    NotConnected,

    // ========================================================================
    // Delivery Errors
    // ========================================================================
    /// The transport failed to perform an action.
    ///
    /// The underlying transport error is deliberately not preserved.
    #[error("unable to perform action '{action}'")]
    PerformFailed {
        /// Action that could not be performed.
        action: String,
    },

    /// The server refused the subscription request.
    #[error("subscription to {channel} was rejected")]
    RejectedSubscription {
        /// Channel named in the rejected descriptor.
        channel: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when connection or session options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed (locally or by the remote end).
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a perform failed error.
    #[inline]
    pub fn perform_failed(action: impl Into<String>) -> Self {
        Self::PerformFailed {
            action: action.into(),
        }
    }

    /// Creates a rejected subscription error.
    #[inline]
    pub fn rejected_subscription(channel: impl Into<String>) -> Self {
        Self::RejectedSubscription {
            channel: channel.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the error reflects session state rather than a
    /// transport failure.
    #[inline]
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::NotSubscribed | Self::NotConnected)
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed once the session state changes, which
    /// is why the queue keeps such items at its head.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotSubscribed | Self::NotConnected | Self::PerformFailed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::NotSubscribed.to_string(), "not subscribed");
        assert_eq!(Error::NotConnected.to_string(), "not connected");
        assert_eq!(
            Error::perform_failed("ping").to_string(),
            "unable to perform action 'ping'"
        );
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("unsupported scheme");
        assert_eq!(err.to_string(), "Configuration error: unsupported scheme");
    }

    #[test]
    fn test_is_state_error() {
        assert!(Error::NotSubscribed.is_state_error());
        assert!(Error::NotConnected.is_state_error());
        assert!(!Error::perform_failed("ping").is_state_error());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("refused").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::NotConnected.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::perform_failed("ping").is_recoverable());
        assert!(Error::NotConnected.is_recoverable());
        assert!(!Error::rejected_subscription("ChatChannel").is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
