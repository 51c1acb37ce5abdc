//! Incoming ActionCable messages.
//!
//! The server sends either control messages carrying a `type`, or
//! broadcasts carrying an `identifier` and a `message`.
//!
//! # Message Types
//!
//! | `type` | Meaning |
//! |--------|---------|
//! | `welcome` | Connection accepted, subscriptions may be sent |
//! | `ping` | Keep-alive |
//! | `confirm_subscription` | Subscription confirmed |
//! | `reject_subscription` | Subscription refused |
//! | `disconnect` | Server is closing the connection |
//! | *(none)* | Broadcast to `identifier` |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

// ============================================================================
// CableMessage
// ============================================================================

/// A raw message from server to client.
///
/// # Format
///
/// ```json
/// { "type": "confirm_subscription", "identifier": "{\"channel\":\"ChatChannel\"}" }
/// { "identifier": "{\"channel\":\"ChatChannel\"}", "message": { "body": "hi" } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CableMessage {
    /// Control message type, absent for broadcasts.
    #[serde(rename = "type", default)]
    pub message_type: Option<String>,

    /// Subscription identifier the message is addressed to.
    #[serde(default)]
    pub identifier: Option<String>,

    /// Broadcast body (or ping timestamp).
    #[serde(default)]
    pub message: Option<Value>,

    /// Disconnect reason.
    #[serde(default)]
    pub reason: Option<String>,

    /// Whether the server allows reconnecting after a disconnect.
    #[serde(default)]
    pub reconnect: Option<bool>,
}

impl CableMessage {
    /// Parses the message into a typed variant.
    #[must_use]
    pub fn parse(self) -> ParsedMessage {
        match self.message_type.as_deref() {
            Some("welcome") => ParsedMessage::Welcome,
            Some("ping") => ParsedMessage::Ping,
            Some("confirm_subscription") => ParsedMessage::Confirmed {
                identifier: self.identifier.unwrap_or_default(),
            },
            Some("reject_subscription") => ParsedMessage::Rejected {
                identifier: self.identifier.unwrap_or_default(),
            },
            Some("disconnect") => ParsedMessage::Disconnect {
                reason: self.reason,
                reconnect: self.reconnect.unwrap_or(false),
            },
            Some(other) => ParsedMessage::Unknown {
                message_type: other.to_string(),
            },
            None => match (self.identifier, self.message) {
                (Some(identifier), Some(message)) => {
                    ParsedMessage::Broadcast { identifier, message }
                }
                _ => ParsedMessage::Unknown {
                    message_type: String::new(),
                },
            },
        }
    }
}

// ============================================================================
// ParsedMessage
// ============================================================================

/// Parsed message types for type-safe handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// Connection accepted.
    Welcome,

    /// Keep-alive.
    Ping,

    /// Subscription confirmed.
    Confirmed {
        /// Subscription identifier.
        identifier: String,
    },

    /// Subscription rejected.
    Rejected {
        /// Subscription identifier.
        identifier: String,
    },

    /// Server-initiated disconnect.
    Disconnect {
        /// Reason given by the server.
        reason: Option<String>,
        /// Whether reconnecting is allowed.
        reconnect: bool,
    },

    /// Broadcast to a subscription.
    Broadcast {
        /// Subscription identifier.
        identifier: String,
        /// Message body.
        message: Value,
    },

    /// Unknown or malformed message.
    Unknown {
        /// The unrecognized type (empty when absent).
        message_type: String,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn parse(text: &str) -> ParsedMessage {
        serde_json::from_str::<CableMessage>(text)
            .expect("parse message")
            .parse()
    }

    #[test]
    fn test_welcome_and_ping() {
        assert_eq!(parse(r#"{"type":"welcome"}"#), ParsedMessage::Welcome);
        assert_eq!(
            parse(r#"{"type":"ping","message":1700000000}"#),
            ParsedMessage::Ping
        );
    }

    #[test]
    fn test_confirm_subscription() {
        let parsed = parse(
            r#"{"type":"confirm_subscription","identifier":"{\"channel\":\"ChatChannel\"}"}"#,
        );
        assert_eq!(
            parsed,
            ParsedMessage::Confirmed {
                identifier: r#"{"channel":"ChatChannel"}"#.to_string()
            }
        );
    }

    #[test]
    fn test_reject_subscription() {
        let parsed = parse(r#"{"type":"reject_subscription","identifier":"x"}"#);
        assert!(matches!(parsed, ParsedMessage::Rejected { identifier } if identifier == "x"));
    }

    #[test]
    fn test_disconnect() {
        let parsed = parse(r#"{"type":"disconnect","reason":"unauthorized","reconnect":false}"#);
        assert_eq!(
            parsed,
            ParsedMessage::Disconnect {
                reason: Some("unauthorized".to_string()),
                reconnect: false
            }
        );
    }

    #[test]
    fn test_broadcast() {
        let parsed = parse(r#"{"identifier":"x","message":{"body":"hi"}}"#);
        match parsed {
            ParsedMessage::Broadcast {
                identifier,
                message,
            } => {
                assert_eq!(identifier, "x");
                assert_eq!(message, json!({ "body": "hi" }));
            }
            _ => panic!("unexpected parsed message type"),
        }
    }

    #[test]
    fn test_unknown() {
        assert!(matches!(
            parse(r#"{"type":"custom"}"#),
            ParsedMessage::Unknown { message_type } if message_type == "custom"
        ));
        assert!(matches!(parse("{}"), ParsedMessage::Unknown { .. }));
    }
}
