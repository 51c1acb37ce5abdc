//! Outgoing ActionCable commands.
//!
//! Every frame the client sends is a command addressed to one subscription
//! identifier.
//!
//! | Command | `data` | Purpose |
//! |---------|--------|---------|
//! | `subscribe` | - | Open a subscription |
//! | `unsubscribe` | - | Close a subscription |
//! | `message` | JSON with `action` | Perform a channel action |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ============================================================================
// CommandKind
// ============================================================================

/// Command discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Open a subscription.
    Subscribe,
    /// Close a subscription.
    Unsubscribe,
    /// Perform an action on a subscription.
    Message,
}

// ============================================================================
// CableCommand
// ============================================================================

/// A command from client to server.
///
/// # Format
///
/// ```json
/// {
///   "command": "message",
///   "identifier": "{\"channel\":\"ChatChannel\"}",
///   "data": "{\"action\":\"speak\",\"body\":\"hi\"}"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CableCommand {
    /// Command kind.
    pub command: CommandKind,

    /// Subscription identifier (JSON-encoded descriptor).
    pub identifier: String,

    /// JSON-encoded action data, for `message` commands only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl CableCommand {
    /// Creates a `subscribe` command.
    #[inline]
    #[must_use]
    pub fn subscribe(identifier: impl Into<String>) -> Self {
        Self {
            command: CommandKind::Subscribe,
            identifier: identifier.into(),
            data: None,
        }
    }

    /// Creates an `unsubscribe` command.
    #[inline]
    #[must_use]
    pub fn unsubscribe(identifier: impl Into<String>) -> Self {
        Self {
            command: CommandKind::Unsubscribe,
            identifier: identifier.into(),
            data: None,
        }
    }

    /// Creates a `message` command performing `action` with `payload`.
    ///
    /// The action name is merged into the payload object under `action`,
    /// the way the Rails client does it. A `null` payload counts as `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload is neither an object nor
    /// `null`.
    pub fn perform(identifier: impl Into<String>, action: &str, payload: &Value) -> Result<Self> {
        let mut data = match payload {
            Value::Object(object) => object.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(Error::protocol(format!(
                    "action payload must be a JSON object, got {other}"
                )));
            }
        };
        data.insert("action".to_string(), Value::String(action.to_string()));

        Ok(Self {
            command: CommandKind::Message,
            identifier: identifier.into(),
            data: Some(serde_json::to_string(&data)?),
        })
    }

    /// Serializes the command to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    const IDENTIFIER: &str = r#"{"channel":"ChatChannel"}"#;

    #[test]
    fn test_subscribe_serialization() {
        let frame = CableCommand::subscribe(IDENTIFIER).to_frame().expect("serialize");
        let value: Value = serde_json::from_str(&frame).expect("parse");

        assert_eq!(value, json!({ "command": "subscribe", "identifier": IDENTIFIER }));
    }

    #[test]
    fn test_unsubscribe_serialization() {
        let frame = CableCommand::unsubscribe(IDENTIFIER).to_frame().expect("serialize");
        assert!(frame.contains("\"unsubscribe\""));
        assert!(!frame.contains("data"));
    }

    #[test]
    fn test_perform_merges_action() {
        let command =
            CableCommand::perform(IDENTIFIER, "speak", &json!({ "body": "hi" })).expect("build");
        let data: Value =
            serde_json::from_str(command.data.as_deref().expect("data")).expect("parse");

        assert_eq!(command.command, CommandKind::Message);
        assert_eq!(data, json!({ "action": "speak", "body": "hi" }));
    }

    #[test]
    fn test_perform_null_payload() {
        let command = CableCommand::perform(IDENTIFIER, "ping", &Value::Null).expect("build");
        assert_eq!(command.data.as_deref(), Some(r#"{"action":"ping"}"#));
    }

    #[test]
    fn test_perform_rejects_scalar_payload() {
        let result = CableCommand::perform(IDENTIFIER, "ping", &json!(5));
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }
}
