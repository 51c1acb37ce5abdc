//! Channel descriptor (subscription identifier).
//!
//! ActionCable identifies a subscription by the JSON encoding of its
//! descriptor: the channel class name plus arbitrary params.
//!
//! # Format
//!
//! ```json
//! { "channel": "ChatChannel", "room_id": 42 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

// ============================================================================
// ChannelDescriptor
// ============================================================================

/// Describes the channel a session subscribes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Channel class name, e.g. `ChatChannel`.
    pub channel: String,

    /// Additional params sent alongside the channel name.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ChannelDescriptor {
    /// Creates a descriptor without params.
    #[inline]
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            params: Map::new(),
        }
    }

    /// Adds a param.
    ///
    /// A `channel` key is ignored since it would shadow the channel name.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "channel" {
            self.params.insert(key, value.into());
        }
        self
    }

    /// Returns the identifier string used on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn identifier(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a descriptor back from its identifier string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the identifier is not a
    /// descriptor.
    pub fn from_identifier(identifier: &str) -> Result<Self> {
        Ok(serde_json::from_str(identifier)?)
    }
}

impl From<&str> for ChannelDescriptor {
    fn from(channel: &str) -> Self {
        Self::new(channel)
    }
}

impl From<String> for ChannelDescriptor {
    fn from(channel: String) -> Self {
        Self::new(channel)
    }
}

// ============================================================================
// Tests
// ============================================================================
