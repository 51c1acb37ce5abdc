//! Payload transforms applied at the session boundary.
//!
//! A [`TransformPipeline`] holds two optional, pure functions:
//!
//! | Direction | Applied to | When |
//! |-----------|------------|------|
//! | outgoing | action payloads, descriptor params | before queuing or performing |
//! | incoming | received messages | before the `received` callback |
//!
//! A missing transform is the identity. Each payload passes through its
//! transform exactly once, whether it is sent immediately or queued first.
//!
//! # Example
//!
//! ```
//! use cable_session::TransformPipeline;
//! use serde_json::json;
//!
//! let pipeline = TransformPipeline::case_conversion();
//! assert_eq!(pipeline.outgoing(json!({ "roomId": 1 })), json!({ "room_id": 1 }));
//! assert_eq!(pipeline.incoming(json!({ "room_id": 1 })), json!({ "roomId": 1 }));
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Deep camelCase / snake_case key conversion.
pub mod case;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::protocol::ChannelDescriptor;

// ============================================================================
// Types
// ============================================================================

/// A pure payload mapping.
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

// ============================================================================
// TransformPipeline
// ============================================================================

/// Optional incoming and outgoing payload transforms.
#[derive(Clone, Default)]
pub struct TransformPipeline {
    /// Applied to received messages.
    incoming: Option<Transform>,
    /// Applied to outgoing payloads and descriptor params.
    outgoing: Option<Transform>,
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformPipeline")
            .field("incoming", &self.incoming.is_some())
            .field("outgoing", &self.outgoing.is_some())
            .finish()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl TransformPipeline {
    /// Creates an identity pipeline.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the Rails-friendly pipeline: `snake_case` keys out,
    /// `camelCase` keys in.
    #[must_use]
    pub fn case_conversion() -> Self {
        Self::new()
            .with_outgoing(case::to_snake_case_keys)
            .with_incoming(case::to_camel_case_keys)
    }

    /// Sets the incoming transform.
    #[inline]
    #[must_use]
    pub fn with_incoming(mut self, transform: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.incoming = Some(Arc::new(transform));
        self
    }

    /// Sets the outgoing transform.
    #[inline]
    #[must_use]
    pub fn with_outgoing(mut self, transform: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.outgoing = Some(Arc::new(transform));
        self
    }
}

// ============================================================================
// Application
// ============================================================================

impl TransformPipeline {
    /// Applies the incoming transform.
    #[must_use]
    pub fn incoming(&self, raw: Value) -> Value {
        match &self.incoming {
            Some(transform) => transform(raw),
            None => raw,
        }
    }

    /// Applies the outgoing transform.
    #[must_use]
    pub fn outgoing(&self, payload: Value) -> Value {
        match &self.outgoing {
            Some(transform) => transform(payload),
            None => payload,
        }
    }

    /// Applies the outgoing transform to a descriptor's params.
    ///
    /// The channel name is left as is. A transform that does not return an
    /// object leaves the params untouched.
    #[must_use]
    pub fn outgoing_descriptor(&self, descriptor: &ChannelDescriptor) -> ChannelDescriptor {
        if self.outgoing.is_none() {
            return descriptor.clone();
        }

        match self.outgoing(Value::Object(descriptor.params.clone())) {
            Value::Object(params) => ChannelDescriptor {
                channel: descriptor.channel.clone(),
                params,
            },
            _ => descriptor.clone(),
        }
    }

    /// Returns `true` if an incoming transform is set.
    #[inline]
    #[must_use]
    pub fn has_incoming(&self) -> bool {
        self.incoming.is_some()
    }

    /// Returns `true` if an outgoing transform is set.
    #[inline]
    #[must_use]
    pub fn has_outgoing(&self) -> bool {
        self.outgoing.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
