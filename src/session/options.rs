//! Session configuration.
//!
//! # Example
//!
//! ```
//! use cable_session::{ResubscribePolicy, SessionOptions};
//!
//! let options = SessionOptions::new()
//!     .with_case_conversion()
//!     .with_verbose(true)
//!     .with_policy(ResubscribePolicy::Accumulate);
//! assert!(options.diagnostics.is_enabled());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use crate::diagnostics::{Diagnostics, DiagnosticsSink};
use crate::transform::TransformPipeline;

// ============================================================================
// ResubscribePolicy
// ============================================================================

/// What `subscribe` does while a subscription already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResubscribePolicy {
    /// Remove the existing subscription and start over.
    #[default]
    Replace,

    /// Keep existing subscriptions and add one more. All of them receive
    /// events and every send performs on each, in subscription order.
    Accumulate,
}

// ============================================================================
// SessionOptions
// ============================================================================

/// Options of one [`ChannelSession`](super::ChannelSession).
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Payload transforms.
    pub transforms: TransformPipeline,

    /// Diagnostics hook, disabled by default.
    pub diagnostics: Diagnostics,

    /// Re-subscribe behaviour.
    pub policy: ResubscribePolicy,
}

impl SessionOptions {
    /// Creates options with identity transforms and no diagnostics.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the incoming transform.
    #[inline]
    #[must_use]
    pub fn with_incoming(mut self, transform: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transforms = self.transforms.with_incoming(transform);
        self
    }

    /// Sets the outgoing transform.
    #[inline]
    #[must_use]
    pub fn with_outgoing(mut self, transform: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transforms = self.transforms.with_outgoing(transform);
        self
    }

    /// Replaces both transforms.
    #[inline]
    #[must_use]
    pub fn with_transforms(mut self, transforms: TransformPipeline) -> Self {
        self.transforms = transforms;
        self
    }

    /// Sends `snake_case` keys and receives `camelCase` keys.
    #[inline]
    #[must_use]
    pub fn with_case_conversion(self) -> Self {
        self.with_transforms(TransformPipeline::case_conversion())
    }

    /// Routes diagnostics to `tracing` when `true`, drops them otherwise.
    #[inline]
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.diagnostics = if verbose {
            Diagnostics::tracing()
        } else {
            Diagnostics::disabled()
        };
        self
    }

    /// Routes diagnostics to `sink`.
    #[inline]
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Diagnostics::with_sink(sink);
        self
    }

    /// Sets the re-subscribe policy.
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: ResubscribePolicy) -> Self {
        self.policy = policy;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
