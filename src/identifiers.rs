//! Type-safe identifier wrappers.
//!
//! Newtypes keep session ids and subscription tokens from being mixed up.
//!
//! | Type | Backing | Scope |
//! |------|---------|-------|
//! | [`SessionId`] | UUID v4 | One [`ChannelSession`](crate::ChannelSession) |
//! | [`SubscriptionToken`] | `u64` | One subscription within a session |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// SessionId
// ============================================================================

/// Unique identifier of a channel session.
///
/// Used to correlate diagnostics from sessions sharing one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SubscriptionToken
// ============================================================================

/// Session-local token of one subscription.
///
/// Transport events carry the token of the subscription that produced them.
/// Once a subscription is removed its token is never reused, so late events
/// from it can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    /// The first token handed out by a session.
    pub const FIRST: Self = Self(1);

    /// Returns the token following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
