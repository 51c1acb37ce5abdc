//! Outbound message queue.
//!
//! FIFO with retry-at-head: the head is only removed once it has been
//! performed, so a failing item blocks everything behind it.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// QueueItem
// ============================================================================

/// One queued action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Action name.
    pub action: String,
    /// Payload, already transformed.
    pub payload: Value,
}

impl QueueItem {
    /// Creates a queue item.
    #[inline]
    #[must_use]
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }
}

// ============================================================================
// MessageQueue
// ============================================================================

/// Ordered pending actions of one session.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    items: VecDeque<QueueItem>,
}

impl MessageQueue {
    /// Creates an empty queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item at the tail.
    #[inline]
    pub fn push(&mut self, item: QueueItem) {
        self.items.push_back(item);
    }

    /// Returns the head without removing it.
    #[inline]
    #[must_use]
    pub fn head(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// Removes the head after it was performed.
    #[inline]
    pub fn pop_head(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    /// Number of items.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    /// Drops every item.
    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
