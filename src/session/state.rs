//! Session state machine.
//!
//! [`SessionState::apply`] is a pure function: it takes an event and the
//! current queue length and returns the next state plus the effects the
//! session must run. It never touches the transport, the queue or any
//! callback.
//!
//! # Phases
//!
//! | Phase | `active` | `subscribed` | `connected` |
//! |-------|----------|--------------|-------------|
//! | `Idle` | no | - | - |
//! | `Initializing` | yes | no | - |
//! | `SubscribedDisconnected` | yes | yes | no |
//! | `SubscribedConnected` | yes | yes | yes |
//!
//! Whenever the flags change, or the queue length changes, a non-empty queue
//! yields either [`Effect::Drain`] (subscribed and connected) or
//! [`Effect::QueuePaused`]. An `initialized` or `connected` event on a ready
//! session also yields [`Effect::Drain`]: with several live subscriptions it
//! may come from one that refused the head earlier.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

// ============================================================================
// Phase
// ============================================================================

/// Coarse lifecycle phase, derived from [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No subscription.
    Idle,
    /// Subscription requested, not yet initialized.
    Initializing,
    /// Initialized, transport down.
    SubscribedDisconnected,
    /// Initialized, transport live. Sends go through.
    SubscribedConnected,
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Caller asked to subscribe.
    Subscribe {
        /// Drop existing subscriptions first.
        replace: bool,
    },
    /// Transport reported `initialized`.
    Initialized,
    /// Transport reported `connected`.
    Connected,
    /// Transport reported `disconnected`.
    Disconnected,
    /// Transport delivered a message (already transformed).
    Received(Value),
    /// Transport reported `rejected`.
    Rejected,
    /// Caller asked to unsubscribe.
    Unsubscribe,
    /// An item was pushed to or popped from the queue.
    QueueChanged,
    /// The head of the queue could not be performed.
    DrainFailed,
}

// ============================================================================
// Effect
// ============================================================================

/// Caller callback to invoke.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// `initialized` callback.
    Initialized,
    /// `connected` callback.
    Connected,
    /// `disconnected` callback.
    Disconnected,
    /// `received` callback with the transformed message.
    Received(Value),
    /// `rejected` callback.
    Rejected,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a transport subscription.
    CreateSubscription,
    /// Remove every active transport subscription.
    RemoveSubscriptions,
    /// Invoke a caller callback.
    Notify(Notification),
    /// Try to perform the head of the queue.
    Drain,
    /// Report that queued items are waiting.
    QueuePaused {
        /// Subscribed flag at the time.
        subscribed: bool,
        /// Connected flag at the time.
        connected: bool,
        /// Items waiting.
        queue_len: usize,
    },
}

/// Result of [`SessionState::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Next state.
    pub state: SessionState,
    /// Effects to run, in order.
    pub effects: Vec<Effect>,
}

// ============================================================================
// SessionState
// ============================================================================

/// Flags of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SessionState {
    /// The transport initialized the subscription.
    pub subscribed: bool,
    /// The transport is live.
    pub connected: bool,
    /// At least one subscription exists.
    pub active: bool,
}

impl SessionState {
    /// Returns the derived phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match (self.active, self.subscribed, self.connected) {
            (false, _, _) => Phase::Idle,
            (true, false, _) => Phase::Initializing,
            (true, true, false) => Phase::SubscribedDisconnected,
            (true, true, true) => Phase::SubscribedConnected,
        }
    }

    /// Returns `true` if queued items may be performed.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.subscribed && self.connected
    }

    /// Applies `event` given the current queue length.
    #[must_use]
    pub fn apply(self, event: SessionEvent, queue_len: usize) -> Transition {
        let mut next = self;
        let mut effects = Vec::new();
        let readiness_event = matches!(event, SessionEvent::Initialized | SessionEvent::Connected);

        match event {
            SessionEvent::Subscribe { replace } => {
                if replace && self.active {
                    effects.push(Effect::RemoveSubscriptions);
                    next = Self::default();
                }
                next.active = true;
                effects.push(Effect::CreateSubscription);
            }

            SessionEvent::Unsubscribe => {
                if self.active {
                    effects.push(Effect::RemoveSubscriptions);
                }
                next = Self::default();
            }

            // Lifecycle events only count while a subscription exists.
            _ if !self.active && !matches!(event, SessionEvent::QueueChanged | SessionEvent::DrainFailed) => {}

            SessionEvent::Initialized => {
                next.subscribed = true;
                effects.push(Effect::Notify(Notification::Initialized));
            }

            SessionEvent::Connected => {
                next.connected = true;
                effects.push(Effect::Notify(Notification::Connected));
            }

            SessionEvent::Disconnected => {
                next.connected = false;
                effects.push(Effect::Notify(Notification::Disconnected));
            }

            SessionEvent::Received(message) => {
                effects.push(Effect::Notify(Notification::Received(message)));
            }

            SessionEvent::Rejected => {
                effects.push(Effect::Notify(Notification::Rejected));
            }

            SessionEvent::QueueChanged => {
                effects.extend(next.evaluate_queue(queue_len));
                return Transition {
                    state: next,
                    effects,
                };
            }

            // Head stays put until the next state or queue change.
            SessionEvent::DrainFailed => {}
        }

        let flags_changed = (next.subscribed, next.connected) != (self.subscribed, self.connected);
        // A repeated initialized/connected comes from another live subscription
        // and may be what a failed head was waiting for.
        let readiness_repeated = readiness_event && next.is_ready();

        if flags_changed {
            effects.extend(next.evaluate_queue(queue_len));
        } else if readiness_repeated && queue_len > 0 {
            effects.push(Effect::Drain);
        }

        Transition {
            state: next,
            effects,
        }
    }

    /// Drain or pause for a non-empty queue.
    fn evaluate_queue(&self, queue_len: usize) -> Option<Effect> {
        if queue_len == 0 {
            None
        } else if self.is_ready() {
            Some(Effect::Drain)
        } else {
            Some(Effect::QueuePaused {
                subscribed: self.subscribed,
                connected: self.connected,
                queue_len,
            })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
