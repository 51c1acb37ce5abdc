//! In-process transport.
//!
//! [`MemoryTransport`] records every call and lets the caller drive
//! subscription events by hand. It backs unit tests and benchmarks, and is
//! useful for testing applications built on sessions without a server.
//!
//! By default it reports `initialized` synchronously from inside
//! `create_subscription`, like the ActionCable client does.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::ChannelDescriptor;

use super::{Connector, Subscription, SubscriptionEvents, Transport, TransportEvent};

// ============================================================================
// Types
// ============================================================================

/// Hook run on every successful perform, with the performing subscription's
/// callbacks.
pub type PerformHook = Arc<dyn Fn(&str, &SubscriptionEvents) + Send + Sync>;

/// A recorded perform.
#[derive(Debug, Clone, PartialEq)]
pub struct Performed {
    /// Subscription identifier.
    pub identifier: String,
    /// Action name.
    pub action: String,
    /// Payload as passed to the transport.
    pub payload: Value,
}

/// A live subscription.
struct Live {
    handle: Weak<MemorySubscription>,
    identifier: String,
    events: SubscriptionEvents,
}

#[derive(Default)]
struct MemoryState {
    live: Vec<Live>,
    /// Callbacks of every subscription ever created, in order.
    history: Vec<SubscriptionEvents>,
    created: Vec<String>,
    removed: Vec<String>,
    performed: Vec<Performed>,
    attempts: usize,
    fail_remaining: usize,
    fail_always: bool,
    /// Identifiers whose performs fail.
    failing_identifiers: Vec<String>,
    auto_connect: bool,
    manual_initialize: bool,
    perform_hook: Option<PerformHook>,
    teardowns: usize,
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// Scriptable in-process [`Transport`].
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryTransport")
            .field("live", &state.live.len())
            .field("performed", &state.performed.len())
            .field("teardowns", &state.teardowns)
            .finish()
    }
}

impl MemoryTransport {
    /// Creates a transport that reports `initialized` on creation.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        })
    }

    /// Also reports `connected` synchronously on creation.
    #[must_use]
    pub fn auto_connect(self: Arc<Self>) -> Arc<Self> {
        self.state.lock().auto_connect = true;
        self
    }

    /// Reports nothing on creation; events are driven by hand.
    #[must_use]
    pub fn manual(self: Arc<Self>) -> Arc<Self> {
        self.state.lock().manual_initialize = true;
        self
    }

    /// Fails the next `count` performs.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_remaining = count;
    }

    /// Fails every perform while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().fail_always = failing;
    }

    /// Fails every perform on subscriptions with `identifier` while `failing`
    /// is set.
    pub fn set_failing_for(&self, identifier: &str, failing: bool) {
        let mut state = self.state.lock();
        state.failing_identifiers.retain(|i| i != identifier);
        if failing {
            state.failing_identifiers.push(identifier.to_string());
        }
    }

    /// Installs a hook run after each successful perform.
    pub fn set_perform_hook(&self, hook: impl Fn(&str, &SubscriptionEvents) + Send + Sync + 'static) {
        self.state.lock().perform_hook = Some(Arc::new(hook));
    }

    // ------------------------------------------------------------------------
    // Driving events
    // ------------------------------------------------------------------------

    /// Sends `event` to every live subscription.
    pub fn broadcast(&self, event: TransportEvent) {
        let events: Vec<SubscriptionEvents> =
            self.state.lock().live.iter().map(|l| l.events.clone()).collect();
        for events in events {
            events.emit(event.clone());
        }
    }

    /// Reports `initialized` to every live subscription.
    pub fn initialize(&self) {
        self.broadcast(TransportEvent::Initialized);
    }

    /// Reports `connected` to every live subscription.
    pub fn connect(&self) {
        self.broadcast(TransportEvent::Connected);
    }

    /// Reports `disconnected` to every live subscription.
    pub fn disconnect(&self) {
        self.broadcast(TransportEvent::Disconnected);
    }

    /// Delivers a message to every live subscription.
    pub fn deliver(&self, message: Value) {
        self.broadcast(TransportEvent::Received(message));
    }

    /// Reports `rejected` to every live subscription.
    pub fn reject(&self) {
        self.broadcast(TransportEvent::Rejected);
    }

    /// Returns the callbacks of the `index`-th subscription ever created,
    /// live or not.
    #[must_use]
    pub fn events_of(&self, index: usize) -> Option<SubscriptionEvents> {
        self.state.lock().history.get(index).cloned()
    }

    // ------------------------------------------------------------------------
    // Recorded calls
    // ------------------------------------------------------------------------

    /// Identifiers passed to `create_subscription`, in order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    /// Identifiers passed to `remove_subscription`, in order.
    #[must_use]
    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    /// Successful performs, in order.
    #[must_use]
    pub fn performed(&self) -> Vec<Performed> {
        self.state.lock().performed.clone()
    }

    /// Actions of successful performs, in order.
    #[must_use]
    pub fn performed_actions(&self) -> Vec<String> {
        self.state.lock().performed.iter().map(|p| p.action.clone()).collect()
    }

    /// Number of perform calls, including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of `teardown` calls.
    #[must_use]
    pub fn teardown_count(&self) -> usize {
        self.state.lock().teardowns
    }
}

impl Transport for MemoryTransport {
    fn create_subscription(
        &self,
        descriptor: &ChannelDescriptor,
        events: SubscriptionEvents,
    ) -> Result<Arc<dyn Subscription>> {
        let identifier = descriptor.identifier()?;
        let handle = Arc::new(MemorySubscription {
            identifier: identifier.clone(),
            events: events.clone(),
            state: Arc::clone(&self.state),
        });

        let (initialize, connect) = {
            let mut state = self.state.lock();
            if state.teardowns > 0 {
                return Err(Error::ConnectionClosed);
            }
            state.live.push(Live {
                handle: Arc::downgrade(&handle),
                identifier: identifier.clone(),
                events: events.clone(),
            });
            state.history.push(events.clone());
            state.created.push(identifier);
            (!state.manual_initialize, state.auto_connect)
        };

        if initialize {
            events.initialized();
        }
        if connect {
            events.connected();
        }

        Ok(handle)
    }

    fn remove_subscription(&self, subscription: &dyn Subscription) {
        let mut state = self.state.lock();
        let before = state.live.len();
        state
            .live
            .retain(|l| !std::ptr::addr_eq(l.handle.as_ptr(), subscription));
        if state.live.len() < before {
            state.removed.push(subscription.identifier().to_string());
        }
    }

    fn teardown(&self) {
        let mut state = self.state.lock();
        state.teardowns += 1;
        state.live.clear();
    }
}

// ============================================================================
// MemorySubscription
// ============================================================================

/// A subscription on a [`MemoryTransport`].
pub struct MemorySubscription {
    identifier: String,
    events: SubscriptionEvents,
    state: Arc<Mutex<MemoryState>>,
}

impl fmt::Debug for MemorySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySubscription")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl Subscription for MemorySubscription {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn perform(&self, action: &str, payload: &Value) -> Result<()> {
        let hook = {
            let mut state = self.state.lock();
            state.attempts += 1;

            if state.fail_always {
                return Err(Error::connection("memory transport is failing"));
            }
            if state.failing_identifiers.contains(&self.identifier) {
                return Err(Error::connection("memory subscription is failing"));
            }
            if state.fail_remaining > 0 {
                state.fail_remaining -= 1;
                return Err(Error::connection("memory transport failed perform"));
            }

            state.performed.push(Performed {
                identifier: self.identifier.clone(),
                action: action.to_string(),
                payload: payload.clone(),
            });
            state.perform_hook.clone()
        };

        if let Some(hook) = hook {
            hook(action, &self.events);
        }
        Ok(())
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// [`Connector`] handing out one shared [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    transport: Arc<MemoryTransport>,
}

impl MemoryConnector {
    /// Creates a connector returning `transport`.
    #[inline]
    #[must_use]
    pub fn new(transport: Arc<MemoryTransport>) -> Self {
        Self { transport }
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, _url: &Url) -> Result<Arc<dyn Transport>> {
        Ok(self.transport.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
