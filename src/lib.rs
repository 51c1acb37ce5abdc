//! Cable Session - Ordered, state-gated channel sessions over ActionCable.
//!
//! This library manages publish/subscribe channel sessions on top of one
//! shared duplex connection. Each session tracks whether its subscription is
//! initialized and connected, and delivers queued actions in order once it
//! can.
//!
//! # Architecture
//!
//! - **Connection**: one physical socket, shared by every session on it
//! - **Session**: one channel subscription plus a FIFO outbound queue
//! - **Transport**: trait boundary; an ActionCable WebSocket client ships
//!   with the crate, an in-memory transport backs tests
//!
//! Key design principles:
//!
//! - Sending is gated on `subscribed ∧ connected`
//! - Queued actions are performed strictly in order; a failing head blocks
//!   the queue until the next state change
//! - State transitions are pure functions returning effects
//! - Diagnostics are a side channel that never changes behaviour
//!
//! # Quick Start
//!
//! ```no_run
//! use cable_session::{ChannelCallbacks, ChannelDescriptor, ConnectionHandle, Result, SessionOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = ConnectionHandle::open("http://localhost:3000/cable")?;
//!     let session = connection.session(SessionOptions::new().with_verbose(true));
//!
//!     session.subscribe(
//!         ChannelDescriptor::new("ChatChannel").with_param("room", "lobby"),
//!         ChannelCallbacks::new().on_received(|message| println!("{message}")),
//!     )?;
//!
//!     // Performed once the server confirmed the subscription.
//!     session.enqueue("speak", json!({ "body": "hello" }));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | [`ChannelSession`], queue and state machine |
//! | [`transport`] | [`ConnectionHandle`], transport traits, cable transport |
//! | [`protocol`] | ActionCable wire messages |
//! | [`transform`] | Payload transforms and key casing |
//! | [`diagnostics`] | Structured diagnostics |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Structured diagnostics.
///
/// Sessions and connections report each decision point to a
/// [`DiagnosticsSink`].
pub mod diagnostics;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// ActionCable wire message types.
pub mod protocol;

/// Channel sessions.
///
/// - [`ChannelSession`] - Subscription, sending and queue
/// - [`SessionState`] - Pure state machine
pub mod session;

/// Payload transforms.
pub mod transform;

/// Transport layer.
///
/// Connection handle, transport traits and the ActionCable WebSocket
/// transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Diagnostics types
pub use diagnostics::{Diagnostic, Diagnostics, DiagnosticsSink, Level, MemorySink, TracingSink};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{SessionId, SubscriptionToken};

// Protocol types
pub use protocol::ChannelDescriptor;

// Session types
pub use session::{
    ChannelCallbacks, ChannelSession, MessageQueue, Phase, QueueItem, ResubscribePolicy,
    SendRequest, SessionOptions, SessionState, open_session,
};

// Transform types
pub use transform::TransformPipeline;

// Transport types
pub use transport::{
    CableConnector, CableOptions, CableTransport, ConnectionBuilder, ConnectionHandle, Connector,
    MemoryTransport, Subscription, SubscriptionEvents, Transport, TransportEvent,
};
