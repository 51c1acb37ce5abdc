//! ActionCable wire message types.
//!
//! This module defines the JSON frames exchanged between the client and an
//! ActionCable server. Only the cable transport speaks this format; the
//! session layer above it never sees raw frames.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `CableCommand` | Client → Server | subscribe / unsubscribe / perform |
//! | `CableMessage` | Server → Client | control messages and broadcasts |
//! | `ChannelDescriptor` | both | subscription identifier |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outgoing commands |
//! | `descriptor` | Channel descriptor / identifier |
//! | `message` | Incoming messages |

// ============================================================================
// Submodules
// ============================================================================

/// Outgoing command frames.
pub mod command;

/// Channel descriptor.
pub mod descriptor;

/// Incoming message frames.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{CableCommand, CommandKind};
pub use descriptor::ChannelDescriptor;
pub use message::{CableMessage, ParsedMessage};
