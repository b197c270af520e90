//! WebSocket protocol message types.
//!
//! This module defines the JSON message format exchanged between the
//! browser client and the proxy.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Command`] | Client → Proxy | GATT operation request |
//! | [`Event`] | Proxy → Client | Response, status or notification |
//!
//! Every frame is one JSON object with a `type` discriminator and camelCase
//! keys. Binary payloads travel as standard base64.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Frame decoding and encoding |
//! | `command` | Client command set |
//! | `event` | Server event set |

// ============================================================================
// Submodules
// ============================================================================

/// Frame decoding and encoding.
pub mod codec;

/// Client command definitions.
pub mod command;

/// Server event definitions.
pub mod event;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::Command;
pub use event::{DiscoveredDevice, Event};
