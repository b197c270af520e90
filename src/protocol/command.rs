//! Client commands.
//!
//! Commands arrive as JSON objects discriminated by `type`:
//!
//! | `type` | Fields |
//! |--------|--------|
//! | `connect` | `serviceUuid?`, `deviceAddress?` |
//! | `disconnect` | - |
//! | `write` | `characteristicUuid`, `data` (base64), `withResponse?` |
//! | `subscribe` | `characteristicUuid` |
//! | `unsubscribe` | `characteristicUuid` |
//! | `discover` | `serviceUuid?`, `timeout?` (seconds) |
//!
//! Decoding lives in [`super::codec`]; this module only holds the typed form.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use crate::identifiers::MacAddress;

// ============================================================================
// Command
// ============================================================================

/// A validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Connect to a device, replacing any current connection.
    Connect {
        /// GATT service to look for.
        service_uuid: Option<String>,
        /// Specific device; the backend picks one when absent.
        device_address: Option<MacAddress>,
    },

    /// Disconnect the current device.
    Disconnect,

    /// Write bytes to a characteristic.
    Write {
        /// Target characteristic.
        characteristic_uuid: String,
        /// Decoded payload.
        data: Vec<u8>,
        /// Wait for the device to acknowledge the write.
        with_response: bool,
    },

    /// Start forwarding notifications for a characteristic.
    Subscribe {
        /// Characteristic to subscribe to.
        characteristic_uuid: String,
    },

    /// Stop forwarding notifications for a characteristic.
    Unsubscribe {
        /// Characteristic to unsubscribe from.
        characteristic_uuid: String,
    },

    /// Scan for advertising devices.
    Discover {
        /// Only report devices advertising this service.
        service_uuid: Option<String>,
        /// Scan window; the configured default applies when absent.
        timeout: Option<Duration>,
    },
}

impl Command {
    /// Returns the wire tag of this command.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::Write { .. } => "write",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Discover { .. } => "discover",
        }
    }

    /// Returns the label used in client-facing failure messages.
    #[inline]
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "Connect",
            Self::Disconnect => "Disconnect",
            Self::Write { .. } => "Write",
            Self::Subscribe { .. } => "Subscribe",
            Self::Unsubscribe { .. } => "Unsubscribe",
            Self::Discover { .. } => "Discovery",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write {
                characteristic_uuid,
                data,
                ..
            } => write!(f, "write({characteristic_uuid}, {} bytes)", data.len()),
            Self::Subscribe {
                characteristic_uuid,
            }
            | Self::Unsubscribe {
                characteristic_uuid,
            } => write!(f, "{}({characteristic_uuid})", self.tag()),
            _ => f.write_str(self.tag()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
