//! Server events.
//!
//! Events are sent from the proxy to the client, either as the direct
//! response to a command or asynchronously (notifications).
//!
//! # Event Types
//!
//! | `type` | Fields | Sent |
//! |--------|--------|------|
//! | `connected` | `deviceName`, `deviceAddress`, `services` | after `connect` |
//! | `disconnected` | `reason` | after `disconnect` |
//! | `status` | `connected`, `deviceName`, `message` | after write/subscribe/unsubscribe, on session start |
//! | `error` | `error`, `details?` | any failure |
//! | `notification` | `characteristicUuid`, `data` (base64) | device push |
//! | `discovered` | `devices` | after `discover` |

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::identifiers::MacAddress;

// ============================================================================
// Event
// ============================================================================

/// An event sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    /// Device connection established.
    Connected {
        /// Advertised device name, if known.
        device_name: Option<String>,
        /// Canonical device address.
        device_address: MacAddress,
        /// Service UUIDs exposed by the device.
        services: Vec<String>,
    },

    /// Device connection closed.
    Disconnected {
        /// Why the connection closed.
        reason: String,
    },

    /// Informational status.
    Status {
        /// Whether a device is connected.
        connected: bool,
        /// Connected device name or address.
        device_name: Option<String>,
        /// Human-readable status.
        message: String,
    },

    /// A command failed.
    Error {
        /// Human-readable error.
        #[serde(rename = "error")]
        message: String,
        /// Structured cause (`code` plus context).
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },

    /// Characteristic notification from the device.
    Notification {
        /// Characteristic that produced the value.
        characteristic_uuid: String,
        /// Raw value.
        #[serde(serialize_with = "base64_payload::serialize")]
        data: Vec<u8>,
    },

    /// Discovery results.
    Discovered {
        /// Devices seen during the scan window, strongest first.
        devices: Vec<DiscoveredDevice>,
    },
}

// ============================================================================
// Event Constructors
// ============================================================================

impl Event {
    /// Creates a status event.
    #[inline]
    #[must_use]
    pub fn status(connected: bool, device_name: Option<String>, message: impl Into<String>) -> Self {
        Self::Status {
            connected,
            device_name,
            message: message.into(),
        }
    }

    /// Creates an error event from a crate error.
    ///
    /// The message is the error's display form; details carry its code.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            message: error.to_string(),
            details: Some(error.details()),
        }
    }

    /// Creates the error event for a failed command.
    ///
    /// Produces `"<label> failed: <cause>"`.
    #[must_use]
    pub fn command_failed(label: &str, error: &Error) -> Self {
        let cause = match error {
            Error::OperationFailed { cause, .. } => cause.clone(),
            other => other.to_string(),
        };

        Self::Error {
            message: format!("{label} failed: {cause}"),
            details: Some(error.details()),
        }
    }

    /// Creates a notification event.
    #[inline]
    #[must_use]
    pub fn notification(characteristic_uuid: impl Into<String>, data: Vec<u8>) -> Self {
        Self::Notification {
            characteristic_uuid: characteristic_uuid.into(),
            data,
        }
    }

    /// Returns the wire tag of this event.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::Notification { .. } => "notification",
            Self::Discovered { .. } => "discovered",
        }
    }
}

// ============================================================================
// DiscoveredDevice
// ============================================================================

/// A device seen during discovery.
///
/// When several sources report the same address, the registry keeps only the
/// entry with the strongest RSSI, so `best_source` names that source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    /// Canonical device address.
    pub mac_address: MacAddress,
    /// Advertised local name.
    pub name: String,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Proxy or adapter that saw the device with the strongest signal.
    pub best_source: String,
    /// When the advertisement was received.
    pub last_seen: DateTime<Utc>,
    /// Raw advertisement payload.
    #[serde(
        rename = "advertisementData",
        skip_serializing_if = "Option::is_none",
        serialize_with = "base64_payload::serialize_option"
    )]
    pub advertisement: Option<Vec<u8>>,
}

impl DiscoveredDevice {
    /// Creates a device record seen now.
    #[must_use]
    pub fn new(
        mac_address: MacAddress,
        name: impl Into<String>,
        rssi: i16,
        source: impl Into<String>,
    ) -> Self {
        Self {
            mac_address,
            name: name.into(),
            rssi,
            best_source: source.into(),
            last_seen: Utc::now(),
            advertisement: None,
        }
    }

    /// Attaches the raw advertisement payload.
    #[inline]
    #[must_use]
    pub fn with_advertisement(mut self, payload: Vec<u8>) -> Self {
        self.advertisement = Some(payload);
        self
    }

    /// Overrides the last-seen timestamp.
    #[inline]
    #[must_use]
    pub fn with_last_seen(mut self, last_seen: DateTime<Utc>) -> Self {
        self.last_seen = last_seen;
        self
    }
}

// ============================================================================
// Base64 Field Encoding
// ============================================================================

mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub(super) fn serialize_option<S: Serializer>(
        data: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serialize(bytes, serializer),
            None => serializer.serialize_none(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
