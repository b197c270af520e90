//! Error type reported by GATT transport backends.

use thiserror::Error;

use crate::identifiers::{ConnectionHandle, MacAddress};

/// A failure inside a transport backend.
///
/// The registry never shows these to clients directly; they become
/// [`crate::Error::OperationFailed`] with the display text as the cause.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No device matched the connect request.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device refused or dropped the connection.
    #[error("Device {address} rejected connection: {message}")]
    ConnectionRejected {
        /// Device that refused.
        address: MacAddress,
        /// Backend-provided reason.
        message: String,
    },

    /// The handle does not refer to a live connection.
    #[error("Unknown connection handle: {0}")]
    UnknownHandle(ConnectionHandle),

    /// The characteristic is not exposed by the connected device.
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// A proxy or adapter could not be reached.
    #[error("Source {name} unavailable: {message}")]
    SourceUnavailable {
        /// Proxy or adapter name.
        name: String,
        /// Backend-provided reason.
        message: String,
    },

    /// A GATT operation returned an error.
    #[error("GATT error: {0}")]
    Gatt(String),
}

impl TransportError {
    /// Creates a GATT error.
    #[inline]
    pub fn gatt(message: impl Into<String>) -> Self {
        Self::Gatt(message.into())
    }

    /// Creates a source unavailable error.
    #[inline]
    pub fn source_unavailable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            name: name.into(),
            message: message.into(),
        }
    }
}
