//! Error types for the BLE GATT proxy.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ble_gatt_proxy::{Error, Result};
//!
//! async fn example(registry: &ConnectionRegistry, session_id: SessionId) -> Result<()> {
//!     registry.write(session_id, "0000fff2-0000-1000-8000-00805f9b34fb", &[1, 2, 3], true).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Protocol | [`Error::MalformedJson`], [`Error::SchemaInvalid`], [`Error::InvalidMacAddress`] |
//! | Capability | [`Error::TransportUnavailable`] |
//! | Device | [`Error::ConnectionTimeout`], [`Error::OperationFailed`], [`Error::NotConnected`] |
//! | Configuration | [`Error::Config`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ConnectionClosed`] |
//!
//! Every variant maps to a stable camelCase code via [`Error::code`], which is
//! what clients see in the `details` object of an `error` event.

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Display;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Frame is not valid JSON.
    ///
    /// Returned by the codec when the raw text fails to parse.
    #[error("Invalid JSON: {message}")]
    MalformedJson {
        /// Parser error description.
        message: String,
    },

    /// Frame is valid JSON but violates the command schema.
    ///
    /// Returned for missing or mistyped fields and unknown command tags.
    #[error("Invalid message format: {field}: {message}")]
    SchemaInvalid {
        /// Wire name of the offending field.
        field: String,
        /// Description of the violation.
        message: String,
    },

    /// MAC address does not match `AA:BB:CC:DD:EE:FF`.
    #[error("Invalid MAC address format: {input}. Expected format: AA:BB:CC:DD:EE:FF")]
    InvalidMacAddress {
        /// The rejected input.
        input: String,
    },

    // ========================================================================
    // Capability Errors
    // ========================================================================
    /// No GATT transport backend is configured.
    ///
    /// Sent once when a session starts without a usable backend.
    #[error("BLE proxy not available: {reason}")]
    TransportUnavailable {
        /// Why the backend is missing.
        reason: String,
    },

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// Connect or discovery exceeded its bound.
    #[error("Connection timeout after {timeout_ms}ms - device may be out of range or busy")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Transport reported a failure.
    #[error("{operation} failed: {cause}")]
    OperationFailed {
        /// Operation that failed (`connect`, `write`, ...).
        operation: String,
        /// Underlying cause reported by the transport.
        cause: String,
    },

    /// Operation requires an active device connection.
    #[error("No active connection - connect first")]
    NotConnected,

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when proxy options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Client connection closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a malformed JSON error.
    #[inline]
    pub fn malformed_json(message: impl Into<String>) -> Self {
        Self::MalformedJson {
            message: message.into(),
        }
    }

    /// Creates a schema violation error for a wire field.
    #[inline]
    pub fn schema_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaInvalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid MAC address error.
    #[inline]
    pub fn invalid_mac_address(input: impl Into<String>) -> Self {
        Self::InvalidMacAddress {
            input: input.into(),
        }
    }

    /// Creates a transport unavailable error.
    #[inline]
    pub fn transport_unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates an operation failed error from any displayable cause.
    #[inline]
    pub fn operation_failed(operation: impl Into<String>, cause: impl Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the client sent an invalid frame.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedJson { .. } | Self::SchemaInvalid { .. } | Self::InvalidMacAddress { .. }
        )
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if the client connection itself is gone.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::WebSocket(_))
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::OperationFailed { .. } | Self::NotConnected
        )
    }
}

// ============================================================================
// Wire Representation
// ============================================================================

impl Error {
    /// Returns the stable code reported to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedJson { .. } => "malformedJson",
            Self::SchemaInvalid { .. } => "schemaInvalid",
            Self::InvalidMacAddress { .. } => "invalidMacAddress",
            Self::TransportUnavailable { .. } => "transportUnavailable",
            Self::ConnectionTimeout { .. } => "connectionTimeout",
            Self::OperationFailed { .. } => "operationFailed",
            Self::NotConnected => "notConnected",
            Self::Config { .. } => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::WebSocket(_) => "webSocket",
            Self::ConnectionClosed => "connectionClosed",
        }
    }

    /// Builds the `details` object for an `error` event.
    ///
    /// Always carries `code`, plus whatever context the variant holds.
    #[must_use]
    pub fn details(&self) -> Value {
        let mut details = Map::new();
        details.insert("code".into(), json!(self.code()));

        match self {
            Self::SchemaInvalid { field, .. } => {
                details.insert("field".into(), json!(field));
            }
            Self::InvalidMacAddress { input } => {
                details.insert("input".into(), json!(input));
            }
            Self::ConnectionTimeout { timeout_ms } => {
                details.insert("timeoutMs".into(), json!(timeout_ms));
            }
            Self::OperationFailed { operation, cause } => {
                details.insert("operation".into(), json!(operation));
                details.insert("cause".into(), json!(cause));
            }
            _ => {}
        }

        Value::Object(details)
    }
}

// ============================================================================
// Tests
// ============================================================================
