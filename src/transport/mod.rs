//! GATT transport capability.
//!
//! The proxy never talks to Bluetooth hardware itself. It drives a
//! [`Transport`] backend, of which there are two kinds:
//!
//! ```text
//! ┌──────────────────┐        ┌──────────────────┐
//! │ ConnectionRegistry│──────►│ dyn Transport     │
//! └──────────────────┘        ├──────────────────┤
//!                              │ Local adapter     │──► BLE radio
//!                              │ ESPHome proxies   │──► TCP :6053 ──► BLE radio
//!                              └──────────────────┘
//! ```
//!
//! Backends push notifications into the [`NotificationSink`] handed to
//! [`Transport::subscribe`]; they never call into sessions directly.
//!
//! Whether a backend exists at all is decided once at startup and passed to
//! the server as a [`TransportCapability`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `error` | [`TransportError`] |
//! | `simulated` | In-memory backend for tests and demos |

// ============================================================================
// Submodules
// ============================================================================

/// Backend error type.
pub mod error;

/// In-memory simulated backend.
pub mod simulated;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identifiers::{ConnectionHandle, MacAddress};
use crate::protocol::DiscoveredDevice;
use crate::router::NotificationSink;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::TransportError;
pub use simulated::{SimulatedDevice, SimulatedTransport};

// ============================================================================
// Constants
// ============================================================================

/// Default ESPHome native API port.
pub const DEFAULT_PROXY_PORT: u16 = 6053;

// ============================================================================
// Types
// ============================================================================

/// Result type for backend operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Which kind of backend is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportKind {
    /// Locally attached adapter.
    Local,
    /// One or more ESPHome Bluetooth proxies.
    Esphome,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Esphome => f.write_str("esphome"),
        }
    }
}

// ============================================================================
// ProxyInfo
// ============================================================================

/// A source through which devices can be reached.
///
/// For proxy backends this is one ESPHome node; local backends report a
/// single entry for the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    /// Proxy hostname (e.g. `living-room-proxy`).
    pub name: String,
    /// Network address.
    pub address: String,
    /// API port.
    pub port: u16,
    /// Proxy MAC address, if reported.
    pub mac_address: Option<MacAddress>,
    /// Whether the backend currently holds an API connection to it.
    pub connected: bool,
    /// Last time the proxy was seen.
    pub last_seen: DateTime<Utc>,
}

impl ProxyInfo {
    /// Creates a connected source on the default port.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: DEFAULT_PROXY_PORT,
            mac_address: None,
            connected: true,
            last_seen: Utc::now(),
        }
    }

    /// Sets the API port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the connectivity flag.
    #[inline]
    #[must_use]
    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }
}

// ============================================================================
// ConnectedDevice
// ============================================================================

/// What a backend reports after connecting to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedDevice {
    /// Handle for later operations.
    pub handle: ConnectionHandle,
    /// Device name, if known.
    pub name: Option<String>,
    /// Canonical device address.
    pub address: MacAddress,
    /// Service UUIDs found on the device.
    pub services: Vec<String>,
    /// Source (proxy/adapter) used for the connection.
    pub source: String,
    /// Writable characteristic, if the backend identified one.
    pub write_characteristic: Option<String>,
    /// Notifying characteristic, if the backend identified one.
    pub notify_characteristic: Option<String>,
}

// ============================================================================
// Transport
// ============================================================================

/// GATT operations a backend must provide.
///
/// Characteristics are addressed by UUID only; the backend resolves the
/// attribute handle. Devices exposing one UUID on several handles cannot be
/// disambiguated.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Returns the backend kind.
    fn kind(&self) -> TransportKind;

    /// Returns the sources this backend can scan through.
    fn sources(&self) -> Vec<ProxyInfo>;

    /// Connects to a device.
    ///
    /// With no address the backend picks the first device advertising
    /// `service_uuid`. Proxy backends choose the proxy with the best RSSI.
    async fn connect(
        &self,
        address: Option<&MacAddress>,
        service_uuid: Option<&str>,
    ) -> TransportResult<ConnectedDevice>;

    /// Disconnects a device.
    async fn disconnect(&self, handle: ConnectionHandle) -> TransportResult<()>;

    /// Writes to a characteristic.
    async fn write(
        &self,
        handle: ConnectionHandle,
        characteristic_uuid: &str,
        data: &[u8],
        with_response: bool,
    ) -> TransportResult<()>;

    /// Enables notifications and delivers them into `sink`.
    async fn subscribe(
        &self,
        handle: ConnectionHandle,
        characteristic_uuid: &str,
        sink: NotificationSink,
    ) -> TransportResult<()>;

    /// Asks the device to stop notifying.
    ///
    /// Backends that cannot stop device-level delivery may return `Ok` and
    /// keep pushing; the router filters those out.
    async fn unsubscribe(
        &self,
        handle: ConnectionHandle,
        characteristic_uuid: &str,
    ) -> TransportResult<()>;

    /// Scans through one source for `window`.
    async fn discover(
        &self,
        source: &ProxyInfo,
        service_uuid: Option<&str>,
        window: Duration,
    ) -> TransportResult<Vec<DiscoveredDevice>>;
}

// ============================================================================
// TransportCapability
// ============================================================================

/// Startup decision on whether a backend is usable.
#[derive(Clone)]
pub enum TransportCapability {
    /// A backend is configured.
    Available(Arc<dyn Transport>),
    /// No backend; sessions report this reason and close.
    Unavailable {
        /// Shown to clients.
        reason: String,
    },
}

impl TransportCapability {
    /// Wraps a backend.
    #[inline]
    #[must_use]
    pub fn available(transport: impl Transport) -> Self {
        Self::Available(Arc::new(transport))
    }

    /// Marks the capability as missing.
    #[inline]
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Returns `true` if a backend is configured.
    #[inline]
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl fmt::Debug for TransportCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available(transport) => f
                .debug_tuple("Available")
                .field(&transport.kind())
                .finish(),
            Self::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
