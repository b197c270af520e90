//! Proxy runtime options.
//!
//! [`ProxyOptions`] is a plain struct with sensible defaults. Construct it
//! directly or through [`super::ProxyOptionsBuilder`], which validates.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use ble_gatt_proxy::{GattProfile, ProxyOptions};
//!
//! let options = ProxyOptions::default()
//!     .with_port(8080)
//!     .with_connection_timeout(Duration::from_secs(15))
//!     .with_profile(GattProfile::new("0000fff0-0000-1000-8000-00805f9b34fb"));
//!
//! assert_eq!(options.ws_path, "/api/v1/ble/ws");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default WebSocket endpoint path.
pub const DEFAULT_WS_PATH: &str = "/api/v1/ble/ws";

/// Default bound on a device connect.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default discovery scan window.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// GattProfile
// ============================================================================

/// Fallback GATT UUIDs for devices the client does not fully describe.
///
/// Used when `connect` omits a service UUID or the device reports no
/// write/notify characteristic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GattProfile {
    /// Primary service UUID.
    pub service_uuid: Option<String>,
    /// Characteristic written to.
    pub write_characteristic: Option<String>,
    /// Characteristic that notifies.
    pub notify_characteristic: Option<String>,
}

impl GattProfile {
    /// Creates a profile for a service with no known characteristics.
    #[inline]
    #[must_use]
    pub fn new(service_uuid: impl Into<String>) -> Self {
        Self {
            service_uuid: Some(service_uuid.into()),
            ..Default::default()
        }
    }

    /// Sets the write characteristic.
    #[inline]
    #[must_use]
    pub fn with_write_characteristic(mut self, uuid: impl Into<String>) -> Self {
        self.write_characteristic = Some(uuid.into());
        self
    }

    /// Sets the notify characteristic.
    #[inline]
    #[must_use]
    pub fn with_notify_characteristic(mut self, uuid: impl Into<String>) -> Self {
        self.notify_characteristic = Some(uuid.into());
        self
    }
}

// ============================================================================
// ProxyOptions
// ============================================================================

/// Runtime configuration for the proxy server and registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Address to bind the listener to.
    pub bind_ip: IpAddr,

    /// Port to bind to (0 for random).
    pub port: u16,

    /// Path WebSocket upgrades are accepted on.
    pub ws_path: String,

    /// Upper bound on a single device connect.
    pub connection_timeout: Duration,

    /// Scan window used when `discover` carries no timeout.
    pub discovery_timeout: Duration,

    /// Fallback service and characteristic UUIDs.
    pub profile: GattProfile,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            bind_ip: DEFAULT_BIND_IP,
            port: 0,
            ws_path: DEFAULT_WS_PATH.to_string(),
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            profile: GattProfile::default(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ProxyOptions {
    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Sets the port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the WebSocket path.
    #[inline]
    #[must_use]
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the default discovery window.
    #[inline]
    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Sets the fallback GATT profile.
    #[inline]
    #[must_use]
    pub fn with_profile(mut self, profile: GattProfile) -> Self {
        self.profile = profile;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ProxyOptions {
    /// Returns the socket address to bind.
    #[inline]
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ProxyOptions::default();
        assert_eq!(options.bind_ip, DEFAULT_BIND_IP);
        assert_eq!(options.port, 0);
        assert_eq!(options.ws_path, "/api/v1/ble/ws");
        assert_eq!(options.connection_timeout.as_secs(), 30);
        assert_eq!(options.discovery_timeout.as_secs(), 10);
        assert_eq!(options.profile, GattProfile::default());
    }

    #[test]
    fn test_with_methods_chain() {
        let options = ProxyOptions::default()
            .with_port(9000)
            .with_ws_path("/ws")
            .with_discovery_timeout(Duration::from_secs(3));

        assert_eq!(options.socket_addr().port(), 9000);
        assert_eq!(options.ws_path, "/ws");
        assert_eq!(options.discovery_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_profile_builder() {
        let profile = GattProfile::new("fff0")
            .with_write_characteristic("fff2")
            .with_notify_characteristic("fff1");

        assert_eq!(profile.service_uuid.as_deref(), Some("fff0"));
        assert_eq!(profile.write_characteristic.as_deref(), Some("fff2"));
        assert_eq!(profile.notify_characteristic.as_deref(), Some("fff1"));
    }
}
