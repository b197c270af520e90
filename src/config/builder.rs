//! Builder pattern for proxy configuration.
//!
//! Provides a fluent API for creating validated [`ProxyOptions`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use ble_gatt_proxy::ProxyOptions;
//!
//! # fn example() -> ble_gatt_proxy::Result<()> {
//! let options = ProxyOptions::builder()
//!     .port(8080)
//!     .connection_timeout(Duration::from_secs(15))
//!     .service_uuid("0000fff0-0000-1000-8000-00805f9b34fb")
//!     .build()?;
//!
//! assert_eq!(options.port, 8080);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::time::Duration;

use crate::error::{Error, Result};

use super::options::{GattProfile, ProxyOptions};

// ============================================================================
// ProxyOptionsBuilder
// ============================================================================

/// Builder for validated [`ProxyOptions`].
///
/// Use [`ProxyOptions::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ProxyOptionsBuilder {
    /// Options being built.
    options: ProxyOptions,
}

impl ProxyOptions {
    /// Creates a builder starting from the defaults.
    #[inline]
    #[must_use]
    pub fn builder() -> ProxyOptionsBuilder {
        ProxyOptionsBuilder::new()
    }
}

// ============================================================================
// ProxyOptionsBuilder Implementation
// ============================================================================

impl ProxyOptionsBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.options.bind_ip = ip;
        self
    }

    /// Sets the port (0 for random).
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Sets the WebSocket path.
    ///
    /// # Arguments
    ///
    /// * `path` - Absolute request path (e.g., "/api/v1/ble/ws")
    #[inline]
    #[must_use]
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.options.ws_path = path.into();
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.options.connection_timeout = timeout;
        self
    }

    /// Sets the default discovery window.
    #[inline]
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.options.discovery_timeout = timeout;
        self
    }

    /// Sets the fallback service UUID.
    #[inline]
    #[must_use]
    pub fn service_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.options.profile.service_uuid = Some(uuid.into());
        self
    }

    /// Sets the fallback write characteristic.
    #[inline]
    #[must_use]
    pub fn write_characteristic(mut self, uuid: impl Into<String>) -> Self {
        self.options.profile.write_characteristic = Some(uuid.into());
        self
    }

    /// Sets the fallback notify characteristic.
    #[inline]
    #[must_use]
    pub fn notify_characteristic(mut self, uuid: impl Into<String>) -> Self {
        self.options.profile.notify_characteristic = Some(uuid.into());
        self
    }

    /// Replaces the whole fallback profile.
    #[inline]
    #[must_use]
    pub fn profile(mut self, profile: GattProfile) -> Self {
        self.options.profile = profile;
        self
    }

    /// Builds the options with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the WebSocket path is not absolute
    /// - [`Error::Config`] if either timeout is zero
    /// - [`Error::Config`] if a profile UUID is blank
    pub fn build(self) -> Result<ProxyOptions> {
        self.validate_path()?;
        self.validate_timeouts()?;
        self.validate_profile()?;

        Ok(self.options)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ProxyOptionsBuilder {
    /// Validates the WebSocket path.
    fn validate_path(&self) -> Result<()> {
        let path = &self.options.ws_path;

        if !path.starts_with('/') {
            return Err(Error::config(format!(
                "WebSocket path must start with '/': {path:?}\n\
                 Example: ProxyOptions::builder().ws_path(\"/api/v1/ble/ws\")"
            )));
        }

        if path.contains('?') || path.contains('#') {
            return Err(Error::config(format!(
                "WebSocket path must not carry a query or fragment: {path:?}"
            )));
        }

        Ok(())
    }

    /// Validates the timeouts.
    fn validate_timeouts(&self) -> Result<()> {
        if self.options.connection_timeout.is_zero() {
            return Err(Error::config("Connection timeout must be greater than zero"));
        }

        if self.options.discovery_timeout.is_zero() {
            return Err(Error::config("Discovery timeout must be greater than zero"));
        }

        Ok(())
    }

    /// Validates the fallback profile.
    fn validate_profile(&self) -> Result<()> {
        let profile = &self.options.profile;
        let fields = [
            ("service UUID", &profile.service_uuid),
            ("write characteristic", &profile.write_characteristic),
            ("notify characteristic", &profile.notify_characteristic),
        ];

        for (label, value) in fields {
            if let Some(uuid) = value
                && uuid.trim().is_empty()
            {
                return Err(Error::config(format!("Default {label} must not be blank")));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
