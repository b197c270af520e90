//! Per-session connection records.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::config::GattProfile;
use crate::identifiers::{ConnectionHandle, MacAddress};
use crate::router::characteristic_key;
use crate::transport::ConnectedDevice;

// ============================================================================
// ActiveConnection
// ============================================================================

/// The single live device connection a session may own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConnection {
    /// Backend handle.
    pub handle: ConnectionHandle,
    /// Canonical device address.
    pub address: MacAddress,
    /// Device name, if known.
    pub device_name: Option<String>,
    /// Proxy or adapter used to reach the device.
    pub source: String,
    /// Service requested at connect time.
    pub service_uuid: Option<String>,
    /// Characteristic writes are expected on.
    pub write_characteristic: Option<String>,
    /// Characteristic notifications are expected on.
    pub notify_characteristic: Option<String>,
    /// Services the device exposes.
    pub services: Vec<String>,
    /// Subscribed characteristics, uppercased.
    pub subscriptions: FxHashSet<String>,
}

impl ActiveConnection {
    /// Builds the record for a freshly connected device.
    ///
    /// Characteristics the device does not report fall back to `profile`.
    #[must_use]
    pub fn new(device: ConnectedDevice, service_uuid: Option<String>, profile: &GattProfile) -> Self {
        Self {
            handle: device.handle,
            address: device.address,
            device_name: device.name,
            source: device.source,
            service_uuid,
            write_characteristic: device
                .write_characteristic
                .or_else(|| profile.write_characteristic.clone()),
            notify_characteristic: device
                .notify_characteristic
                .or_else(|| profile.notify_characteristic.clone()),
            services: device.services,
            subscriptions: FxHashSet::default(),
        }
    }

    /// Returns the name shown to clients: device name, else address.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }

    /// Returns the recorded write characteristic if `characteristic_uuid`
    /// differs from it.
    #[must_use]
    pub fn write_mismatch(&self, characteristic_uuid: &str) -> Option<&str> {
        self.write_characteristic
            .as_deref()
            .filter(|expected| characteristic_key(expected) != characteristic_key(characteristic_uuid))
    }

    /// Records a subscription.
    pub fn add_subscription(&mut self, characteristic_uuid: &str) -> bool {
        self.subscriptions
            .insert(characteristic_key(characteristic_uuid))
    }

    /// Forgets a subscription.
    pub fn remove_subscription(&mut self, characteristic_uuid: &str) -> bool {
        self.subscriptions
            .remove(&characteristic_key(characteristic_uuid))
    }

    /// Returns `true` if the characteristic is subscribed.
    #[inline]
    #[must_use]
    pub fn is_subscribed(&self, characteristic_uuid: &str) -> bool {
        self.subscriptions
            .contains(&characteristic_key(characteristic_uuid))
    }

    /// Returns the client-facing summary.
    #[must_use]
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            device_name: self.device_name.clone(),
            device_address: self.address.clone(),
            services: self.services.clone(),
            source: self.source.clone(),
        }
    }
}

// ============================================================================
// ConnectionSummary
// ============================================================================

/// What a session learns about its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    /// Device name, if known.
    pub device_name: Option<String>,
    /// Canonical device address.
    pub device_address: MacAddress,
    /// Services the device exposes.
    pub services: Vec<String>,
    /// Proxy or adapter used.
    pub source: String,
}

impl ConnectionSummary {
    /// Returns the name shown to clients: device name, else address.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| self.device_address.to_string())
    }
}

// ============================================================================
// WriteOutcome
// ============================================================================

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes handed to the transport.
    pub bytes_written: usize,
    /// Recorded write characteristic, when the client wrote elsewhere.
    pub expected_characteristic: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
