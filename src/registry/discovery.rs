//! Device discovery across all connected sources.
//!
//! Every source scans in parallel for the same window. Results are merged by
//! address, keeping the sighting with the strongest signal so that
//! `bestSource` names the proxy a later connect should go through.

// ============================================================================
// Imports
// ============================================================================

use std::collections::hash_map::Entry;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::future::join_all;
use rustc_hash::FxHashMap;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::MacAddress;
use crate::protocol::DiscoveredDevice;
use crate::transport::ProxyInfo;

use super::{ConnectionRegistry, duration_millis};

// ============================================================================
// Constants
// ============================================================================

/// Extra time a source gets beyond the scan window before it counts as
/// timed out.
pub const DISCOVERY_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// ConnectionRegistry - Discovery
// ============================================================================

impl ConnectionRegistry {
    /// Scans every connected source and merges the results.
    ///
    /// # Arguments
    ///
    /// * `service_uuid` - Only report devices advertising this service
    /// * `window` - Scan window (defaults to the configured discovery timeout)
    ///
    /// # Errors
    ///
    /// - [`Error::OperationFailed`] if no source is connected, or every
    ///   source failed
    /// - [`Error::ConnectionTimeout`] if every source timed out
    pub async fn discover_devices(
        &self,
        service_uuid: Option<&str>,
        window: Option<Duration>,
    ) -> Result<Vec<DiscoveredDevice>> {
        let window = window.unwrap_or(self.options.discovery_timeout);
        let bound = window + DISCOVERY_GRACE;

        let sources: Vec<ProxyInfo> = self
            .transport
            .sources()
            .into_iter()
            .filter(|source| source.connected)
            .collect();

        if sources.is_empty() {
            return Err(Error::operation_failed("discovery", "no connected BLE sources"));
        }

        info!(sources = sources.len(), window_ms = duration_millis(window), service = ?service_uuid, "Starting discovery");

        let scans = sources.iter().map(|source| async move {
            let outcome = timeout(bound, self.transport.discover(source, service_uuid, window)).await;
            (source, outcome)
        });

        let mut sightings = Vec::new();
        let mut failures = Vec::new();
        let mut timed_out = 0usize;

        for (source, outcome) in join_all(scans).await {
            match outcome {
                Ok(Ok(devices)) => {
                    debug!(source = %source.name, found = devices.len(), "Source scan complete");
                    sightings.extend(devices);
                }
                Ok(Err(e)) => {
                    warn!(source = %source.name, error = %e, "Source scan failed");
                    failures.push(format!("{}: {e}", source.name));
                }
                Err(_) => {
                    warn!(source = %source.name, timeout_ms = duration_millis(bound), "Source scan timed out");
                    timed_out += 1;
                }
            }
        }

        if failures.len() + timed_out == sources.len() {
            if failures.is_empty() {
                return Err(Error::connection_timeout(duration_millis(bound)));
            }
            return Err(Error::operation_failed("discovery", failures.join("; ")));
        }

        let devices = merge_best_source(sightings);
        self.devices_discovered.store(devices.len(), Ordering::Relaxed);

        info!(devices = devices.len(), failed = failures.len(), timed_out, "Discovery complete");
        Ok(devices)
    }
}

// ============================================================================
// Merging
// ============================================================================

/// Collapses sightings to one entry per address, strongest signal first.
///
/// On equal RSSI the earliest sighting wins.
#[must_use]
pub fn merge_best_source(sightings: impl IntoIterator<Item = DiscoveredDevice>) -> Vec<DiscoveredDevice> {
    let mut best: FxHashMap<MacAddress, DiscoveredDevice> = FxHashMap::default();

    for sighting in sightings {
        match best.entry(sighting.mac_address.clone()) {
            Entry::Occupied(mut entry) => {
                if sighting.rssi > entry.get().rssi {
                    entry.insert(sighting);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(sighting);
            }
        }
    }

    let mut devices: Vec<DiscoveredDevice> = best.into_values().collect();
    devices.sort_by(|a, b| {
        b.rssi
            .cmp(&a.rssi)
            .then_with(|| a.mac_address.cmp(&b.mac_address))
    });
    devices
}

// ============================================================================
// Tests
// ============================================================================
