//! In-memory transport backend.
//!
//! [`SimulatedTransport`] behaves like a proxy-backed GATT stack without any
//! radio. It is used by the test suite, the codec bench and local demos.
//!
//! - Devices are registered up front with per-source RSSI.
//! - Connect delay and failures can be injected at runtime.
//! - Every write, connect and disconnect is recorded for assertions.
//! - [`SimulatedTransport::emit_notification`] pushes values as a device
//!   would.
//!
//! Unsubscribe follows proxy semantics: the call succeeds but device-level
//! delivery keeps going, so filtering is left to the router.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::identifiers::{ConnectionHandle, MacAddress};
use crate::protocol::DiscoveredDevice;
use crate::registry::duration_millis;
use crate::router::{NotificationSink, characteristic_key};

use super::{ConnectedDevice, ProxyInfo, Transport, TransportError, TransportKind, TransportResult};

// ============================================================================
// Constants
// ============================================================================

/// Source name reported by a simulated local adapter.
pub const LOCAL_ADAPTER: &str = "local-adapter";

// ============================================================================
// SimulatedDevice
// ============================================================================

/// A peripheral known to the simulated backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    /// Canonical address.
    pub address: MacAddress,
    /// Advertised name.
    pub name: Option<String>,
    /// Exposed service UUIDs.
    pub services: Vec<String>,
    /// Writable characteristic.
    pub write_characteristic: Option<String>,
    /// Notifying characteristic.
    pub notify_characteristic: Option<String>,
    /// RSSI per source that can see the device.
    pub rssi: FxHashMap<String, i16>,
    /// Raw advertisement payload.
    pub advertisement: Option<Vec<u8>>,
}

impl SimulatedDevice {
    /// Creates a device with no services and no sightings.
    #[must_use]
    pub fn new(address: MacAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
            services: Vec::new(),
            write_characteristic: None,
            notify_characteristic: None,
            rssi: FxHashMap::default(),
            advertisement: None,
        }
    }

    /// Adds an exposed service.
    #[inline]
    #[must_use]
    pub fn with_service(mut self, uuid: impl Into<String>) -> Self {
        self.services.push(uuid.into());
        self
    }

    /// Sets the write and notify characteristics.
    #[inline]
    #[must_use]
    pub fn with_characteristics(mut self, write: impl Into<String>, notify: impl Into<String>) -> Self {
        self.write_characteristic = Some(write.into());
        self.notify_characteristic = Some(notify.into());
        self
    }

    /// Makes the device visible to `source` at `rssi` dBm.
    #[inline]
    #[must_use]
    pub fn seen_by(mut self, source: impl Into<String>, rssi: i16) -> Self {
        self.rssi.insert(source.into(), rssi);
        self
    }

    /// Sets the advertisement payload.
    #[inline]
    #[must_use]
    pub fn with_advertisement(mut self, payload: Vec<u8>) -> Self {
        self.advertisement = Some(payload);
        self
    }

    /// Returns `true` if the device exposes `service_uuid`.
    fn offers(&self, service_uuid: &str) -> bool {
        self.services
            .iter()
            .any(|s| s.eq_ignore_ascii_case(service_uuid))
    }

    /// Returns the source with the strongest signal.
    fn best_source(&self) -> Option<&str> {
        self.rssi
            .iter()
            .max_by_key(|(_, rssi)| **rssi)
            .map(|(source, _)| source.as_str())
    }
}

// ============================================================================
// WriteRecord
// ============================================================================

/// A write observed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Connection written to.
    pub handle: ConnectionHandle,
    /// Target characteristic as sent.
    pub characteristic_uuid: String,
    /// Bytes written.
    pub data: Vec<u8>,
    /// Whether a response was requested.
    pub with_response: bool,
}

// ============================================================================
// Internal State
// ============================================================================

/// One open device link.
#[derive(Debug)]
struct Link {
    address: MacAddress,
    /// Device-level subscriptions: normalized UUID → (UUID as subscribed, sink).
    subscriptions: FxHashMap<String, (String, NotificationSink)>,
}

#[derive(Debug, Default)]
struct State {
    sources: Vec<ProxyInfo>,
    devices: Vec<SimulatedDevice>,
    links: FxHashMap<ConnectionHandle, Link>,

    connect_delay: Duration,
    connect_failure: Option<TransportError>,
    disconnect_delay: Duration,
    disconnect_failure: Option<TransportError>,
    write_failure: Option<TransportError>,
    unsubscribe_failure: Option<TransportError>,
    discovery_failures: FxHashMap<String, TransportError>,
    discovery_delays: FxHashMap<String, Duration>,

    connects: Vec<MacAddress>,
    disconnects: Vec<ConnectionHandle>,
    writes: Vec<WriteRecord>,
    unsubscribes: usize,
}

// ============================================================================
// SimulatedTransport
// ============================================================================

/// In-memory [`Transport`] implementation.
///
/// # Example
///
/// ```
/// use ble_gatt_proxy::identifiers::MacAddress;
/// use ble_gatt_proxy::transport::{ProxyInfo, SimulatedDevice, SimulatedTransport, TransportKind};
///
/// let address = MacAddress::parse("aa:bb:cc:dd:ee:ff").expect("valid address");
/// let transport = SimulatedTransport::new(TransportKind::Esphome)
///     .with_source(ProxyInfo::new("garage-proxy", "192.168.1.41"))
///     .with_device(SimulatedDevice::new(address, "Thermometer").seen_by("garage-proxy", -58));
///
/// assert_eq!(transport.device_count(), 1);
/// ```
#[derive(Debug)]
pub struct SimulatedTransport {
    kind: TransportKind,
    state: Mutex<State>,
}

// ============================================================================
// SimulatedTransport - Constructor
// ============================================================================

impl SimulatedTransport {
    /// Creates an empty backend.
    ///
    /// A local backend starts with a single adapter source named
    /// [`LOCAL_ADAPTER`]; a proxy backend starts with no sources.
    #[must_use]
    pub fn new(kind: TransportKind) -> Self {
        let mut state = State::default();

        if kind == TransportKind::Local {
            state.sources.push(ProxyInfo::new(LOCAL_ADAPTER, "hci0").with_port(0));
        }

        Self {
            kind,
            state: Mutex::new(state),
        }
    }

    /// Adds a source.
    #[must_use]
    pub fn with_source(self, source: ProxyInfo) -> Self {
        self.state.lock().sources.push(source);
        self
    }

    /// Adds a device.
    #[must_use]
    pub fn with_device(self, device: SimulatedDevice) -> Self {
        self.state.lock().devices.push(device);
        self
    }
}

// ============================================================================
// SimulatedTransport - Fault Injection
// ============================================================================

impl SimulatedTransport {
    /// Delays every connect by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    /// Makes connects fail with `error` (or succeed again with `None`).
    pub fn set_connect_failure(&self, error: Option<TransportError>) {
        self.state.lock().connect_failure = error;
    }

    /// Delays every disconnect by `delay`.
    pub fn set_disconnect_delay(&self, delay: Duration) {
        self.state.lock().disconnect_delay = delay;
    }

    /// Makes disconnects fail with `error` (or succeed again with `None`).
    ///
    /// A failed disconnect leaves the device link open.
    pub fn set_disconnect_failure(&self, error: Option<TransportError>) {
        self.state.lock().disconnect_failure = error;
    }

    /// Makes writes fail with `error` (or succeed again with `None`).
    pub fn set_write_failure(&self, error: Option<TransportError>) {
        self.state.lock().write_failure = error;
    }

    /// Makes unsubscribes fail with `error` (or succeed again with `None`).
    pub fn set_unsubscribe_failure(&self, error: Option<TransportError>) {
        self.state.lock().unsubscribe_failure = error;
    }

    /// Makes discovery through `source` fail.
    pub fn fail_discovery(&self, source: impl Into<String>, error: TransportError) {
        self.state.lock().discovery_failures.insert(source.into(), error);
    }

    /// Delays discovery through `source` by `delay`.
    pub fn delay_discovery(&self, source: impl Into<String>, delay: Duration) {
        self.state.lock().discovery_delays.insert(source.into(), delay);
    }
}

// ============================================================================
// SimulatedTransport - Inspection
// ============================================================================

impl SimulatedTransport {
    /// Pushes a value from the device at `address` to every sink subscribed
    /// to `characteristic_uuid` on it.
    ///
    /// Returns how many sinks accepted the value.
    pub fn emit_notification(
        &self,
        address: &MacAddress,
        characteristic_uuid: &str,
        payload: &[u8],
    ) -> usize {
        let key = characteristic_key(characteristic_uuid);
        let state = self.state.lock();
        let mut delivered = 0;

        for (handle, link) in &state.links {
            if &link.address != address {
                continue;
            }

            if let Some((uuid, sink)) = link.subscriptions.get(&key)
                && sink.push(*handle, uuid.as_str(), payload)
            {
                delivered += 1;
            }
        }

        delivered
    }

    /// Returns every write seen so far.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().writes.clone()
    }

    /// Returns every address connected so far, in order.
    #[must_use]
    pub fn connects(&self) -> Vec<MacAddress> {
        self.state.lock().connects.clone()
    }

    /// Returns every handle disconnected so far, in order.
    #[must_use]
    pub fn disconnects(&self) -> Vec<ConnectionHandle> {
        self.state.lock().disconnects.clone()
    }

    /// Returns how many unsubscribe calls were made.
    #[inline]
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.state.lock().unsubscribes
    }

    /// Returns the number of open device links.
    #[inline]
    #[must_use]
    pub fn open_links(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Returns the number of registered devices.
    #[inline]
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }
}

// ============================================================================
// SimulatedTransport - Resolution
// ============================================================================

impl SimulatedTransport {
    /// Picks the device a connect request targets.
    fn resolve(
        state: &State,
        address: Option<&MacAddress>,
        service_uuid: Option<&str>,
    ) -> TransportResult<SimulatedDevice> {
        let found = match (address, service_uuid) {
            (Some(address), _) => state.devices.iter().find(|d| &d.address == address),
            (None, Some(service)) => state.devices.iter().find(|d| d.offers(service)),
            (None, None) => state.devices.first(),
        };

        found.cloned().ok_or_else(|| {
            let wanted = address
                .map(ToString::to_string)
                .or_else(|| service_uuid.map(|s| format!("service {s}")))
                .unwrap_or_else(|| "any device".to_string());
            TransportError::DeviceNotFound(wanted)
        })
    }

    /// Picks the source used to reach a device.
    fn route_source(&self, state: &State, device: &SimulatedDevice) -> String {
        if self.kind == TransportKind::Local {
            return LOCAL_ADAPTER.to_string();
        }

        device
            .best_source()
            .or_else(|| state.sources.first().map(|s| s.name.as_str()))
            .unwrap_or(LOCAL_ADAPTER)
            .to_string()
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

#[async_trait]
impl Transport for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn sources(&self) -> Vec<ProxyInfo> {
        self.state.lock().sources.clone()
    }

    async fn connect(
        &self,
        address: Option<&MacAddress>,
        service_uuid: Option<&str>,
    ) -> TransportResult<ConnectedDevice> {
        let delay = self.state.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();

        if let Some(error) = state.connect_failure.clone() {
            return Err(error);
        }

        let device = Self::resolve(&state, address, service_uuid)?;
        let source = self.route_source(&state, &device);
        let handle = ConnectionHandle::next();

        state.links.insert(
            handle,
            Link {
                address: device.address.clone(),
                subscriptions: FxHashMap::default(),
            },
        );
        state.connects.push(device.address.clone());

        debug!(%handle, address = %device.address, %source, "Simulated device connected");

        Ok(ConnectedDevice {
            handle,
            name: device.name,
            address: device.address,
            services: device.services,
            source,
            write_characteristic: device.write_characteristic,
            notify_characteristic: device.notify_characteristic,
        })
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> TransportResult<()> {
        let delay = self.state.lock().disconnect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();

        if !state.links.contains_key(&handle) {
            return Err(TransportError::UnknownHandle(handle));
        }

        if let Some(error) = state.disconnect_failure.clone() {
            return Err(error);
        }

        state.links.remove(&handle);
        state.disconnects.push(handle);
        debug!(%handle, "Simulated device disconnected");
        Ok(())
    }

    async fn write(
        &self,
        handle: ConnectionHandle,
        characteristic_uuid: &str,
        data: &[u8],
        with_response: bool,
    ) -> TransportResult<()> {
        let mut state = self.state.lock();

        if !state.links.contains_key(&handle) {
            return Err(TransportError::UnknownHandle(handle));
        }

        if let Some(error) = state.write_failure.clone() {
            return Err(error);
        }

        state.writes.push(WriteRecord {
            handle,
            characteristic_uuid: characteristic_uuid.to_string(),
            data: data.to_vec(),
            with_response,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: ConnectionHandle,
        characteristic_uuid: &str,
        sink: NotificationSink,
    ) -> TransportResult<()> {
        let mut state = self.state.lock();

        let link = state
            .links
            .get_mut(&handle)
            .ok_or(TransportError::UnknownHandle(handle))?;

        link.subscriptions.insert(
            characteristic_key(characteristic_uuid),
            (characteristic_uuid.to_string(), sink),
        );
        Ok(())
    }

    async fn unsubscribe(
        &self,
        handle: ConnectionHandle,
        _characteristic_uuid: &str,
    ) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.unsubscribes += 1;

        if !state.links.contains_key(&handle) {
            return Err(TransportError::UnknownHandle(handle));
        }

        match state.unsubscribe_failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn discover(
        &self,
        source: &ProxyInfo,
        service_uuid: Option<&str>,
        window: Duration,
    ) -> TransportResult<Vec<DiscoveredDevice>> {
        let delay = self.state.lock().discovery_delays.get(&source.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();

        if let Some(error) = state.discovery_failures.get(&source.name) {
            return Err(error.clone());
        }

        let devices = state
            .devices
            .iter()
            .filter(|d| service_uuid.is_none_or(|service| d.offers(service)))
            .filter_map(|d| {
                let rssi = match self.kind {
                    TransportKind::Local => d.best_source().and_then(|s| d.rssi.get(s)),
                    TransportKind::Esphome => d.rssi.get(&source.name),
                }?;

                let mut seen = DiscoveredDevice::new(
                    d.address.clone(),
                    d.name.clone().unwrap_or_default(),
                    *rssi,
                    source.name.clone(),
                );
                if let Some(payload) = &d.advertisement {
                    seen = seen.with_advertisement(payload.clone());
                }
                Some(seen)
            })
            .collect::<Vec<_>>();

        debug!(source = %source.name, found = devices.len(), window_ms = duration_millis(window), "Simulated scan complete");
        Ok(devices)
    }
}

// ============================================================================
// Tests
// ============================================================================
