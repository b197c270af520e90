//! Connection registry.
//!
//! Maps each session to at most one live device connection and owns the
//! connect, disconnect and GATT orchestration on top of the transport.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              ConnectionRegistry              │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ SessionId A → Mutex<Some(connection)>  │  │
//! │  │ SessionId B → Mutex<None>  (connecting)│  │
//! │  └────────────────────────────────────────┘  │
//! │        │                      │              │
//! │   dyn Transport       NotificationRouter     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! The outer map is a short-lived `parking_lot` lock. Each entry is a
//! `tokio` mutex held across transport I/O, so operations on one session are
//! serialized while different sessions proceed concurrently. A slot is
//! re-validated after its lock is acquired; if it was removed meanwhile the
//! caller retries against a fresh slot.
//!
//! Backend disconnects run on their own task. Cancelling the caller (for
//! example an aborted session) cannot leave a device connected, and
//! `disconnect_all` waits for every such task before returning.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | [`ActiveConnection`] and its summaries |
//! | `discovery` | Multi-source device discovery |

// ============================================================================
// Submodules
// ============================================================================

/// Connection records.
pub mod connection;

/// Device discovery across sources.
pub mod discovery;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ProxyOptions;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionHandle, MacAddress, SessionId};
use crate::router::{NotificationRouter, NotificationSink};
use crate::transport::{Transport, TransportKind};

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{ActiveConnection, ConnectionSummary, WriteOutcome};
pub use discovery::{DISCOVERY_GRACE, merge_best_source};

// ============================================================================
// Constants
// ============================================================================

/// Cause reported for connects attempted during shutdown.
const SHUTTING_DOWN: &str = "proxy is shutting down";

// ============================================================================
// Types
// ============================================================================

/// Per-session connection slot.
type Slot = Arc<Mutex<Option<ActiveConnection>>>;

/// Locked slot.
type SlotGuard = OwnedMutexGuard<Option<ActiveConnection>>;

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
#[inline]
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Counts one in-flight backend disconnect until dropped.
struct PendingRelease(Arc<watch::Sender<usize>>);

impl PendingRelease {
    fn new(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|pending| *pending += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingRelease {
    fn drop(&mut self) {
        self.0.send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}

/// Snapshot of proxy health for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    /// Whether the proxy accepts new connections.
    pub enabled: bool,
    /// Number of sources the backend knows about.
    pub proxies_discovered: usize,
    /// Devices found by the last discovery.
    pub devices_discovered: usize,
    /// Backend kind.
    pub mode: TransportKind,
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Tracks device connections by session.
///
/// Built once by the server and shared with every session handler.
pub struct ConnectionRegistry {
    /// GATT backend.
    transport: Arc<dyn Transport>,

    /// Notification fan-out to sessions.
    router: Arc<NotificationRouter>,

    /// Entry point handed to the backend on subscribe.
    sink: NotificationSink,

    /// Timeouts and fallback profile.
    options: ProxyOptions,

    /// Connection slots by session.
    slots: RwLock<FxHashMap<SessionId, Slot>>,

    /// Set once `disconnect_all` starts.
    closing: AtomicBool,

    /// Device count from the last discovery.
    devices_discovered: AtomicUsize,

    /// Backend disconnects still running.
    releasing: Arc<watch::Sender<usize>>,
}

// ============================================================================
// ConnectionRegistry - Constructor
// ============================================================================

impl ConnectionRegistry {
    /// Creates a registry and spawns its notification router.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, options: ProxyOptions) -> Self {
        let (router, sink) = NotificationRouter::spawn();

        debug!(mode = %transport.kind(), "ConnectionRegistry created");

        Self {
            transport,
            router,
            sink,
            options,
            slots: RwLock::new(FxHashMap::default()),
            closing: AtomicBool::new(false),
            devices_discovered: AtomicUsize::new(0),
            releasing: Arc::new(watch::channel(0).0),
        }
    }
}

// ============================================================================
// ConnectionRegistry - Connection Lifecycle
// ============================================================================

impl ConnectionRegistry {
    /// Connects a session to a device, replacing any existing connection.
    ///
    /// # Arguments
    ///
    /// * `session_id` - Owning session
    /// * `service_uuid` - Service to look for (falls back to the default profile)
    /// * `address` - Specific device to connect to
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the backend does not answer within
    ///   the connection timeout
    /// - [`Error::OperationFailed`] if the backend fails or the registry is
    ///   shutting down
    pub async fn connect(
        &self,
        session_id: SessionId,
        service_uuid: Option<&str>,
        address: Option<&MacAddress>,
    ) -> Result<ConnectionSummary> {
        if self.is_closing() {
            return Err(Error::operation_failed("connect", SHUTTING_DOWN));
        }

        let mut slot = self.lock_slot(session_id).await;

        if let Some(previous) = slot.take() {
            info!(session_id = %session_id, address = %previous.address, "Replacing existing connection");
            self.teardown(session_id, previous).await;
        }

        let service_uuid = service_uuid
            .map(str::to_string)
            .or_else(|| self.options.profile.service_uuid.clone());
        let connect_timeout = self.options.connection_timeout;

        info!(
            session_id = %session_id,
            address = ?address.map(MacAddress::as_str),
            service = ?service_uuid,
            "Connecting to device"
        );

        let outcome = timeout(
            connect_timeout,
            self.transport.connect(address, service_uuid.as_deref()),
        )
        .await;

        let device = match outcome {
            Ok(Ok(device)) => device,
            Ok(Err(e)) => {
                warn!(session_id = %session_id, error = %e, "Device connect failed");
                self.release_if_empty(session_id, &slot);
                return Err(Error::operation_failed("connect", e));
            }
            Err(_) => {
                let timeout_ms = duration_millis(connect_timeout);
                warn!(session_id = %session_id, timeout_ms, "Device connect timed out");
                self.release_if_empty(session_id, &slot);
                return Err(Error::connection_timeout(timeout_ms));
            }
        };

        if self.is_closing() {
            debug!(session_id = %session_id, address = %device.address, "Connect finished during shutdown, releasing");
            let _ = self.release(session_id, device.handle, device.address).await;
            self.release_if_empty(session_id, &slot);
            return Err(Error::operation_failed("connect", SHUTTING_DOWN));
        }

        let connection = ActiveConnection::new(device, service_uuid, &self.options.profile);
        let summary = connection.summary();

        self.router.bind(connection.handle, session_id);

        info!(
            session_id = %session_id,
            address = %connection.address,
            source = %connection.source,
            handle = %connection.handle,
            "Device connected"
        );

        *slot = Some(connection);
        Ok(summary)
    }

    /// Disconnects the session's device, if any.
    ///
    /// Backend errors are logged, never returned. Returns `true` if a
    /// connection was torn down.
    pub async fn disconnect(&self, session_id: SessionId) -> bool {
        let Some(mut slot) = self.existing_slot(session_id).await else {
            return false;
        };

        let removed = match slot.take() {
            Some(connection) => {
                self.teardown(session_id, connection).await;
                true
            }
            None => false,
        };

        self.release_if_empty(session_id, &slot);
        removed
    }

    /// Disconnects every session and refuses new connects.
    ///
    /// Returns once the registry holds no entries and no backend disconnect
    /// is still running.
    pub async fn disconnect_all(&self) {
        self.closing.store(true, Ordering::SeqCst);
        info!("Disconnecting all devices");

        let mut total = 0usize;

        loop {
            let sessions: Vec<SessionId> = self.slots.read().keys().copied().collect();
            if sessions.is_empty() {
                break;
            }

            for session_id in sessions {
                if self.disconnect(session_id).await {
                    total += 1;
                }
            }
        }

        let mut pending = self.releasing.subscribe();
        let _ = pending.wait_for(|count| *count == 0).await;

        info!(count = total, "All devices disconnected");
    }

    /// Unbinds and disconnects one connection. Errors are logged.
    async fn teardown(&self, session_id: SessionId, connection: ActiveConnection) {
        self.router.unbind(connection.handle);

        if let Err(e) = self
            .release(session_id, connection.handle, connection.address)
            .await
        {
            warn!(session_id = %session_id, error = %e, "Release task failed");
        }
    }

    /// Spawns the backend disconnect for `handle`.
    ///
    /// The task runs to completion even if the returned handle is dropped.
    fn release(&self, session_id: SessionId, handle: ConnectionHandle, address: MacAddress) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let pending = PendingRelease::new(&self.releasing);

        tokio::spawn(async move {
            match transport.disconnect(handle).await {
                Ok(()) => {
                    info!(session_id = %session_id, %address, %handle, "Device disconnected");
                }
                Err(e) => {
                    warn!(session_id = %session_id, %address, %handle, error = %e, "Device disconnect failed");
                }
            }
            drop(pending);
        })
    }
}

// ============================================================================
// ConnectionRegistry - GATT Operations
// ============================================================================

impl ConnectionRegistry {
    /// Writes to a characteristic of the session's device.
    ///
    /// Writing to a characteristic other than the recorded write
    /// characteristic is allowed; the outcome reports the expected one.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session has no connection
    /// - [`Error::OperationFailed`] if the backend write fails
    pub async fn write(
        &self,
        session_id: SessionId,
        characteristic_uuid: &str,
        data: &[u8],
        with_response: bool,
    ) -> Result<WriteOutcome> {
        let slot = self.connected_slot(session_id).await?;
        let Some(connection) = slot.as_ref() else {
            return Err(Error::NotConnected);
        };

        let expected_characteristic = connection.write_mismatch(characteristic_uuid).map(str::to_string);
        if let Some(expected) = &expected_characteristic {
            warn!(
                session_id = %session_id,
                characteristic = %characteristic_uuid,
                expected = %expected,
                "Write to unexpected characteristic"
            );
        }

        self.transport
            .write(connection.handle, characteristic_uuid, data, with_response)
            .await
            .map_err(|e| Error::operation_failed("write", e))?;

        debug!(session_id = %session_id, characteristic = %characteristic_uuid, bytes = data.len(), with_response, "Write complete");

        Ok(WriteOutcome {
            bytes_written: data.len(),
            expected_characteristic,
        })
    }

    /// Subscribes the session to a characteristic.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session has no connection
    /// - [`Error::OperationFailed`] if the backend subscribe fails
    pub async fn subscribe(&self, session_id: SessionId, characteristic_uuid: &str) -> Result<()> {
        let mut slot = self.connected_slot(session_id).await?;
        let Some(connection) = slot.as_mut() else {
            return Err(Error::NotConnected);
        };

        self.transport
            .subscribe(connection.handle, characteristic_uuid, self.sink.clone())
            .await
            .map_err(|e| Error::operation_failed("subscribe", e))?;

        connection.add_subscription(characteristic_uuid);
        self.router.add_subscription(connection.handle, characteristic_uuid);

        debug!(session_id = %session_id, characteristic = %characteristic_uuid, "Subscribed");
        Ok(())
    }

    /// Stops forwarding a characteristic to the session.
    ///
    /// Forwarding stops before the backend is asked to unsubscribe. A
    /// backend failure is logged and not returned, since some backends cannot
    /// stop device-level delivery.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session has no connection
    pub async fn unsubscribe(&self, session_id: SessionId, characteristic_uuid: &str) -> Result<()> {
        let mut slot = self.connected_slot(session_id).await?;
        let Some(connection) = slot.as_mut() else {
            return Err(Error::NotConnected);
        };

        self.router.remove_subscription(connection.handle, characteristic_uuid);
        connection.remove_subscription(characteristic_uuid);

        if let Err(e) = self
            .transport
            .unsubscribe(connection.handle, characteristic_uuid)
            .await
        {
            warn!(session_id = %session_id, characteristic = %characteristic_uuid, error = %e, "Backend unsubscribe failed");
        }

        debug!(session_id = %session_id, characteristic = %characteristic_uuid, "Unsubscribed");
        Ok(())
    }
}

// ============================================================================
// ConnectionRegistry - Queries
// ============================================================================

impl ConnectionRegistry {
    /// Returns `true` if the session has a device connection.
    pub async fn is_connected(&self, session_id: SessionId) -> bool {
        self.connection(session_id).await.is_some()
    }

    /// Returns the session's connection summary.
    pub async fn connection(&self, session_id: SessionId) -> Option<ConnectionSummary> {
        let slot = self.existing_slot(session_id).await?;
        slot.as_ref().map(ActiveConnection::summary)
    }

    /// Returns the number of registry entries.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns `true` once `disconnect_all` has started.
    #[inline]
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Returns the number of backend disconnects still running.
    #[inline]
    #[must_use]
    pub fn pending_releases(&self) -> usize {
        *self.releasing.borrow()
    }

    /// Returns the notification router.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// Returns the proxy status snapshot.
    #[must_use]
    pub fn status(&self) -> ProxyStatus {
        ProxyStatus {
            enabled: !self.is_closing(),
            proxies_discovered: self.transport.sources().len(),
            devices_discovered: self.devices_discovered.load(Ordering::Relaxed),
            mode: self.transport.kind(),
        }
    }
}

// ============================================================================
// ConnectionRegistry - Slots
// ============================================================================

impl ConnectionRegistry {
    /// Locks the session's slot, creating it if needed.
    async fn lock_slot(&self, session_id: SessionId) -> SlotGuard {
        loop {
            let slot = Arc::clone(self.slots.write().entry(session_id).or_default());
            let guard = Arc::clone(&slot).lock_owned().await;

            if self.is_current(session_id, &slot) {
                return guard;
            }
        }
    }

    /// Locks the session's slot if one exists.
    async fn existing_slot(&self, session_id: SessionId) -> Option<SlotGuard> {
        loop {
            let slot = self.slots.read().get(&session_id).cloned()?;
            let guard = Arc::clone(&slot).lock_owned().await;

            if self.is_current(session_id, &slot) {
                return Some(guard);
            }
        }
    }

    /// Locks the session's slot, failing fast when there is no connection.
    async fn connected_slot(&self, session_id: SessionId) -> Result<SlotGuard> {
        let slot = self
            .existing_slot(session_id)
            .await
            .ok_or(Error::NotConnected)?;

        if slot.is_none() {
            self.release_if_empty(session_id, &slot);
            return Err(Error::NotConnected);
        }

        Ok(slot)
    }

    /// Returns `true` if `slot` is still the session's entry.
    fn is_current(&self, session_id: SessionId, slot: &Slot) -> bool {
        self.slots
            .read()
            .get(&session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Removes the session's entry if the locked slot holds nothing.
    fn release_if_empty(&self, session_id: SessionId, guard: &SlotGuard) {
        if guard.is_some() {
            return;
        }

        let slot = OwnedMutexGuard::mutex(guard);
        let mut slots = self.slots.write();

        if slots
            .get(&session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&session_id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::GattProfile;
    use crate::protocol::Event;
    use crate::session::Outbound;
    use crate::transport::{ProxyInfo, SimulatedDevice, SimulatedTransport, TransportError};

    const SERVICE: &str = "0000fff0-0000-1000-8000-00805f9b34fb";
    const WRITE: &str = "0000fff2-0000-1000-8000-00805f9b34fb";
    const NOTIFY: &str = "0000fff1-0000-1000-8000-00805f9b34fb";

    fn mac(raw: &str) -> MacAddress {
        MacAddress::parse(raw).expect("valid address")
    }

    fn backend() -> Arc<SimulatedTransport> {
        Arc::new(
            SimulatedTransport::new(TransportKind::Esphome)
                .with_source(ProxyInfo::new("kitchen", "10.0.0.2"))
                .with_device(
                    SimulatedDevice::new(mac("AA:BB:CC:DD:EE:01"), "Sensor")
                        .with_service(SERVICE)
                        .with_characteristics(WRITE, NOTIFY)
                        .seen_by("kitchen", -60),
                )
                .with_device(
                    SimulatedDevice::new(mac("AA:BB:CC:DD:EE:02"), "Lamp")
                        .with_service(SERVICE)
                        .seen_by("kitchen", -50),
                ),
        )
    }

    fn registry(transport: &Arc<SimulatedTransport>) -> ConnectionRegistry {
        let options = ProxyOptions::default().with_connection_timeout(Duration::from_millis(200));
        ConnectionRegistry::new(Arc::clone(transport) as Arc<dyn Transport>, options)
    }

    #[tokio::test]
    async fn test_connect_stores_one_connection() {
        let transport = backend();
        let registry = registry(&transport);
        let session = SessionId::generate();

        let summary = registry
            .connect(session, Some(SERVICE), None)
            .await
            .expect("connect");

        assert_eq!(summary.device_address, mac("AA:BB:CC:DD:EE:01"));
        assert_eq!(summary.device_name.as_deref(), Some("Sensor"));
        assert!(registry.is_connected(session).await);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.router().binding_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_tears_down_first() {
        let transport = backend();
        let registry = registry(&transport);
        let session = SessionId::generate();

        registry
            .connect(session, None, Some(&mac("AA:BB:CC:DD:EE:01")))
            .await
            .expect("first connect");
        registry
            .connect(session, None, Some(&mac("AA:BB:CC:DD:EE:02")))
            .await
            .expect("second connect");

        assert_eq!(registry.connection_count(), 1);
        assert_eq!(transport.disconnects().len(), 1);
        assert_eq!(transport.open_links(), 1);
        assert_eq!(registry.router().binding_count(), 1);

        let current = registry.connection(session).await.expect("connected");
        assert_eq!(current.device_address, mac("AA:BB:CC:DD:EE:02"));
    }

    #[tokio::test]
    async fn test_connect_timeout_stores_nothing() {
        let transport = backend();
        transport.set_connect_delay(Duration::from_secs(5));
        let registry = registry(&transport);
        let session = SessionId::generate();

        let err = registry.connect(session, None, None).await.unwrap_err();

        assert!(matches!(err, Error::ConnectionTimeout { timeout_ms: 200 }));
        assert!(!registry.is_connected(session).await);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_stores_nothing() {
        let transport = backend();
        transport.set_connect_failure(Some(TransportError::gatt("busy")));
        let registry = registry(&transport);
        let session = SessionId::generate();

        let err = registry.connect(session, None, None).await.unwrap_err();

        assert_eq!(err.to_string(), "connect failed: GATT error: busy");
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_service_falls_back_to_profile() {
        let transport = backend();
        let options = ProxyOptions::default().with_profile(GattProfile::new(SERVICE));
        let registry = ConnectionRegistry::new(Arc::clone(&transport) as Arc<dyn Transport>, options);

        let summary = registry
            .connect(SessionId::generate(), None, None)
            .await
            .expect("connect");
        assert!(summary.services.iter().any(|s| s == SERVICE));
    }

    #[tokio::test]
    async fn test_write_without_connection_skips_transport() {
        let transport = backend();
        let registry = registry(&transport);

        let err = registry
            .write(SessionId::generate(), WRITE, &[1], true)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotConnected));
        assert!(transport.writes().is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_write_passes_bytes_unmodified() {
        let transport = backend();
        let registry = registry(&transport);
        let session = SessionId::generate();
        registry.connect(session, Some(SERVICE), None).await.expect("connect");

        let outcome = registry
            .write(session, WRITE, &[1, 2, 3], true)
            .await
            .expect("write");

        assert_eq!(outcome.bytes_written, 3);
        assert!(outcome.expected_characteristic.is_none());

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, vec![1, 2, 3]);
        assert!(writes[0].with_response);
    }

    #[tokio::test]
    async fn test_write_mismatch_is_reported() {
        let transport = backend();
        let registry = registry(&transport);
        let session = SessionId::generate();
        registry.connect(session, Some(SERVICE), None).await.expect("connect");

        let outcome = registry.write(session, "X", &[9], false).await.expect("write");
        assert_eq!(outcome.expected_characteristic.as_deref(), Some(WRITE));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_connection() {
        let transport = backend();
        let registry = registry(&transport);
        let session = SessionId::generate();
        registry.connect(session, Some(SERVICE), None).await.expect("connect");

        transport.set_write_failure(Some(TransportError::gatt("not permitted")));
        let err = registry.write(session, WRITE, &[1], true).await.unwrap_err();

        assert!(matches!(err, Error::OperationFailed { .. }));
        assert!(registry.is_connected(session).await);
    }

    #[tokio::test]
    async fn test_subscribe_routes_and_unsubscribe_stops() {
        let transport = backend();
        let registry = registry(&transport);
        let session = SessionId::generate();
        let (outbound, mut rx) = Outbound::detached();
        registry.router().attach_session(session, outbound);

        let summary = registry.connect(session, Some(SERVICE), None).await.expect("connect");
        registry.subscribe(session, NOTIFY).await.expect("subscribe");

        transport.emit_notification(&summary.device_address, NOTIFY, &[0xAB]);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("in time")
            .expect("event");
        assert_eq!(event, Event::notification(NOTIFY, vec![0xAB]));

        transport.set_unsubscribe_failure(Some(TransportError::gatt("unsupported")));
        registry.unsubscribe(session, NOTIFY).await.expect("unsubscribe is lenient");

        transport.emit_notification(&summary.device_address, NOTIFY, &[0xCD]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let transport = backend();
        let registry = registry(&transport);

        let err = registry.subscribe(SessionId::generate(), NOTIFY).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));

        let err = registry.unsubscribe(SessionId::generate(), NOTIFY).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect() {
        let transport = backend();
        let registry = registry(&transport);
        let session = SessionId::generate();

        assert!(!registry.disconnect(session).await);

        registry.connect(session, None, None).await.expect("connect");
        assert!(registry.disconnect(session).await);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.router().binding_count(), 0);
        assert_eq!(transport.open_links(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_failure_still_removes_entry() {
        let transport = backend();
        let registry = registry(&transport);
        let session = SessionId::generate();
        registry.connect(session, None, None).await.expect("connect");

        transport.set_disconnect_failure(Some(TransportError::gatt("link lost")));

        assert!(registry.disconnect(session).await);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.router().binding_count(), 0);
        assert!(!registry.is_connected(session).await);
        assert_eq!(registry.pending_releases(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_disconnect_still_releases_device() {
        let transport = backend();
        transport.set_disconnect_delay(Duration::from_millis(300));
        let registry = Arc::new(registry(&transport));
        let session = SessionId::generate();
        registry.connect(session, None, None).await.expect("connect");

        let caller = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.disconnect(session).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();
        assert_eq!(registry.pending_releases(), 1);

        registry.disconnect_all().await;

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.pending_releases(), 0);
        assert_eq!(transport.open_links(), 0);
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_disconnect_all_empties_registry() {
        let transport = backend();
        let registry = registry(&transport);

        for _ in 0..5 {
            registry
                .connect(SessionId::generate(), None, None)
                .await
                .expect("connect");
        }
        assert_eq!(registry.connection_count(), 5);

        registry.disconnect_all().await;

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(transport.open_links(), 0);
        assert!(!registry.status().enabled);

        let err = registry.connect(SessionId::generate(), None, None).await.unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_all_waits_for_pending_connect() {
        let transport = backend();
        transport.set_connect_delay(Duration::from_millis(50));
        let registry = Arc::new(registry(&transport));
        let session = SessionId::generate();

        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.connect(session, None, None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        registry.disconnect_all().await;
        let _ = pending.await.expect("task");

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(transport.open_links(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let transport = backend();
        let registry = registry(&transport);
        let a = SessionId::generate();
        let b = SessionId::generate();

        registry.connect(a, None, None).await.expect("connect a");
        registry.connect(b, None, None).await.expect("connect b");
        registry.disconnect(a).await;

        assert!(!registry.is_connected(a).await);
        assert!(registry.is_connected(b).await);
    }

    #[tokio::test]
    async fn test_status() {
        let transport = backend();
        let registry = registry(&transport);

        let status = registry.status();
        assert!(status.enabled);
        assert_eq!(status.proxies_discovered, 1);
        assert_eq!(status.devices_discovered, 0);
        assert_eq!(status.mode, TransportKind::Esphome);
    }
}
