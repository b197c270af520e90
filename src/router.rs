//! Notification routing from transports to sessions.
//!
//! Transports run their own event streams and must not call into sessions.
//! Instead they push [`RawNotification`]s into a [`NotificationSink`]; one
//! routing task drains the channel and forwards each item to the session
//! bound to the connection handle.
//!
//! ```text
//! Transport ──push──► mpsc ──► routing task ──► Outbound (session) ──► writer ──► client
//! ```
//!
//! # Ordering
//!
//! The sink is a single FIFO channel, the routing task handles one item at a
//! time, and each session's outbound queue is FIFO. Notifications for one
//! characteristic on one connection therefore reach the client in the order
//! the transport produced them.
//!
//! # Filtering
//!
//! A notification is dropped (and logged at debug level) when its handle is
//! not bound, its characteristic is not subscribed, or the owning session
//! has detached.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::identifiers::{ConnectionHandle, SessionId};
use crate::protocol::Event;
use crate::session::Outbound;

// ============================================================================
// RawNotification
// ============================================================================

/// A characteristic value pushed by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Connection that produced the value.
    pub handle: ConnectionHandle,
    /// Characteristic that produced the value.
    pub characteristic_uuid: String,
    /// Raw value bytes.
    pub payload: Vec<u8>,
}

// ============================================================================
// NotificationSink
// ============================================================================

/// Cloneable entry point transports use to deliver notifications.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<RawNotification>,
}

impl NotificationSink {
    /// Enqueues a notification for routing.
    ///
    /// Returns `false` if the router has stopped.
    pub fn push(
        &self,
        handle: ConnectionHandle,
        characteristic_uuid: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> bool {
        self.tx
            .send(RawNotification {
                handle,
                characteristic_uuid: characteristic_uuid.into(),
                payload: payload.into(),
            })
            .is_ok()
    }
}

// ============================================================================
// Types
// ============================================================================

/// Routing state for one device connection.
#[derive(Debug)]
struct Binding {
    /// Owning session.
    session_id: SessionId,
    /// Subscribed characteristics: normalized key → UUID as the client sent it.
    subscriptions: FxHashMap<String, String>,
}

/// Normalizes a characteristic UUID for comparison.
///
/// Every component that matches characteristics by UUID uses this key.
#[inline]
pub(crate) fn characteristic_key(uuid: &str) -> String {
    uuid.trim().to_ascii_uppercase()
}

// ============================================================================
// NotificationRouter
// ============================================================================

/// Forwards transport notifications to the owning session.
#[derive(Debug, Default)]
pub struct NotificationRouter {
    /// Outbound queues of live sessions.
    sessions: RwLock<FxHashMap<SessionId, Outbound>>,
    /// Connection handle → owning session and subscriptions.
    bindings: RwLock<FxHashMap<ConnectionHandle, Binding>>,
}

impl NotificationRouter {
    /// Creates a router and spawns its routing task.
    ///
    /// The task stops once every [`NotificationSink`] clone is dropped.
    #[must_use]
    pub fn spawn() -> (Arc<Self>, NotificationSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Arc::new(Self::default());

        tokio::spawn(Arc::clone(&router).run(rx));

        (router, NotificationSink { tx })
    }

    /// Routing task.
    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<RawNotification>) {
        debug!("Notification router started");

        while let Some(notification) = rx.recv().await {
            self.route(notification);
        }

        debug!("Notification router stopped");
    }

    /// Forwards one notification. Returns `true` if it was delivered.
    pub(crate) fn route(&self, notification: RawNotification) -> bool {
        let RawNotification {
            handle,
            characteristic_uuid,
            payload,
        } = notification;

        let (session_id, subscribed_as) = {
            let bindings = self.bindings.read();

            let Some(binding) = bindings.get(&handle) else {
                debug!(%handle, characteristic = %characteristic_uuid, "Dropping notification for unbound handle");
                return false;
            };

            let Some(subscribed_as) = binding
                .subscriptions
                .get(&characteristic_key(&characteristic_uuid))
            else {
                debug!(%handle, characteristic = %characteristic_uuid, "Dropping notification for unsubscribed characteristic");
                return false;
            };

            (binding.session_id, subscribed_as.clone())
        };

        let outbound = self.sessions.read().get(&session_id).cloned();
        let Some(outbound) = outbound else {
            debug!(%session_id, %handle, "Dropping notification for closed session");
            return false;
        };

        trace!(%session_id, characteristic = %subscribed_as, bytes = payload.len(), "Forwarding notification");
        outbound.send(Event::notification(subscribed_as, payload)).is_ok()
    }
}

// ============================================================================
// NotificationRouter - Sessions
// ============================================================================

impl NotificationRouter {
    /// Registers a session's outbound queue.
    pub fn attach_session(&self, session_id: SessionId, outbound: Outbound) {
        self.sessions.write().insert(session_id, outbound);
    }

    /// Removes a session's outbound queue.
    ///
    /// Later notifications for its connections are dropped.
    pub fn detach_session(&self, session_id: SessionId) {
        self.sessions.write().remove(&session_id);
    }

    /// Returns the number of attached sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

// ============================================================================
// NotificationRouter - Bindings
// ============================================================================

impl NotificationRouter {
    /// Binds a connection handle to its owning session.
    pub fn bind(&self, handle: ConnectionHandle, session_id: SessionId) {
        self.bindings.write().insert(
            handle,
            Binding {
                session_id,
                subscriptions: FxHashMap::default(),
            },
        );
    }

    /// Removes a binding and all its subscriptions.
    pub fn unbind(&self, handle: ConnectionHandle) -> bool {
        self.bindings.write().remove(&handle).is_some()
    }

    /// Starts forwarding a characteristic. Returns `false` if unbound.
    pub fn add_subscription(&self, handle: ConnectionHandle, characteristic_uuid: &str) -> bool {
        let mut bindings = self.bindings.write();
        let Some(binding) = bindings.get_mut(&handle) else {
            return false;
        };

        binding.subscriptions.insert(
            characteristic_key(characteristic_uuid),
            characteristic_uuid.to_string(),
        );
        true
    }

    /// Stops forwarding a characteristic. Returns `true` if it was subscribed.
    pub fn remove_subscription(&self, handle: ConnectionHandle, characteristic_uuid: &str) -> bool {
        self.bindings
            .write()
            .get_mut(&handle)
            .is_some_and(|binding| {
                binding
                    .subscriptions
                    .remove(&characteristic_key(characteristic_uuid))
                    .is_some()
            })
    }

    /// Returns `true` if the characteristic is forwarded for this handle.
    #[must_use]
    pub fn is_subscribed(&self, handle: ConnectionHandle, characteristic_uuid: &str) -> bool {
        self.bindings.read().get(&handle).is_some_and(|binding| {
            binding
                .subscriptions
                .contains_key(&characteristic_key(characteristic_uuid))
        })
    }

    /// Returns the number of bound handles.
    #[inline]
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
