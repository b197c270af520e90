//! WebSocket server accepting browser sessions.
//!
//! # Connection Flow
//!
//! 1. Server binds to the configured address (`localhost:0` by default)
//! 2. Client opens a WebSocket on the configured path
//! 3. Upgrades on any other path are rejected with HTTP 404
//! 4. Each accepted socket gets its own [`Session`] task
//! 5. On shutdown the accept loop stops, sessions are closed and every
//!    device connection is released
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              ProxyServer                │
//! │  ┌─────────────────────────────────┐    │
//! │  │ SessionId=a → Session task      │    │
//! │  │ SessionId=b → Session task      │    │
//! │  └─────────────────────────────────┘    │
//! │           shared ConnectionRegistry     │
//! └─────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::config::ProxyOptions;
use crate::error::Result;
use crate::identifiers::SessionId;
use crate::registry::{ConnectionRegistry, ProxyStatus};
use crate::session::{Session, SessionCapability};
use crate::transport::TransportCapability;

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// ProxyServer
// ============================================================================

/// WebSocket front end of the proxy.
///
/// # Example
///
/// ```no_run
/// use ble_gatt_proxy::transport::{SimulatedTransport, TransportCapability, TransportKind};
/// use ble_gatt_proxy::{ProxyOptions, ProxyServer, Result};
///
/// # async fn example() -> Result<()> {
/// let server = ProxyServer::bind(
///     ProxyOptions::default(),
///     TransportCapability::available(SimulatedTransport::new(TransportKind::Local)),
/// )
/// .await?;
///
/// println!("Listening on {}", server.ws_url());
/// server.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ProxyServer {
    /// Bound address.
    local_addr: SocketAddr,

    /// Accepted upgrade path.
    ws_path: String,

    /// Backend access handed to each session.
    capability: SessionCapability,

    /// Open client connections.
    sessions: RwLock<FxHashMap<SessionId, JoinHandle<()>>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

// ============================================================================
// ProxyServer - Constructor
// ============================================================================

impl ProxyServer {
    /// Binds the listener and starts the accept loop.
    ///
    /// # Arguments
    ///
    /// * `options` - Bind address, path, timeouts and fallback profile
    /// * `capability` - Backend decided at startup
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if binding fails.
    pub async fn bind(options: ProxyOptions, capability: TransportCapability) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(options.socket_addr()).await?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "ProxyServer bound");

        if !capability.is_available() {
            warn!(?capability, "Starting without a BLE transport");
        }

        let server = Arc::new(Self {
            local_addr,
            ws_path: options.ws_path.clone(),
            capability: SessionCapability::from_transport(capability, &options),
            sessions: RwLock::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&server).accept_loop(listener));

        info!(%local_addr, path = %options.ws_path, "ProxyServer started");

        Ok(server)
    }
}

// ============================================================================
// ProxyServer - Public API
// ============================================================================

impl ProxyServer {
    /// Returns the WebSocket URL clients connect to.
    ///
    /// Format: `ws://{ip}:{port}{path}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.ws_path)
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the number of open client connections.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns the shared registry, if a backend is available.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> Option<&Arc<ConnectionRegistry>> {
        self.capability.registry()
    }

    /// Returns the proxy status, if a backend is available.
    #[must_use]
    pub fn status(&self) -> Option<ProxyStatus> {
        self.registry().map(|registry| registry.status())
    }
}

// ============================================================================
// ProxyServer - Lifecycle
// ============================================================================

impl ProxyServer {
    /// Stops accepting, closes every session and releases every device.
    ///
    /// Session tasks are aborted. A device disconnect they had already
    /// started keeps running and is awaited by
    /// [`ConnectionRegistry::disconnect_all`].
    pub async fn shutdown(&self) {
        info!("ProxyServer shutting down");

        self.shutdown.store(true, Ordering::SeqCst);

        let sessions: Vec<_> = {
            let mut map = self.sessions.write();
            map.drain().collect()
        };

        for (session_id, task) in sessions {
            task.abort();
            if let Some(registry) = self.registry() {
                registry.router().detach_session(session_id);
            }
            debug!(session_id = %session_id, "Session closed during shutdown");
        }

        if let Some(registry) = self.registry() {
            registry.disconnect_all().await;
        }

        info!("ProxyServer shutdown complete");
    }
}

// ============================================================================
// ProxyServer - Accept Loop
// ============================================================================

impl ProxyServer {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => self.spawn_session(stream, addr),
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Starts a task serving one TCP connection.
    fn spawn_session(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let session = Session::new(self.capability.clone());
        let session_id = session.id();
        let server = Arc::clone(self);

        // Hold the lock across spawn so the task cannot deregister first
        let mut sessions = self.sessions.write();
        let task = tokio::spawn(async move {
            match server.handle_connection(session, stream, addr).await {
                Ok(()) => {}
                Err(e) if e.is_connection_error() => {
                    debug!(session_id = %session_id, error = %e, ?addr, "Connection rejected");
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, ?addr, "Connection failed");
                }
            }
            server.sessions.write().remove(&session_id);
        });
        sessions.insert(session_id, task);
    }

    /// Upgrades one connection and runs its session to completion.
    async fn handle_connection(&self, session: Session, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "New TCP connection");

        let ws_path = self.ws_path.clone();
        let check_path = move |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            let path = request.uri().path();
            if path == ws_path {
                return Ok(response);
            }

            let mut rejection = ErrorResponse::new(Some(format!("No WebSocket endpoint at {path}")));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        };

        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_path).await?;

        info!(session_id = %session.id(), ?addr, "WebSocket connection established");

        session.run(ws_stream).await;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
