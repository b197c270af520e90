//! BLE GATT proxy - Bluetooth Low Energy access for browsers over WebSocket.
//!
//! Browsers without Web Bluetooth reach BLE peripherals through this proxy.
//! Each WebSocket session sends typed commands (connect, write, subscribe,
//! ...) that the proxy runs against a GATT backend, either a local adapter
//! or one or more ESPHome Bluetooth proxies.
//!
//! # Architecture
//!
//! ```text
//! client ──ws──► Session ──► ConnectionRegistry ──► dyn Transport ──► device
//!    ▲              │                                     │
//!    └── writer ◄───┴──── NotificationRouter ◄── sink ────┘
//! ```
//!
//! Key design principles:
//!
//! - At most one device connection per session, always released on close
//! - Every command gets exactly one response; failures never end a session
//! - Notifications flow by message passing, never by callbacks into sessions
//! - Backend availability is decided once, at server startup
//!
//! # Quick Start
//!
//! ```no_run
//! use ble_gatt_proxy::transport::{SimulatedTransport, TransportCapability, TransportKind};
//! use ble_gatt_proxy::{ProxyOptions, ProxyServer, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let options = ProxyOptions::builder()
//!         .port(8080)
//!         .service_uuid("0000fff0-0000-1000-8000-00805f9b34fb")
//!         .build()?;
//!
//!     let transport = SimulatedTransport::new(TransportKind::Local);
//!     let server = ProxyServer::bind(options, TransportCapability::available(transport)).await?;
//!
//!     println!("Connect to {}", server.ws_url());
//!     tokio::signal::ctrl_c().await?;
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | [`ProxyOptions`] and its builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire commands, events and codec |
//! | [`registry`] | Per-session device connections |
//! | [`router`] | Notification fan-out |
//! | [`server`] | WebSocket listener |
//! | [`session`] | Per-client receive loop |
//! | [`transport`] | GATT backend trait and simulated backend |

// ============================================================================
// Modules
// ============================================================================

/// Proxy configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for sessions, connections and devices.
pub mod identifiers;

/// WebSocket protocol message types.
pub mod protocol;

/// Device connection registry.
pub mod registry;

/// Notification routing from backends to sessions.
pub mod router;

/// WebSocket server.
pub mod server;

/// Client sessions.
pub mod session;

/// GATT transport capability.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{GattProfile, ProxyOptions, ProxyOptionsBuilder};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionHandle, MacAddress, SessionId};

// Protocol types
pub use protocol::{Command, DiscoveredDevice, Event};

// Core components
pub use registry::{ConnectionRegistry, ConnectionSummary, ProxyStatus, WriteOutcome};
pub use router::{NotificationRouter, NotificationSink, RawNotification};
pub use server::ProxyServer;
pub use session::{Session, SessionState};
pub use transport::{ProxyInfo, Transport, TransportCapability, TransportError, TransportKind};
