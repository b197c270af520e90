//! Client WebSocket sessions.
//!
//! One [`Session`] per accepted WebSocket. It decodes client commands, runs
//! them against the shared [`ConnectionRegistry`] and sends exactly one
//! response event per command.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──accept──► Ready ──close / error / writer failure──► Closed
//!   │                                                         ▲
//!   └──────────── transport unavailable ──────────────────────┘
//! ```
//!
//! Leaving `Ready` always detaches the session from the router and
//! disconnects any device it owns.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handler` | Receive loop and command dispatch |
//! | `outbound` | Single-writer event queue |

// ============================================================================
// Submodules
// ============================================================================

/// Receive loop and command dispatch.
pub mod handler;

/// Outbound event queue and writer task.
pub mod outbound;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::config::ProxyOptions;
use crate::registry::ConnectionRegistry;
use crate::transport::TransportCapability;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::Session;
pub use outbound::Outbound;

// ============================================================================
// SessionState
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet serving.
    Idle,
    /// Serving commands.
    Ready,
    /// Terminal.
    Closed,
}

// ============================================================================
// SessionCapability
// ============================================================================

/// What every session on a server can do, decided once at startup.
#[derive(Clone)]
pub enum SessionCapability {
    /// A backend is available through this registry.
    Ready(Arc<ConnectionRegistry>),
    /// No backend; sessions report the reason and close.
    Unavailable {
        /// Shown to clients.
        reason: String,
    },
}

impl SessionCapability {
    /// Builds the registry for an available backend.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn from_transport(capability: TransportCapability, options: &ProxyOptions) -> Self {
        match capability {
            TransportCapability::Available(transport) => {
                Self::Ready(Arc::new(ConnectionRegistry::new(transport, options.clone())))
            }
            TransportCapability::Unavailable { reason } => Self::Unavailable { reason },
        }
    }

    /// Returns the registry, if a backend is available.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> Option<&Arc<ConnectionRegistry>> {
        match self {
            Self::Ready(registry) => Some(registry),
            Self::Unavailable { .. } => None,
        }
    }
}

impl fmt::Debug for SessionCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(registry) => f
                .debug_struct("Ready")
                .field("connections", &registry.connection_count())
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
