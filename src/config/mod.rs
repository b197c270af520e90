//! Proxy configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ProxyOptions`] | Bind address, WebSocket path, timeouts, fallback profile |
//! | [`ProxyOptionsBuilder`] | Validating fluent builder |
//! | [`GattProfile`] | Fallback service and characteristic UUIDs |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder with validation.
pub mod builder;

/// Option types and defaults.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ProxyOptionsBuilder;
pub use options::{GattProfile, ProxyOptions};
