//! Type-safe identifiers for sessions, device connections and devices.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Backing | Source |
//! |------|---------|--------|
//! | [`SessionId`] | UUID v4 | Generated per accepted WebSocket |
//! | [`ConnectionHandle`] | `u64` | Issued by the transport on connect |
//! | [`MacAddress`] | canonical `String` | Parsed from client or backend input |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;
use std::str::FromStr;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Canonical MAC address pattern (after normalization).
static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-F]{2}:){5}[0-9A-F]{2}$").expect("MAC pattern is valid")
});

/// Counter backing [`ConnectionHandle::next`].
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// SessionId
// ============================================================================

/// Unique identifier of one client WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Opaque handle a transport uses to address one device connection.
///
/// Backends may mint handles with [`ConnectionHandle::next`] or wrap their own
/// numeric identifiers with [`ConnectionHandle::from_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Returns a process-unique handle.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a backend-provided identifier.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// MacAddress
// ============================================================================

/// BLE device address in canonical `AA:BB:CC:DD:EE:FF` form.
///
/// Parsing uppercases the input and accepts `-` as a separator.
///
/// # Example
///
/// ```
/// use ble_gatt_proxy::MacAddress;
///
/// let mac = MacAddress::parse("aa-bb-cc-dd-ee-ff").unwrap();
/// assert_eq!(mac.as_str(), "AA:BB:CC:DD:EE:FF");
/// assert!(MacAddress::parse("zz:11:22:33:44:55").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(String);

impl MacAddress {
    /// Parses and normalizes a MAC address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMacAddress`] if the normalized form is not six
    /// colon-separated hex octets.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_ascii_uppercase().replace('-', ":");

        if !MAC_PATTERN.is_match(&normalized) {
            return Err(Error::invalid_mac_address(input));
        }

        Ok(Self(normalized))
    }

    /// Returns the canonical string form.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> StdResult<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> StdResult<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================
