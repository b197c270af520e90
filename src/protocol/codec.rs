//! Frame codec.
//!
//! Turns raw text frames into [`Command`]s and [`Event`]s into text.
//! Validation is field-by-field so that schema errors name the exact wire
//! field that was missing or mistyped.
//!
//! # Example
//!
//! ```
//! use ble_gatt_proxy::protocol::{codec, Command};
//!
//! let command = codec::decode(r#"{"type":"write","characteristicUuid":"X","data":"AQID","withResponse":true}"#)
//!     .expect("valid frame");
//!
//! assert_eq!(
//!     command,
//!     Command::Write {
//!         characteristic_uuid: "X".into(),
//!         data: vec![1, 2, 3],
//!         with_response: true,
//!     }
//! );
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::MacAddress;

use super::{Command, Event};

// ============================================================================
// Public Functions
// ============================================================================

/// Decodes one text frame into a command.
///
/// # Errors
///
/// - [`Error::MalformedJson`] if the text is not JSON
/// - [`Error::SchemaInvalid`] if the frame is not an object, has no known
///   `type`, or a field is missing, mistyped or not decodable
pub fn decode(raw: &str) -> Result<Command> {
    let value: Value = serde_json::from_str(raw).map_err(|e| Error::malformed_json(e.to_string()))?;

    let Value::Object(object) = value else {
        return Err(Error::schema_invalid("type", "frame must be a JSON object"));
    };

    let fields = Fields(&object);
    let tag = fields.required_str("type")?;

    match tag {
        "connect" => Ok(Command::Connect {
            service_uuid: fields.optional_str("serviceUuid")?.map(str::to_string),
            device_address: fields.optional_mac("deviceAddress")?,
        }),

        "disconnect" => Ok(Command::Disconnect),

        "write" => Ok(Command::Write {
            characteristic_uuid: fields.required_str("characteristicUuid")?.to_string(),
            data: fields.required_base64("data")?,
            with_response: fields.optional_bool("withResponse")?.unwrap_or(true),
        }),

        "subscribe" => Ok(Command::Subscribe {
            characteristic_uuid: fields.required_str("characteristicUuid")?.to_string(),
        }),

        "unsubscribe" => Ok(Command::Unsubscribe {
            characteristic_uuid: fields.required_str("characteristicUuid")?.to_string(),
        }),

        "discover" => Ok(Command::Discover {
            service_uuid: fields.optional_str("serviceUuid")?.map(str::to_string),
            timeout: fields.optional_seconds("timeout")?,
        }),

        other => Err(Error::schema_invalid(
            "type",
            format!("Unknown message type: {other}"),
        )),
    }
}

/// Encodes an event as a text frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode(event: &Event) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

// ============================================================================
// Field Access
// ============================================================================

/// Typed accessors over a frame's top-level fields.
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    /// Returns the field, treating JSON `null` as absent.
    #[inline]
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    fn required_str(&self, key: &str) -> Result<&'a str> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(mistyped(key, "a string", other)),
            None => Err(Error::schema_invalid(key, "missing field")),
        }
    }

    fn optional_str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(mistyped(key, "a string", other)),
            None => Ok(None),
        }
    }

    fn optional_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(mistyped(key, "a boolean", other)),
            None => Ok(None),
        }
    }

    fn optional_mac(&self, key: &str) -> Result<Option<MacAddress>> {
        self.optional_str(key)?
            .map(|raw| {
                MacAddress::parse(raw).map_err(|e| Error::schema_invalid(key, e.to_string()))
            })
            .transpose()
    }

    fn required_base64(&self, key: &str) -> Result<Vec<u8>> {
        let encoded = self.required_str(key)?;
        STANDARD
            .decode(encoded)
            .map_err(|e| Error::schema_invalid(key, format!("invalid base64: {e}")))
    }

    fn optional_seconds(&self, key: &str) -> Result<Option<Duration>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };

        let seconds = value
            .as_f64()
            .ok_or_else(|| mistyped(key, "a number of seconds", value))?;

        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(Error::schema_invalid(
                key,
                format!("must be a positive number of seconds, got {seconds}"),
            ));
        }

        Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(|e| Error::schema_invalid(key, e.to_string()))
    }
}

/// Builds the error for a field with the wrong JSON type.
fn mistyped(key: &str, expected: &str, found: &Value) -> Error {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    Error::schema_invalid(key, format!("expected {expected}, found {found}"))
}

// ============================================================================
// Tests
// ============================================================================
