//! JSON payload decoding
//!
//! JSON columns arrive as raw text. Nothing downstream works on loosely
//! typed values: text is either decoded into a typed payload or rejected
//! with a `PayloadError`.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Errors raised while decoding or encoding a JSON column
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// Text is not valid JSON
    #[error("malformed json: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON, but not an object
    #[error("expected a json object, found {found}")]
    NotAnObject {
        /// Kind of the top-level value that was found
        found: JsonKind,
    },

    /// One entry of an object does not match the expected shape
    #[error("invalid entry `{key}`: {reason}")]
    InvalidEntry {
        /// Offending key
        key: String,
        /// Decoder message
        reason: String,
    },
}

impl PayloadError {
    /// Create invalid entry error
    pub fn invalid_entry(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidEntry {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Kind of a top-level JSON value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonKind {
    /// `{...}`
    Object,
    /// `[...]`
    Array,
    /// `"..."`
    String,
    /// number
    Number,
    /// `true` / `false`
    Bool,
    /// `null`
    Null,
}

impl JsonKind {
    /// Classify a decoded value
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::String(_) => Self::String,
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Bool,
            Value::Null => Self::Null,
        }
    }

    /// Objects and arrays are structurally valid column payloads
    #[inline]
    #[must_use]
    pub fn is_structured(self) -> bool {
        matches!(self, Self::Object | Self::Array)
    }
}

impl fmt::Display for JsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Null => "null",
        };
        f.write_str(name)
    }
}

/// Decode column text and report the kind of its top-level value
///
/// # Errors
/// Returns `PayloadError::Malformed` if the text is not JSON.
pub fn classify(text: &str) -> Result<JsonKind, PayloadError> {
    let value: Value = serde_json::from_str(text)?;
    Ok(JsonKind::of(&value))
}

/// Decode column text that must hold a JSON object
///
/// # Errors
/// Returns `Malformed` for invalid JSON and `NotAnObject` for any other
/// top-level kind.
pub fn parse_object(text: &str) -> Result<Map<String, Value>, PayloadError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(PayloadError::NotAnObject {
            found: JsonKind::of(&other),
        }),
    }
}
