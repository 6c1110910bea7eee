//! Format codecs
//!
//! Convert between wire payloads and per-entity [`Record`] lists:
//! - JSON arrays and entity-keyed bundles
//! - CSV with a header row
//! - XML `<records><record><field>` documents
//! - ZIP archives holding one file per entity
//!
//! Decoded records are normalised against the entity's field kinds so that
//! CSV/XML text and JSON values converge on the same representation.

mod archive;
mod delimited;
mod json;
mod xml;

pub use archive::{decode_zip, encode_zip, DEFAULT_MAX_ENTRY_BYTES, MANIFEST_NAME};
pub use json::{decode_bundle_json, decode_json_value, encode_bundle_json};

use crate::models::{EntityType, FieldKind, Record};
use data_encoding::{BASE64, BASE64_NOPAD};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Payload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Csv,
    Xml,
    Zip,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Csv => "csv",
            Format::Xml => "xml",
            Format::Zip => "zip",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Csv => "text/csv",
            Format::Xml => "application/xml",
            Format::Zip => "application/zip",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "csv" => Ok(Format::Csv),
            "xml" => Ok(Format::Xml),
            "zip" => Ok(Format::Zip),
            other => Err(FormatError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A payload that cannot be decoded or encoded
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("{entity}: element {index} is not an object")]
    NotAnObject { entity: EntityType, index: usize },

    #[error("{entity}: CSV line {line}: {message}")]
    Csv {
        entity: EntityType,
        line: u64,
        message: String,
    },

    #[error("{entity}: XML {message}")]
    Xml { entity: EntityType, message: String },

    #[error("invalid ZIP archive: {0}")]
    Zip(String),

    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("invalid bundle: {0}")]
    Bundle(String),

    #[error("{entity}: cannot encode: {message}")]
    Encode { entity: EntityType, message: String },
}

/// Decode one entity's records from raw bytes
pub fn decode(entity: EntityType, format: Format, bytes: &[u8]) -> Result<Vec<Record>, FormatError> {
    match format {
        Format::Json => {
            let value: Value =
                serde_json::from_slice(bytes).map_err(|e| FormatError::Json(e.to_string()))?;
            decode_json_value(entity, value)
        }
        Format::Csv => delimited::decode(entity, bytes),
        Format::Xml => xml::decode(entity, bytes),
        Format::Zip => Err(FormatError::UnsupportedFormat(format!(
            "zip payloads carry bundles, not {} alone",
            entity
        ))),
    }
}

/// Encode one entity's records
pub fn encode(entity: EntityType, format: Format, records: &[Record]) -> Result<Vec<u8>, FormatError> {
    match format {
        Format::Json => serde_json::to_vec_pretty(records).map_err(|e| FormatError::Encode {
            entity,
            message: e.to_string(),
        }),
        Format::Csv => delimited::encode(entity, records),
        Format::Xml => xml::encode(entity, records),
        Format::Zip => Err(FormatError::UnsupportedFormat(
            "use encode_zip for archives".to_string(),
        )),
    }
}

/// Decode a base64 payload, tolerating a `data:` URL prefix and line breaks
pub fn decode_base64(text: &str) -> Result<Vec<u8>, FormatError> {
    let payload = match text.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => text,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    BASE64
        .decode(cleaned.as_bytes())
        .or_else(|_| BASE64_NOPAD.decode(cleaned.trim_end_matches('=').as_bytes()))
        .map_err(|e| FormatError::Base64(e.to_string()))
}

/// Coerce a record's values to the entity's field kinds.
///
/// Empty strings become null. Values that cannot be coerced are kept as
/// they are, so typed deserialization reports them per row.
pub fn normalize(entity: EntityType, record: Record) -> Record {
    record
        .into_iter()
        .map(|(key, value)| {
            let value = match entity.field_kind(&key) {
                Some(kind) => coerce(kind, value),
                None => blank_to_null(value),
            };
            (key, value)
        })
        .collect()
}

fn blank_to_null(value: Value) -> Value {
    match value {
        Value::String(s) if s.is_empty() => Value::Null,
        other => other,
    }
}

fn coerce(kind: FieldKind, value: Value) -> Value {
    let value = blank_to_null(value);
    match (kind, value) {
        (_, Value::Null) => Value::Null,

        (FieldKind::Text, Value::Number(n)) => Value::String(n.to_string()),
        (FieldKind::Text, Value::Bool(b)) => Value::String(b.to_string()),

        (FieldKind::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => Value::String(s),
        },
        (FieldKind::Integer, Value::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::from(i),
            (None, Some(f)) if f.fract() == 0.0 => Value::from(f as i64),
            _ => Value::Number(n),
        },
        (FieldKind::Integer, Value::Bool(b)) => Value::from(b as i64),

        (FieldKind::Float, Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(f) => Value::from(f),
            Err(_) => Value::String(s),
        },

        (FieldKind::Boolean, Value::String(s)) => {
            match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Value::Bool(true),
                "false" | "0" | "no" => Value::Bool(false),
                _ => Value::String(s),
            }
        }
        (FieldKind::Boolean, Value::Number(n)) => match n.as_i64() {
            Some(0) => Value::Bool(false),
            Some(1) => Value::Bool(true),
            _ => Value::Number(n),
        },

        (FieldKind::Json, Value::String(s)) => {
            let trimmed = s.trim_start();
            if trimmed.starts_with('[') || trimmed.starts_with('{') {
                serde_json::from_str(&s).unwrap_or(Value::String(s))
            } else {
                Value::String(s)
            }
        }

        (_, other) => other,
    }
}

/// Text form of a value in CSV cells and XML elements. `None` means null.
pub(crate) fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
