//! The value universe carried across the wire
//!
//! [`Value`] is a superset of JSON: besides strings, numbers, booleans, objects, arrays and
//! `null`, it distinguishes `undefined`, dates, URLs, sets, maps with arbitrary keys and binary
//! blobs. Every codec in [`crate::codec`] encodes and decodes this type.
//!
//! Typed Rust data reaches it through the serde bridge:
//!
//! ```rust,ignore
//! use nexus_rpc::value::{self, Value};
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Event {
//!     title: String,
//!     #[serde(with = "value::date")]
//!     at: chrono::DateTime<chrono::Utc>,
//! }
//!
//! let value: Value = value::to_value(&event)?;
//! let back: Event = value::from_value(value)?;
//! ```

mod de;
mod ser;

pub use de::from_value;
pub use ser::to_value;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

// Newtype names recognized by the bridge. Other serializers see through them.
pub(crate) const DATE_TOKEN: &str = "$nexus_rpc::Date";
pub(crate) const URL_TOKEN: &str = "$nexus_rpc::Url";
pub(crate) const SET_TOKEN: &str = "$nexus_rpc::Set";
pub(crate) const MAP_TOKEN: &str = "$nexus_rpc::Map";
pub(crate) const BLOB_TOKEN: &str = "$nexus_rpc::Blob";
pub(crate) const UNDEFINED_TOKEN: &str = "$nexus_rpc::Undefined";
pub(crate) const VALUE_TOKEN: &str = "$nexus_rpc::Value";

// Enum variants the bridge deserializer uses to hand special values to `Value`.
pub(crate) const DATE_VARIANT: &str = "$date";
pub(crate) const URL_VARIANT: &str = "$url";
pub(crate) const SET_VARIANT: &str = "$set";
pub(crate) const MAP_VARIANT: &str = "$map";
pub(crate) const BLOB_VARIANT: &str = "$blob";
pub(crate) const UNDEFINED_VARIANT: &str = "$undefined";
pub(crate) const SPECIAL_VARIANTS: &[&str] = &[
    DATE_VARIANT,
    URL_VARIANT,
    SET_VARIANT,
    MAP_VARIANT,
    BLOB_VARIANT,
    UNDEFINED_VARIANT,
];

/// Media type used for blobs without a declared type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// A value that can cross the RPC boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value, distinct from `null`
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Instant with millisecond precision
    Date(DateTime<Utc>),
    Url(Url),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// Ordered collection of distinct values
    Set(Vec<Value>),
    /// Ordered key/value pairs with keys of any kind
    Map(Vec<(Value, Value)>),
    Blob(Blob),
}

impl Value {
    /// Build an object from key/value pairs.
    pub fn object<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a date value, truncated to millisecond precision.
    pub fn date(at: DateTime<Utc>) -> Self {
        Value::Date(truncate_millis(at))
    }

    /// Short lowercase name of the value's kind, used in messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Url(_) => "url",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Blob(b) if b.is_file() => "file",
            Value::Blob(_) => "blob",
        }
    }

    /// True for structured, non-binary values: objects, arrays, null, dates, sets, maps and
    /// URLs. Streams whose first chunk is structured are sent in JSON-line mode.
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            Value::Object(_)
                | Value::Array(_)
                | Value::Null
                | Value::Date(_)
                | Value::Set(_)
                | Value::Map(_)
                | Value::Url(_)
        )
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for `undefined` and `null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Value::Blob(blob) => Some(blob),
            _ => None,
        }
    }

    /// Look up an object property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }
}

pub(crate) fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// ISO-8601 form used on the wire for dates (`2024-01-01T00:00:00.000Z`).
pub fn format_date(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a wire date; accepts any RFC 3339 timestamp.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|at| truncate_millis(at.with_timezone(&Utc)))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => f.write_str(s),
            Value::Date(at) => f.write_str(&format_date(at)),
            Value::Url(url) => f.write_str(url.as_str()),
            Value::Blob(blob) => write!(f, "[{} {} bytes]", blob.media_type, blob.len()),
            other => match crate::codec::json::to_json(other) {
                Ok(json) => write!(f, "{}", json),
                Err(_) => write!(f, "[{}]", other.kind()),
            },
        }
    }
}

/// Format a number the way the wire expects: integral values without a fraction.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        if n == 0.0 && n.is_sign_negative() {
            "-0".to_string()
        } else {
            format!("{}", n as i128)
        }
    } else {
        format!("{}", n)
    }
}

/// Parse a number written by [`format_number`] or any decimal literal.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    match text.trim() {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        "" => Some(0.0),
        other => other.parse().ok(),
    }
}

// =============================================================================
// Blob
// =============================================================================

/// Binary payload with a media type and, for files, a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    /// File name; `Some` makes this blob a file
    pub name: Option<String>,
    /// MIME type of the content
    pub media_type: String,
    /// Raw bytes
    pub data: Bytes,
}

impl Blob {
    /// Create an anonymous blob.
    pub fn new(data: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self {
            name: None,
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Create a named file.
    pub fn file(
        name: impl Into<String>,
        data: impl Into<Bytes>,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.name.is_some()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The content as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

struct RawBytes<'a>(&'a [u8]);

impl Serialize for RawBytes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0)
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(
            BLOB_TOKEN,
            &(&self.name, &self.media_type, RawBytes(&self.data)),
        )
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Blob(blob) => Ok(blob),
            other => Err(serde::de::Error::custom(format!(
                "expected a blob, found {}",
                other.kind()
            ))),
        }
    }
}

// =============================================================================
// Serde for Value
// =============================================================================

struct SetItems<'a>(&'a [Value]);

impl Serialize for SetItems<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

struct MapPairs<'a>(&'a [(Value, Value)]);

impl Serialize for MapPairs<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined => serializer.serialize_newtype_struct(UNDEFINED_TOKEN, &()),
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Date(at) => serializer.serialize_newtype_struct(DATE_TOKEN, &format_date(at)),
            Value::Url(url) => serializer.serialize_newtype_struct(URL_TOKEN, url.as_str()),
            Value::Array(items) => serializer.collect_seq(items.iter()),
            Value::Object(map) => serializer.collect_map(map.iter()),
            Value::Set(items) => serializer.serialize_newtype_struct(SET_TOKEN, &SetItems(items)),
            Value::Map(pairs) => serializer.serialize_newtype_struct(MAP_TOKEN, &MapPairs(pairs)),
            Value::Blob(blob) => blob.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_newtype_struct(VALUE_TOKEN, de::ValueVisitor)
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

macro_rules! from_number {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(n: $ty) -> Self {
                Value::Number(n as f64)
            }
        })*
    };
}

from_number!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(at: DateTime<Utc>) -> Self {
        Value::date(at)
    }
}

impl From<Url> for Value {
    fn from(url: Url) -> Self {
        Value::Url(url)
    }
}

impl From<Blob> for Value {
    fn from(blob: Blob) -> Self {
        Value::Blob(blob)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

// =============================================================================
// serde(with) helpers
// =============================================================================

/// `#[serde(with = "nexus_rpc::value::date")]` for `DateTime<Utc>` fields that must travel as a
/// Date rather than a string.
pub mod date {
    use super::{DATE_TOKEN, format_date, parse_date};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct(DATE_TOKEN, &format_date(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_date(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", text)))
    }
}
