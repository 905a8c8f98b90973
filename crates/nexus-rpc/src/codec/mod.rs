//! Wire codecs
//!
//! A [`Value`] travels in one of three shapes:
//!
//! - [`tagged`]: a flat form whose keys carry a type tag and a property path
//!   (`"1:user.age" = "36"`), with blobs as their own parts.
//! - [`structured`]: a single `value` part holding an indexed slot array that preserves
//!   shared structure, special numbers, dates, URLs, sets and maps, with blobs out-of-banded
//!   into their own parts.
//! - [`json`]: plain JSON for callers that are not the bundled client.
//!
//! Forms go on the wire as `multipart/form-data` via [`multipart`].

pub mod json;
pub mod multipart;
pub mod structured;
pub mod tagged;

use crate::value::{Blob, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Deepest nesting a decoder accepts before rejecting the payload as malformed.
pub const MAX_DEPTH: usize = 128;

/// Errors raised while encoding or decoding values.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value cannot be represented in the target format
    #[error("{0}")]
    Unencodable(String),

    /// The input is not a valid encoding
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] multer::Error),
}

impl CodecError {
    pub fn unencodable(message: impl Into<String>) -> Self {
        Self::Unencodable(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// True when a value could not be written, as opposed to a bad payload being read.
    pub fn is_unencodable(&self) -> bool {
        matches!(self, Self::Unencodable(_))
    }
}

impl serde::ser::Error for CodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Unencodable(msg.to_string())
    }
}

impl serde::de::Error for CodecError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self::Malformed(msg.to_string())
    }
}

// =============================================================================
// Form data
// =============================================================================

/// One entry of a form: text or a binary part.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    Blob(Blob),
}

impl FormValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormValue::Text(text) => Some(text),
            FormValue::Blob(_) => None,
        }
    }
}

/// Ordered multi-map of named form entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text entry.
    pub fn append_text(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.entries
            .push((name.into(), FormValue::Text(text.into())));
    }

    /// Append a binary entry.
    pub fn append_blob(&mut self, name: impl Into<String>, blob: Blob) {
        self.entries.push((name.into(), FormValue::Blob(blob)));
    }

    pub fn append(&mut self, name: impl Into<String>, value: FormValue) {
        self.entries.push((name.into(), value));
    }

    /// First entry with the given name.
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for FormData {
    type Item = (String, FormValue);
    type IntoIter = std::vec::IntoIter<(String, FormValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, FormValue)> for FormData {
    fn from_iter<I: IntoIterator<Item = (String, FormValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Wire format selection
// =============================================================================

/// Form encoding used between the bundled client and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Slot-array encoding in a `value` part
    #[default]
    Structured,
    /// Flat type-tagged keys
    Tagged,
}

impl WireFormat {
    pub fn encode(&self, value: &Value) -> Result<FormData, CodecError> {
        match self {
            WireFormat::Structured => structured::encode(value),
            WireFormat::Tagged => Ok(tagged::encode(value)),
        }
    }

    pub fn decode(&self, form: &FormData) -> Result<Value, CodecError> {
        match self {
            WireFormat::Structured => structured::decode(form),
            WireFormat::Tagged => tagged::decode(form),
        }
    }
}

/// Pick the decoder for a form: one with a `value` part is structured, anything else tagged.
pub fn detect(form: &FormData) -> WireFormat {
    if form.contains_key(structured::VALUE_PART) {
        WireFormat::Structured
    } else {
        WireFormat::Tagged
    }
}

/// Decode a form with the format [`detect`] picks.
pub fn decode_form(form: &FormData) -> Result<(Value, WireFormat), CodecError> {
    let format = detect(form);
    let value = format.decode(form)?;
    Ok((value, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_prefers_value_part() {
        let mut form = FormData::new();
        form.append_text("0:name", "x");
        assert_eq!(detect(&form), WireFormat::Tagged);
        form.append_text("value", "[1]");
        assert_eq!(detect(&form), WireFormat::Structured);
    }

    #[test]
    fn test_empty_form_is_tagged_undefined() {
        let (value, format) = decode_form(&FormData::new()).unwrap();
        assert_eq!(format, WireFormat::Tagged);
        assert_eq!(value, Value::Undefined);
    }

    #[test]
    fn test_error_classification() {
        assert!(CodecError::unencodable("blob").is_unencodable());
        assert!(!CodecError::malformed("bad").is_unencodable());
    }
}
