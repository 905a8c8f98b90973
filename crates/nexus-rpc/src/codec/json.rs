//! Plain JSON for callers that are not the bundled client
//!
//! JSON is lossy: dates and URLs become strings, sets become arrays, and maps become objects
//! (string keys) or arrays of `[key, value]` pairs. `undefined` properties are dropped and
//! `undefined` array elements become `null`. Blobs and non-finite numbers cannot be written.

use super::CodecError;
use crate::value::{Value, format_date};
use serde_json::{Map as JsonMap, Number, Value as Json};

/// Convert a value to JSON.
pub fn to_json(value: &Value) -> Result<Json, CodecError> {
    Ok(match value {
        Value::Undefined | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number(*n)?,
        Value::String(s) => Json::String(s.clone()),
        Value::Date(at) => Json::String(format_date(at)),
        Value::Url(url) => Json::String(url.to_string()),
        Value::Array(items) | Value::Set(items) => Json::Array(
            items
                .iter()
                .map(to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => {
            let mut object = JsonMap::new();
            for (key, item) in map {
                if !item.is_undefined() {
                    object.insert(key.clone(), to_json(item)?);
                }
            }
            Json::Object(object)
        }
        Value::Map(pairs) if pairs.iter().all(|(key, _)| matches!(key, Value::String(_))) => {
            let mut object = JsonMap::new();
            for (key, item) in pairs {
                if let (Value::String(key), false) = (key, item.is_undefined()) {
                    object.insert(key.clone(), to_json(item)?);
                }
            }
            Json::Object(object)
        }
        Value::Map(pairs) => Json::Array(
            pairs
                .iter()
                .map(|(key, item)| Ok(Json::Array(vec![to_json(key)?, to_json(item)?])))
                .collect::<Result<Vec<_>, CodecError>>()?,
        ),
        Value::Blob(blob) => {
            return Err(CodecError::unencodable(format!(
                "a {} of {} bytes cannot be sent as JSON",
                value.kind(),
                blob.len()
            )));
        }
    })
}

fn number(n: f64) -> Result<Json, CodecError> {
    if n == n.trunc() && n.abs() < 9_007_199_254_740_992.0 {
        return Ok(Json::from(n as i64));
    }
    Number::from_f64(n)
        .map(Json::Number)
        .ok_or_else(|| CodecError::unencodable(format!("{} cannot be sent as JSON", n)))
}

/// Convert parsed JSON to a value. Strings stay strings; no date detection is attempted.
pub fn from_json(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        Json::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, from_json(item)))
                .collect(),
        ),
    }
}

/// Parse a JSON document; an empty or whitespace-only body is `undefined`.
pub fn parse(bytes: &[u8]) -> Result<Value, CodecError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Undefined);
    }
    Ok(from_json(serde_json::from_slice(bytes)?))
}
