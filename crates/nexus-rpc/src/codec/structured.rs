//! Structured slot encoding
//!
//! The value is flattened into a JSON array of slots. Slot 0 holds the root; containers hold
//! the indices of their children rather than the children themselves:
//!
//! ```text
//! {"a": [1, 2]}            →  [{"a":1},[2,3],1,2]
//! Date                     →  ["Date","2024-01-01T00:00:00.000Z"]
//! Set / Map                →  ["Set",i,j] / ["Map",k1,v1,k2,v2]
//! URL                      →  ["URL",i]          (slot i holds the href)
//! Blob / File              →  ["Blob",i] / ["File",i]  (slot i holds the part name)
//! ```
//!
//! Values with no slot of their own are written as negative indices: `-1` undefined, `-2`
//! hole, `-3` NaN, `-4` +∞, `-5` −∞, `-6` −0. A root that is one of those is written as the
//! bare number. The text travels in the [`VALUE_PART`] form entry; each blob gets its own
//! binary part.

use super::{CodecError, FormData, FormValue, MAX_DEPTH};
use crate::value::{Blob, Value, format_date, parse_date};
use serde_json::{Map as JsonMap, Number, Value as Json, json};
use std::collections::BTreeMap;
use tracing::trace;
use url::Url;

/// Name of the form part holding the slot array.
pub const VALUE_PART: &str = "value";

const UNDEFINED: i64 = -1;
const HOLE: i64 = -2;
const NAN: i64 = -3;
const POSITIVE_INFINITY: i64 = -4;
const NEGATIVE_INFINITY: i64 = -5;
const NEGATIVE_ZERO: i64 = -6;

// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

// Values hydrated per byte of slot text. A slot referenced from several places is hydrated
// once per reference, so this bounds how far shared slots may multiply the output.
const SHARED_EXPANSION: usize = 8;

// =============================================================================
// Encoding
// =============================================================================

/// Encode a value as a structured form.
pub fn encode(value: &Value) -> Result<FormData, CodecError> {
    let (text, blobs) = stringify(value)?;
    let mut form = FormData::new();
    for (token, blob) in blobs {
        form.append_blob(token, blob);
    }
    form.append_text(VALUE_PART, text);
    Ok(form)
}

/// Produce the slot text for a value, plus the blobs it references keyed by part name.
pub fn stringify(value: &Value) -> Result<(String, Vec<(String, Blob)>), CodecError> {
    let mut encoder = Encoder::default();
    let root = encoder.flatten(value);
    let text = if root < 0 {
        root.to_string()
    } else {
        serde_json::to_string(&encoder.slots)?
    };
    trace!(slots = encoder.slots.len(), blobs = encoder.blobs.len(), "Encoded structured value");
    Ok((text, encoder.blobs))
}

#[derive(Default)]
struct Encoder {
    slots: Vec<Json>,
    blobs: Vec<(String, Blob)>,
}

impl Encoder {
    fn flatten(&mut self, value: &Value) -> i64 {
        match value {
            Value::Undefined => return UNDEFINED,
            Value::Number(n) if n.is_nan() => return NAN,
            Value::Number(n) if n.is_infinite() => {
                return if *n > 0.0 { POSITIVE_INFINITY } else { NEGATIVE_INFINITY };
            }
            Value::Number(n) if *n == 0.0 && n.is_sign_negative() => return NEGATIVE_ZERO,
            _ => {}
        }

        let index = self.slots.len();
        self.slots.push(Json::Null);
        let slot = match value {
            Value::Null | Value::Undefined => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number(*n),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(at) => json!(["Date", format_date(at)]),
            Value::Url(url) => {
                let href = self.flatten(&Value::String(url.to_string()));
                json!(["URL", href])
            }
            Value::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|item| Json::from(self.flatten(item)))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut object = JsonMap::new();
                for (key, item) in map {
                    object.insert(key.clone(), Json::from(self.flatten(item)));
                }
                Json::Object(object)
            }
            Value::Set(items) => {
                let mut slot = vec![Json::from("Set")];
                slot.extend(items.iter().map(|item| Json::from(self.flatten(item))));
                Json::Array(slot)
            }
            Value::Map(pairs) => {
                let mut slot = vec![Json::from("Map")];
                for (key, item) in pairs {
                    slot.push(Json::from(self.flatten(key)));
                    slot.push(Json::from(self.flatten(item)));
                }
                Json::Array(slot)
            }
            Value::Blob(blob) => {
                let token = format!("blob-{}", self.blobs.len());
                self.blobs.push((token.clone(), blob.clone()));
                let reference = self.flatten(&Value::String(token));
                let tag = if blob.is_file() { "File" } else { "Blob" };
                json!([tag, reference])
            }
        };
        self.slots[index] = slot;
        index as i64
    }
}

fn number(n: f64) -> Json {
    if n == n.trunc() && n.abs() <= MAX_SAFE_INTEGER {
        Json::from(n as i64)
    } else {
        Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a structured form, re-attaching blob parts by name.
pub fn decode(form: &FormData) -> Result<Value, CodecError> {
    let text = form
        .get(VALUE_PART)
        .and_then(FormValue::as_text)
        .ok_or_else(|| CodecError::malformed("missing 'value' part"))?;
    parse(text, |token| match form.get(token) {
        Some(FormValue::Blob(blob)) => Some(blob.clone()),
        Some(FormValue::Text(text)) => Some(Blob::new(text.clone().into_bytes(), "text/plain")),
        None => None,
    })
}

/// Parse slot text; `resolve_blob` maps a part name to its blob.
///
/// Fails as malformed when references nest deeper than [`MAX_DEPTH`] or when shared slots
/// would hydrate more values than the text size allows.
pub fn parse<F>(text: &str, resolve_blob: F) -> Result<Value, CodecError>
where
    F: Fn(&str) -> Option<Blob>,
{
    let parsed: Json = serde_json::from_str(text)?;
    match parsed {
        Json::Number(n) => {
            let index = n
                .as_i64()
                .ok_or_else(|| CodecError::malformed("invalid root index"))?;
            special(index).ok_or_else(|| CodecError::malformed("invalid root index"))
        }
        Json::Array(slots) if !slots.is_empty() => {
            let mut decoder = Decoder {
                slots: &slots,
                resolve_blob: &resolve_blob,
                visiting: vec![false; slots.len()],
                depth: 0,
                hydrated: 0,
                budget: text.len().saturating_mul(SHARED_EXPANSION),
            };
            decoder.hydrate(0)
        }
        _ => Err(CodecError::malformed("expected a slot array")),
    }
}

fn special(index: i64) -> Option<Value> {
    match index {
        UNDEFINED | HOLE => Some(Value::Undefined),
        NAN => Some(Value::Number(f64::NAN)),
        POSITIVE_INFINITY => Some(Value::Number(f64::INFINITY)),
        NEGATIVE_INFINITY => Some(Value::Number(f64::NEG_INFINITY)),
        NEGATIVE_ZERO => Some(Value::Number(-0.0)),
        _ => None,
    }
}

struct Decoder<'a, F> {
    slots: &'a [Json],
    resolve_blob: &'a F,
    visiting: Vec<bool>,
    depth: usize,
    hydrated: usize,
    budget: usize,
}

impl<F> Decoder<'_, F>
where
    F: Fn(&str) -> Option<Blob>,
{
    fn index_of(&self, reference: &Json) -> Result<i64, CodecError> {
        reference
            .as_i64()
            .ok_or_else(|| CodecError::malformed(format!("expected a slot index, found {}", reference)))
    }

    fn hydrate_ref(&mut self, reference: &Json) -> Result<Value, CodecError> {
        let index = self.index_of(reference)?;
        self.hydrate(index)
    }

    fn hydrate(&mut self, index: i64) -> Result<Value, CodecError> {
        self.hydrated += 1;
        if self.hydrated > self.budget {
            return Err(CodecError::malformed(format!(
                "payload expands past {} values",
                self.budget
            )));
        }
        if index < 0 {
            return special(index)
                .ok_or_else(|| CodecError::malformed(format!("invalid slot index {}", index)));
        }
        let i = index as usize;
        let slots = self.slots;
        let slot = slots
            .get(i)
            .ok_or_else(|| CodecError::malformed(format!("slot {} out of range", i)))?;
        if self.visiting[i] {
            return Err(CodecError::malformed("cyclic values are not supported"));
        }
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::malformed(format!(
                "values nest deeper than {} levels",
                MAX_DEPTH
            )));
        }
        self.visiting[i] = true;
        self.depth += 1;
        let value = self.hydrate_slot(slot);
        self.depth -= 1;
        self.visiting[i] = false;
        value
    }

    fn hydrate_slot(&mut self, slot: &Json) -> Result<Value, CodecError> {
        match slot {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| CodecError::malformed("invalid number")),
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Object(map) => {
                let mut object = BTreeMap::new();
                for (key, reference) in map {
                    object.insert(key.clone(), self.hydrate_ref(reference)?);
                }
                Ok(Value::Object(object))
            }
            Json::Array(items) => match items.split_first() {
                Some((Json::String(tag), rest)) => self.hydrate_tagged(tag, rest),
                _ => items
                    .iter()
                    .map(|reference| self.hydrate_ref(reference))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
            },
        }
    }

    fn hydrate_tagged(&mut self, tag: &str, rest: &[Json]) -> Result<Value, CodecError> {
        match tag {
            "Date" => {
                let text = rest.first().and_then(Json::as_str).unwrap_or_default();
                parse_date(text)
                    .map(Value::Date)
                    .ok_or_else(|| CodecError::malformed(format!("invalid date: {}", text)))
            }
            "Set" => rest
                .iter()
                .map(|reference| self.hydrate_ref(reference))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Set),
            "Map" => {
                let mut pairs = Vec::with_capacity(rest.len() / 2);
                for pair in rest.chunks(2) {
                    let [key, value] = pair else {
                        return Err(CodecError::malformed("map with a dangling key"));
                    };
                    pairs.push((self.hydrate_ref(key)?, self.hydrate_ref(value)?));
                }
                Ok(Value::Map(pairs))
            }
            "null" => {
                let mut object = BTreeMap::new();
                for pair in rest.chunks(2) {
                    let [Json::String(key), value] = pair else {
                        return Err(CodecError::malformed("malformed null-prototype object"));
                    };
                    object.insert(key.clone(), self.hydrate_ref(value)?);
                }
                Ok(Value::Object(object))
            }
            "Object" => Ok(rest
                .first()
                .map(|primitive| match primitive {
                    Json::String(s) => Value::String(s.clone()),
                    Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
                    Json::Bool(b) => Value::Bool(*b),
                    _ => Value::Null,
                })
                .unwrap_or(Value::Null)),
            "BigInt" => {
                let text = rest.first().and_then(Json::as_str).unwrap_or_default();
                text.parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| CodecError::malformed(format!("invalid bigint: {}", text)))
            }
            "URL" => {
                let href = self.hydrate_reference_string(rest)?;
                Url::parse(&href)
                    .map(Value::Url)
                    .map_err(|e| CodecError::malformed(format!("invalid url {}: {}", href, e)))
            }
            "File" | "Blob" => {
                let token = self.hydrate_reference_string(rest)?;
                let mut blob = (self.resolve_blob)(&token).ok_or_else(|| {
                    CodecError::malformed(format!("missing binary part '{}'", token))
                })?;
                if tag == "File" {
                    blob.name.get_or_insert(token);
                } else {
                    blob.name = None;
                }
                Ok(Value::Blob(blob))
            }
            other => Err(CodecError::malformed(format!("unknown type '{}'", other))),
        }
    }

    fn hydrate_reference_string(&mut self, rest: &[Json]) -> Result<String, CodecError> {
        let reference = rest
            .first()
            .ok_or_else(|| CodecError::malformed("missing reference"))?;
        match self.hydrate_ref(reference)? {
            Value::String(s) => Ok(s),
            other => Err(CodecError::malformed(format!(
                "expected a string reference, found {}",
                other.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn text_of(value: &Value) -> String {
        stringify(value).unwrap().0
    }

    #[test]
    fn test_slot_layout() {
        let value = Value::object([("a", Value::Array(vec![1.into(), 2.into()]))]);
        assert_eq!(text_of(&value), r#"[{"a":1},[2,3],1,2]"#);
    }

    #[test]
    fn test_special_roots_are_bare_numbers() {
        assert_eq!(text_of(&Value::Undefined), "-1");
        assert_eq!(text_of(&Value::Number(f64::NAN)), "-3");
        assert_eq!(text_of(&Value::Number(-0.0)), "-6");
        assert!(parse("-3", |_| None).unwrap().as_f64().unwrap().is_nan());
        assert_eq!(parse("-1", |_| None).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_date_and_collections() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let value = Value::object([
            ("at", Value::date(at)),
            ("set", Value::Set(vec!["x".into()])),
            ("map", Value::Map(vec![(Value::Null, Value::Bool(false))])),
        ]);
        let text = text_of(&value);
        assert!(text.contains(r#"["Date","2024-01-01T00:00:00.000Z"]"#));
        assert!(text.contains(r#"["Set","#));
        assert!(text.contains(r#"["Map","#));
        assert_eq!(parse(&text, |_| None).unwrap(), value);
    }

    #[test]
    fn test_blobs_become_parts() {
        let file = Blob::file("report.pdf", vec![37u8, 80, 68, 70], "application/pdf");
        let value = Value::object([("doc", Value::Blob(file.clone()))]);
        let form = encode(&value).unwrap();
        assert!(matches!(form.get("blob-0"), Some(FormValue::Blob(_))));
        assert_eq!(decode(&form).unwrap(), value);
    }

    #[test]
    fn test_missing_blob_part_fails() {
        let err = parse(r#"[["Blob",1],"blob-0"]"#, |_| None).unwrap_err();
        assert!(err.to_string().contains("blob-0"));
    }

    #[test]
    fn test_shared_slots_are_cloned() {
        let value = parse(r#"[{"a":1,"b":1},{"x":2},"shared"]"#, |_| None).unwrap();
        assert_eq!(value.get("a"), value.get("b"));
    }

    /// Slot `i` references slot `i + 1` twice, doubling the output at every level.
    fn doubling_chain(levels: usize) -> String {
        let mut slots: Vec<String> = (1..=levels).map(|i| format!("[{},{}]", i, i)).collect();
        slots.push("true".to_string());
        format!("[{}]", slots.join(","))
    }

    #[test]
    fn test_shared_slot_expansion_is_bounded() {
        assert!(parse(&doubling_chain(3), |_| None).is_ok());

        let err = parse(&doubling_chain(24), |_| None).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_deep_reference_chains_fail() {
        let chain = |levels: usize| {
            let mut slots: Vec<String> = (1..=levels).map(|i| format!("[{}]", i)).collect();
            slots.push("0".to_string());
            format!("[{}]", slots.join(","))
        };
        assert!(parse(&chain(MAX_DEPTH - 1), |_| None).is_ok());

        let err = parse(&chain(100_000), |_| None).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_cycles_are_rejected() {
        assert!(parse(r#"[{"self":0}]"#, |_| None).is_err());
    }

    #[test]
    fn test_url_round_trip() {
        let value = Value::Url(Url::parse("https://example.com/search?q=rust").unwrap());
        let text = text_of(&value);
        assert_eq!(text, r#"[["URL",1],"https://example.com/search?q=rust"]"#);
        assert_eq!(parse(&text, |_| None).unwrap(), value);
    }
}
