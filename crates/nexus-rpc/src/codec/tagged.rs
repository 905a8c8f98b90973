//! Tagged flat encoding
//!
//! Every leaf of a value becomes one form entry named `"<tag>:<path>"`. Object properties
//! extend the path with `.key`, array and set elements with `[i]`, map entries with `[i][0]`
//! (key) and `[i][1]` (value). Blobs and files are written as binary parts under their key.
//!
//! | tag | kind | entry value |
//! |-----|------|-------------|
//! | `0` | string | the string |
//! | `1` | number | decimal text, `NaN`, `Infinity`, `-Infinity` |
//! | `2` | boolean | `true` / `false` |
//! | `3` | date | ISO-8601 with milliseconds |
//! | `4` | empty object | `{}` |
//! | `5` | empty array | `[]` |
//! | `6` | null | empty |
//! | `7` | undefined | empty |
//! | `8` | blob | binary part |
//! | `9` | file | binary part with file name |
//! | `10` | url | the URL |
//! | `11` | set marker | empty |
//! | `12` | map marker | empty |
//!
//! Roots that are not a non-empty object are wrapped under [`ROOT_KEY`]. Object keys must not
//! contain `.`, `[` or `]`; they would be read back as path separators.

use super::{CodecError, FormData, FormValue, MAX_DEPTH};
use crate::value::{Blob, Value, format_date, format_number, parse_date, parse_number};
use std::collections::BTreeMap;
use tracing::trace;
use url::Url;

/// Key wrapping roots that are not a non-empty object.
pub const ROOT_KEY: &str = "######ROOT######";

const TAG_STRING: &str = "0";
const TAG_NUMBER: &str = "1";
const TAG_BOOLEAN: &str = "2";
const TAG_DATE: &str = "3";
const TAG_OBJECT: &str = "4";
const TAG_ARRAY: &str = "5";
const TAG_NULL: &str = "6";
const TAG_UNDEFINED: &str = "7";
const TAG_BLOB: &str = "8";
const TAG_FILE: &str = "9";
const TAG_URL: &str = "10";
const TAG_SET: &str = "11";
const TAG_MAP: &str = "12";

const EMPTY_OBJECT: &str = "{}";
const EMPTY_ARRAY: &str = "[]";

// =============================================================================
// Encoding
// =============================================================================

/// Flatten a value into a tagged form. `undefined` produces an empty form.
pub fn encode(value: &Value) -> FormData {
    let mut form = FormData::new();
    match value {
        Value::Undefined => {}
        Value::Object(map) if !map.is_empty() => {
            for (key, item) in map {
                write(item, key, &mut form);
            }
        }
        other => write(other, ROOT_KEY, &mut form),
    }
    trace!(entries = form.len(), "Encoded tagged form");
    form
}

fn key(tag: &str, path: &str) -> String {
    format!("{}:{}", tag, path)
}

fn write(value: &Value, path: &str, form: &mut FormData) {
    match value {
        Value::String(s) => form.append_text(key(TAG_STRING, path), s.as_str()),
        Value::Number(n) => form.append_text(key(TAG_NUMBER, path), format_number(*n)),
        Value::Bool(b) => form.append_text(key(TAG_BOOLEAN, path), b.to_string()),
        Value::Date(at) => form.append_text(key(TAG_DATE, path), format_date(at)),
        Value::Url(url) => form.append_text(key(TAG_URL, path), url.as_str()),
        Value::Null => form.append_text(key(TAG_NULL, path), ""),
        Value::Undefined => form.append_text(key(TAG_UNDEFINED, path), ""),
        Value::Object(map) if map.is_empty() => {
            form.append_text(key(TAG_OBJECT, path), EMPTY_OBJECT)
        }
        Value::Object(map) => {
            for (name, item) in map {
                write(item, &format!("{}.{}", path, name), form);
            }
        }
        Value::Array(items) if items.is_empty() => {
            form.append_text(key(TAG_ARRAY, path), EMPTY_ARRAY)
        }
        Value::Array(items) => write_items(items, path, form),
        Value::Set(items) => {
            form.append_text(key(TAG_SET, path), "");
            write_items(items, path, form);
        }
        Value::Map(pairs) => {
            form.append_text(key(TAG_MAP, path), "");
            for (i, (k, v)) in pairs.iter().enumerate() {
                write(k, &format!("{}[{}][0]", path, i), form);
                write(v, &format!("{}[{}][1]", path, i), form);
            }
        }
        Value::Blob(blob) => {
            let tag = if blob.is_file() { TAG_FILE } else { TAG_BLOB };
            form.append_blob(key(tag, path), blob.clone());
        }
    }
}

fn write_items(items: &[Value], path: &str, form: &mut FormData) {
    for (i, item) in items.iter().enumerate() {
        write(item, &format!("{}[{}]", path, i), form);
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Rebuild a value from a tagged form. An empty form decodes to `undefined`; entries with an
/// unknown tag are ignored.
///
/// An element index must be smaller than the number of entries in the form, and a path may
/// not nest deeper than [`MAX_DEPTH`].
pub fn decode(form: &FormData) -> Result<Value, CodecError> {
    if form.is_empty() {
        return Ok(Value::Undefined);
    }

    let mut root = Value::Object(BTreeMap::new());
    for (name, entry) in form.iter() {
        let Some((tag, path)) = name.split_once(':') else {
            trace!(name, "Skipping untagged form entry");
            continue;
        };
        let Some(leaf) = leaf(tag, entry)? else {
            trace!(name, "Skipping form entry with unknown tag");
            continue;
        };
        let segments = split_path(path);
        if segments.len() > MAX_DEPTH {
            return Err(CodecError::malformed(format!(
                "path nests deeper than {} levels",
                MAX_DEPTH
            )));
        }
        insert(&mut root, &segments, leaf, form.len())?;
    }

    match root {
        Value::Object(mut map) if map.len() == 1 && map.contains_key(ROOT_KEY) => {
            Ok(map.remove(ROOT_KEY).unwrap_or_default())
        }
        other => Ok(other),
    }
}

/// `a.b[0][1]` → `["a", "b", "0", "1"]`
fn split_path(path: &str) -> Vec<String> {
    path.replace('[', ".")
        .replace(']', "")
        .split('.')
        .map(str::to_string)
        .collect()
}

fn text_of(entry: &FormValue) -> String {
    match entry {
        FormValue::Text(text) => text.clone(),
        FormValue::Blob(blob) => blob.text(),
    }
}

fn leaf(tag: &str, entry: &FormValue) -> Result<Option<Value>, CodecError> {
    let value = match tag {
        TAG_STRING => Value::String(text_of(entry)),
        TAG_NUMBER => {
            let text = text_of(entry);
            Value::Number(
                parse_number(&text)
                    .ok_or_else(|| CodecError::malformed(format!("invalid number: {}", text)))?,
            )
        }
        TAG_BOOLEAN => Value::Bool(text_of(entry) == "true"),
        TAG_DATE => {
            let text = text_of(entry);
            Value::Date(
                parse_date(&text)
                    .ok_or_else(|| CodecError::malformed(format!("invalid date: {}", text)))?,
            )
        }
        TAG_OBJECT => Value::Object(BTreeMap::new()),
        TAG_ARRAY => Value::Array(Vec::new()),
        TAG_NULL => Value::Null,
        TAG_UNDEFINED => Value::Undefined,
        TAG_BLOB | TAG_FILE => {
            let mut blob = match entry {
                FormValue::Blob(blob) => blob.clone(),
                FormValue::Text(text) => Blob::new(text.clone().into_bytes(), "text/plain"),
            };
            if tag == TAG_FILE {
                blob.name.get_or_insert_with(|| "blob".to_string());
            } else {
                blob.name = None;
            }
            Value::Blob(blob)
        }
        TAG_URL => {
            let text = text_of(entry);
            Value::Url(
                Url::parse(&text)
                    .map_err(|e| CodecError::malformed(format!("invalid url {}: {}", text, e)))?,
            )
        }
        TAG_SET => Value::Set(Vec::new()),
        TAG_MAP => Value::Map(Vec::new()),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Parse an element index; no form with `entries` entries can address an element at or past it.
fn index(segment: &str, entries: usize) -> Result<usize, CodecError> {
    let i: usize = segment
        .parse()
        .map_err(|_| CodecError::malformed(format!("expected an index, found '{}'", segment)))?;
    if i >= entries {
        return Err(CodecError::malformed(format!(
            "index {} out of range for a form of {} entries",
            i, entries
        )));
    }
    Ok(i)
}

fn container_for(segment: &str) -> Value {
    if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
        Value::Array(Vec::new())
    } else {
        Value::Object(BTreeMap::new())
    }
}

/// Place `leaf` at `segments` below `target`, creating arrays for numeric segments and
/// objects otherwise.
fn insert(
    target: &mut Value,
    segments: &[String],
    leaf: Value,
    entries: usize,
) -> Result<(), CodecError> {
    let Some((head, rest)) = segments.split_first() else {
        *target = settle(std::mem::take(target), leaf);
        return Ok(());
    };

    if target.is_undefined() {
        *target = container_for(head);
    }

    let slot = match target {
        Value::Object(map) => map.entry(head.clone()).or_default(),
        Value::Array(items) | Value::Set(items) => {
            let i = index(head, entries)?;
            if items.len() <= i {
                items.resize(i + 1, Value::Undefined);
            }
            &mut items[i]
        }
        Value::Map(pairs) => {
            let i = index(head, entries)?;
            if pairs.len() <= i {
                pairs.resize(i + 1, (Value::Undefined, Value::Undefined));
            }
            let (entry_key, entry_value) = &mut pairs[i];
            return match rest.split_first() {
                Some((side, rest)) if side == "0" => insert(entry_key, rest, leaf, entries),
                Some((side, rest)) if side == "1" => insert(entry_value, rest, leaf, entries),
                _ => Err(CodecError::malformed(format!(
                    "map entry {} needs a [0] or [1] selector",
                    i
                ))),
            };
        }
        other => {
            return Err(CodecError::malformed(format!(
                "cannot place '{}' inside a {}",
                head,
                other.kind()
            )));
        }
    };
    insert(slot, rest, leaf, entries)
}

/// Resolve a leaf landing on a slot that may already hold content.
fn settle(existing: Value, leaf: Value) -> Value {
    match (existing, leaf) {
        (Value::Array(items), Value::Set(marker)) if marker.is_empty() => Value::Set(items),
        (Value::Object(map), Value::Object(sentinel)) if sentinel.is_empty() => Value::Object(map),
        (Value::Array(items), Value::Array(sentinel)) if sentinel.is_empty() => Value::Array(items),
        (_, leaf) => leaf,
    }
}
