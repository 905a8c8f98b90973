//! `Serialize` → [`Value`]

use super::{
    BLOB_TOKEN, Blob, DATE_TOKEN, MAP_TOKEN, OCTET_STREAM, SET_TOKEN, UNDEFINED_TOKEN, URL_TOKEN,
    Value, parse_date,
};
use crate::codec::CodecError;
use bytes::Bytes;
use serde::Serialize;
use serde::ser::{self, Error as _};
use std::collections::BTreeMap;
use url::Url;

/// Convert any serializable value into a [`Value`].
///
/// Options map `None` to `null`, byte slices become octet-stream blobs, and maps whose keys
/// are all strings become objects (other maps keep their keys as [`Value::Map`]).
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    value.serialize(ValueSerializer)
}

pub(crate) struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = CodecError;
    type SerializeSeq = SerializeVec;
    type SerializeTuple = SerializeVec;
    type SerializeTupleStruct = SerializeVec;
    type SerializeTupleVariant = SerializeTupleVariant;
    type SerializeMap = SerializeMap;
    type SerializeStruct = SerializeMap;
    type SerializeStructVariant = SerializeStructVariant;

    fn serialize_bool(self, v: bool) -> Result<Value, CodecError> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, CodecError> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, CodecError> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, CodecError> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, CodecError> {
        Ok(Value::Number(v as f64))
    }

    fn serialize_u8(self, v: u8) -> Result<Value, CodecError> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, CodecError> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, CodecError> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, CodecError> {
        Ok(Value::Number(v as f64))
    }

    fn serialize_f32(self, v: f32) -> Result<Value, CodecError> {
        Ok(Value::Number(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, CodecError> {
        Ok(Value::Number(v))
    }

    fn serialize_char(self, v: char) -> Result<Value, CodecError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, CodecError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Blob(Blob::new(Bytes::copy_from_slice(v), OCTET_STREAM)))
    }

    fn serialize_none(self) -> Result<Value, CodecError> {
        Ok(Value::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value, CodecError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value, CodecError> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, CodecError> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value, CodecError> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Value, CodecError> {
        let inner = value.serialize(ValueSerializer)?;
        match name {
            UNDEFINED_TOKEN => Ok(Value::Undefined),
            DATE_TOKEN => match &inner {
                Value::String(text) => parse_date(text)
                    .map(Value::Date)
                    .ok_or_else(|| CodecError::custom(format!("invalid date: {}", text))),
                Value::Date(_) => Ok(inner),
                other => Err(CodecError::custom(format!(
                    "expected a date string, found {}",
                    other.kind()
                ))),
            },
            URL_TOKEN => match &inner {
                Value::String(text) => Url::parse(text)
                    .map(Value::Url)
                    .map_err(|e| CodecError::custom(format!("invalid url {}: {}", text, e))),
                other => Err(CodecError::custom(format!(
                    "expected a url string, found {}",
                    other.kind()
                ))),
            },
            SET_TOKEN => match inner {
                Value::Array(items) => Ok(Value::Set(items)),
                other => Err(CodecError::custom(format!(
                    "expected set items, found {}",
                    other.kind()
                ))),
            },
            MAP_TOKEN => match inner {
                Value::Array(items) => items
                    .into_iter()
                    .map(|pair| match pair {
                        Value::Array(mut kv) if kv.len() == 2 => {
                            let value = kv.pop().unwrap_or_default();
                            let key = kv.pop().unwrap_or_default();
                            Ok((key, value))
                        }
                        other => Err(CodecError::custom(format!(
                            "expected a map entry pair, found {}",
                            other.kind()
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Map),
                other => Err(CodecError::custom(format!(
                    "expected map entries, found {}",
                    other.kind()
                ))),
            },
            BLOB_TOKEN => blob_from_parts(inner),
            _ => Ok(inner),
        }
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, CodecError> {
        let mut map = BTreeMap::new();
        map.insert(variant.to_string(), to_value(value)?);
        Ok(Value::Object(map))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeVec, CodecError> {
        Ok(SerializeVec {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SerializeVec, CodecError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeVec, CodecError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeTupleVariant, CodecError> {
        Ok(SerializeTupleVariant {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<SerializeMap, CodecError> {
        Ok(SerializeMap {
            entries: Vec::new(),
            pending_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeMap, CodecError> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<SerializeStructVariant, CodecError> {
        Ok(SerializeStructVariant {
            variant,
            fields: BTreeMap::new(),
        })
    }
}

fn blob_from_parts(inner: Value) -> Result<Value, CodecError> {
    let Value::Array(parts) = inner else {
        return Err(CodecError::custom("malformed blob"));
    };
    let mut parts = parts.into_iter();
    let name = match parts.next() {
        Some(Value::String(name)) => Some(name),
        Some(Value::Null) => None,
        _ => return Err(CodecError::custom("malformed blob name")),
    };
    let media_type = match parts.next() {
        Some(Value::String(media_type)) => media_type,
        _ => return Err(CodecError::custom("malformed blob media type")),
    };
    let data = match parts.next() {
        Some(Value::Blob(raw)) => raw.data,
        _ => return Err(CodecError::custom("malformed blob data")),
    };
    Ok(Value::Blob(Blob {
        name,
        media_type,
        data,
    }))
}

pub(crate) struct SerializeVec {
    items: Vec<Value>,
}

impl ser::SerializeSeq for SerializeVec {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        self.items.push(to_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Value, CodecError> {
        Ok(Value::Array(self.items))
    }
}

impl ser::SerializeTuple for SerializeVec {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, CodecError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SerializeVec {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, CodecError> {
        ser::SerializeSeq::end(self)
    }
}

pub(crate) struct SerializeTupleVariant {
    variant: &'static str,
    items: Vec<Value>,
}

impl ser::SerializeTupleVariant for SerializeTupleVariant {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        self.items.push(to_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Value, CodecError> {
        let mut map = BTreeMap::new();
        map.insert(self.variant.to_string(), Value::Array(self.items));
        Ok(Value::Object(map))
    }
}

pub(crate) struct SerializeMap {
    entries: Vec<(Value, Value)>,
    pending_key: Option<Value>,
}

impl ser::SerializeMap for SerializeMap {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), CodecError> {
        self.pending_key = Some(to_value(key)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| CodecError::custom("map value without a key"))?;
        self.entries.push((key, to_value(value)?));
        Ok(())
    }

    fn end(self) -> Result<Value, CodecError> {
        if self
            .entries
            .iter()
            .all(|(key, _)| matches!(key, Value::String(_)))
        {
            let map = self
                .entries
                .into_iter()
                .filter_map(|(key, value)| match key {
                    Value::String(key) => Some((key, value)),
                    _ => None,
                })
                .collect();
            Ok(Value::Object(map))
        } else {
            Ok(Value::Map(self.entries))
        }
    }
}

impl ser::SerializeStruct for SerializeMap {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        self.entries
            .push((Value::String(key.to_string()), to_value(value)?));
        Ok(())
    }

    fn end(self) -> Result<Value, CodecError> {
        ser::SerializeMap::end(self)
    }
}

pub(crate) struct SerializeStructVariant {
    variant: &'static str,
    fields: BTreeMap<String, Value>,
}

impl ser::SerializeStructVariant for SerializeStructVariant {
    type Ok = Value;
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        self.fields.insert(key.to_string(), to_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Value, CodecError> {
        let mut map = BTreeMap::new();
        map.insert(self.variant.to_string(), Value::Object(self.fields));
        Ok(Value::Object(map))
    }
}
