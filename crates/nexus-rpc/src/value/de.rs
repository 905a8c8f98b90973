//! [`Value`] → `Deserialize`

use super::{
    BLOB_VARIANT, Blob, DATE_VARIANT, MAP_VARIANT, OCTET_STREAM, SET_VARIANT, SPECIAL_VARIANTS,
    UNDEFINED_VARIANT, URL_VARIANT, VALUE_TOKEN, Value, format_date, parse_date,
};
use crate::codec::CodecError;
use bytes::Bytes;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, EnumAccess, Error as _,
    IntoDeserializer, MapAccess, SeqAccess, VariantAccess, Visitor,
};
use serde::{Deserialize, forward_to_deserialize_any};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Convert a [`Value`] into any deserializable type.
///
/// Dates and URLs are presented as strings, so `chrono` and `url` fields accept them directly.
/// `undefined` and `null` both read as `None` for optional fields.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    T::deserialize(value)
}

fn visit_number<'de, V: Visitor<'de>>(n: f64, visitor: V) -> Result<V::Value, CodecError> {
    let integral = n.is_finite()
        && n == n.trunc()
        && n.abs() <= MAX_SAFE_INTEGER
        && !(n == 0.0 && n.is_sign_negative());
    if !integral {
        visitor.visit_f64(n)
    } else if n >= 0.0 {
        visitor.visit_u64(n as u64)
    } else {
        visitor.visit_i64(n as i64)
    }
}

fn object_entries(map: BTreeMap<String, Value>) -> Vec<(Value, Value)> {
    map.into_iter()
        .map(|(key, value)| (Value::String(key), value))
        .collect()
}

/// Hand a value to `Value`'s own visitor without losing its kind.
fn deserialize_exact<'de, V: Visitor<'de>>(value: Value, visitor: V) -> Result<V::Value, CodecError> {
    let special = |variant: &str, payload: Option<Value>| EnumDeserializer {
        variant: variant.to_string(),
        value: payload,
    };
    match value {
        Value::Undefined => visitor.visit_enum(special(UNDEFINED_VARIANT, None)),
        Value::Date(at) => {
            visitor.visit_enum(special(DATE_VARIANT, Some(Value::String(format_date(&at)))))
        }
        Value::Url(url) => visitor.visit_enum(special(URL_VARIANT, Some(Value::String(url.into())))),
        Value::Set(items) => visitor.visit_enum(special(SET_VARIANT, Some(Value::Array(items)))),
        Value::Map(pairs) => {
            let pairs = pairs
                .into_iter()
                .map(|(key, value)| Value::Array(vec![key, value]))
                .collect();
            visitor.visit_enum(special(MAP_VARIANT, Some(Value::Array(pairs))))
        }
        Value::Blob(blob) => {
            let payload = Value::Array(vec![
                blob.name.map(Value::String).unwrap_or(Value::Null),
                Value::String(blob.media_type),
                Value::Blob(Blob::new(blob.data, OCTET_STREAM)),
            ]);
            visitor.visit_enum(special(BLOB_VARIANT, Some(payload)))
        }
        other => other.deserialize_any(visitor),
    }
}

impl<'de> Deserializer<'de> for Value {
    type Error = CodecError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self {
            Value::Undefined | Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Number(n) => visit_number(n, visitor),
            Value::String(s) => visitor.visit_string(s),
            Value::Date(at) => visitor.visit_string(format_date(&at)),
            Value::Url(url) => visitor.visit_string(url.into()),
            Value::Array(items) | Value::Set(items) => visitor.visit_seq(SeqDeserializer {
                iter: items.into_iter(),
            }),
            Value::Object(map) => visitor.visit_map(MapDeserializer::new(object_entries(map))),
            Value::Map(pairs) => visitor.visit_map(MapDeserializer::new(pairs)),
            Value::Blob(blob) => visitor.visit_byte_buf(blob.data.to_vec()),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self {
            Value::Undefined | Value::Null => visitor.visit_none(),
            other => visitor.visit_some(other),
        }
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self {
            Value::Number(n) => visitor.visit_f64(n),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        self.deserialize_byte_buf(visitor)
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self {
            Value::Blob(blob) => visitor.visit_byte_buf(blob.data.to_vec()),
            Value::String(s) => visitor.visit_byte_buf(s.into_bytes()),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        match self {
            Value::Undefined | Value::Null => visitor.visit_unit(),
            other => Err(CodecError::invalid_type(
                de::Unexpected::Other(other.kind()),
                &"null",
            )),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        if name == VALUE_TOKEN {
            deserialize_exact(self, visitor)
        } else {
            visitor.visit_newtype_struct(self)
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        match self {
            Value::String(variant) => visitor.visit_enum(EnumDeserializer {
                variant,
                value: None,
            }),
            Value::Object(map) if map.len() == 1 => {
                let Some((variant, value)) = map.into_iter().next() else {
                    return Err(CodecError::custom("expected a single-key object"));
                };
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: Some(value),
                })
            }
            other => Err(CodecError::invalid_type(
                de::Unexpected::Other(other.kind()),
                &"a string or a single-key object",
            )),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_unit()
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 char str string
        unit_struct seq tuple tuple_struct map struct identifier
    }
}

impl<'de> IntoDeserializer<'de, CodecError> for Value {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

struct SeqDeserializer {
    iter: std::vec::IntoIter<Value>,
}

impl<'de> SeqAccess<'de> for SeqDeserializer {
    type Error = CodecError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, CodecError> {
        self.iter
            .next()
            .map(|value| seed.deserialize(value))
            .transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: std::vec::IntoIter<(Value, Value)>,
    value: Option<Value>,
}

impl MapDeserializer {
    fn new(entries: Vec<(Value, Value)>) -> Self {
        Self {
            iter: entries.into_iter(),
            value: None,
        }
    }
}

impl<'de> MapAccess<'de> for MapDeserializer {
    type Error = CodecError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, CodecError> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<T::Value, CodecError> {
        let value = self
            .value
            .take()
            .ok_or_else(|| CodecError::custom("map value requested before its key"))?;
        seed.deserialize(value)
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumDeserializer {
    variant: String,
    value: Option<Value>,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = CodecError;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, VariantDeserializer), CodecError> {
        let variant = seed.deserialize(Value::String(self.variant))?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Option<Value>,
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = CodecError;

    fn unit_variant(self) -> Result<(), CodecError> {
        match self.value {
            None | Some(Value::Null) | Some(Value::Undefined) => Ok(()),
            Some(other) => Err(CodecError::invalid_type(
                de::Unexpected::Other(other.kind()),
                &"unit variant",
            )),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, CodecError> {
        match self.value {
            Some(value) => seed.deserialize(value),
            None => Err(CodecError::invalid_type(
                de::Unexpected::UnitVariant,
                &"newtype variant",
            )),
        }
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, CodecError> {
        match self.value {
            Some(value) => value.deserialize_seq(visitor),
            None => Err(CodecError::invalid_type(
                de::Unexpected::UnitVariant,
                &"tuple variant",
            )),
        }
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        match self.value {
            Some(value) => value.deserialize_map(visitor),
            None => Err(CodecError::invalid_type(
                de::Unexpected::UnitVariant,
                &"struct variant",
            )),
        }
    }
}

// =============================================================================
// Value's visitor
// =============================================================================

/// Byte payload that accepts raw bytes or a sequence of numbers.
struct RawBuf(Vec<u8>);

impl<'de> Deserialize<'de> for RawBuf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawBufVisitor;

        impl<'de> Visitor<'de> for RawBufVisitor {
            type Value = RawBuf;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<RawBuf, E> {
                Ok(RawBuf(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<RawBuf, E> {
                Ok(RawBuf(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawBuf, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                Ok(RawBuf(bytes))
            }
        }

        deserializer.deserialize_byte_buf(RawBufVisitor)
    }
}

pub(crate) struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Blob(Blob::new(Bytes::copy_from_slice(v), OCTET_STREAM)))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Blob(Blob::new(v, OCTET_STREAM)))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<Value, Value>()? {
            entries.push((key, value));
        }
        if entries.iter().all(|(key, _)| matches!(key, Value::String(_))) {
            Ok(Value::Object(
                entries
                    .into_iter()
                    .filter_map(|(key, value)| match key {
                        Value::String(key) => Some((key, value)),
                        _ => None,
                    })
                    .collect(),
            ))
        } else {
            Ok(Value::Map(entries))
        }
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Value, A::Error> {
        let (variant, access): (String, _) = data.variant()?;
        match variant.as_str() {
            UNDEFINED_VARIANT => access.unit_variant().map(|_| Value::Undefined),
            DATE_VARIANT => {
                let text: String = access.newtype_variant()?;
                parse_date(&text)
                    .map(Value::Date)
                    .ok_or_else(|| de::Error::custom(format!("invalid date: {}", text)))
            }
            URL_VARIANT => {
                let text: String = access.newtype_variant()?;
                Url::parse(&text)
                    .map(Value::Url)
                    .map_err(|e| de::Error::custom(format!("invalid url {}: {}", text, e)))
            }
            SET_VARIANT => access.newtype_variant::<Vec<Value>>().map(Value::Set),
            MAP_VARIANT => access
                .newtype_variant::<Vec<(Value, Value)>>()
                .map(Value::Map),
            BLOB_VARIANT => {
                let (name, media_type, RawBuf(data)) =
                    access.newtype_variant::<(Option<String>, String, RawBuf)>()?;
                Ok(Value::Blob(Blob {
                    name,
                    media_type,
                    data: data.into(),
                }))
            }
            other => Err(de::Error::unknown_variant(other, SPECIAL_VARIANTS)),
        }
    }
}
