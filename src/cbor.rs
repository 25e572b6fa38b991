//! Typed, fallible accessors over [ciborium::Value] trees.
//!
//! Every wire structure in this crate is decoded through these helpers, so malformed input always
//! surfaces as a typed [Error] carrying the offending CBOR in diagnostic form.
use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Cursor;

use ciborium::Value;
use coset::Label;

use crate::definitions::traits::FromCbor;
use crate::error::Error;
use crate::validated::Validated;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Tag number of an embedded CBOR data item (RFC 8949 §3.4.5.1).
pub const TAG_ENCODED_CBOR: u64 = 24;
/// Tag number of an RFC 3339 date-time string.
pub const TAG_TDATE: u64 = 0;
/// Tag number of a full-date string (RFC 8943).
pub const TAG_FULL_DATE: u64 = 1004;

/// Encode a value to bytes.
pub fn to_vec(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| Error::CborEncoding(e.to_string()))?;
    Ok(buf)
}

/// Decode exactly one value from bytes, rejecting trailing data.
pub fn from_slice(bytes: &[u8]) -> Result<Value> {
    let mut cursor = Cursor::new(bytes);
    let value: Value =
        ciborium::from_reader(&mut cursor).map_err(|e| Error::CborDecoding(e.to_string()))?;
    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(Error::CborDecoding(format!(
            "{} bytes of extraneous data",
            bytes.len() - consumed
        )));
    }
    Ok(value)
}

/// Diagnostic text of a value, used in error messages.
pub fn diagnostic(value: &Value) -> String {
    format!("{value:?}")
}

fn wrong_type(expected: &'static str, value: &Value) -> Error {
    Error::CborWrongType {
        expected,
        cbor: diagnostic(value),
    }
}

pub fn as_map(value: &Value) -> Result<&[(Value, Value)]> {
    value
        .as_map()
        .map(Vec::as_slice)
        .ok_or_else(|| wrong_type("map", value))
}

pub fn as_array(value: &Value) -> Result<&[Value]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| wrong_type("array", value))
}

/// Whether a map key is the given COSE label.
pub fn label_matches(key: &Value, label: &Label) -> bool {
    match (key, label) {
        (Value::Integer(i), Label::Int(l)) => i128::from(*i) == i128::from(*l),
        (Value::Text(t), Label::Text(l)) => t == l,
        _ => false,
    }
}

pub fn label_to_value(label: &Label) -> Value {
    match label {
        Label::Int(i) => Value::Integer((*i).into()),
        Label::Text(t) => Value::Text(t.clone()),
    }
}

fn label_name(label: &Label) -> String {
    match label {
        Label::Int(i) => i.to_string(),
        Label::Text(t) => format!("\"{t}\""),
    }
}

/// Shorthand for a text label.
pub fn text(label: &str) -> Label {
    Label::Text(label.to_string())
}

/// Look up an optional entry of a map.
pub fn get_opt_by_label<'a>(map: &'a [(Value, Value)], label: &Label) -> Option<&'a Value> {
    map.iter()
        .find(|(key, _)| label_matches(key, label))
        .map(|(_, value)| value)
}

/// Look up a mandatory entry of a map.
pub fn get_by_label<'a>(map: &'a [(Value, Value)], label: &Label) -> Result<&'a Value> {
    get_opt_by_label(map, label).ok_or_else(|| Error::CborFieldNotFound {
        label: label_name(label),
    })
}

pub fn get_by_index(array: &[Value], index: usize) -> Result<&Value> {
    array.get(index).ok_or(Error::CborIndexNotFound {
        index,
        len: array.len(),
    })
}

pub fn get_byte_string(value: &Value) -> Result<&[u8]> {
    value
        .as_bytes()
        .map(Vec::as_slice)
        .ok_or_else(|| Error::CborNotAByteString {
            cbor: diagnostic(value),
        })
}

pub fn get_text(value: &Value) -> Result<&str> {
    value.as_text().ok_or_else(|| wrong_type("text", value))
}

pub fn get_int(value: &Value) -> Result<i128> {
    value
        .as_integer()
        .map(i128::from)
        .ok_or_else(|| Error::CborNotANumber {
            cbor: diagnostic(value),
        })
}

pub fn get_uint(value: &Value) -> Result<u64> {
    let int = get_int(value)?;
    u64::try_from(int).map_err(|_| wrong_type("unsigned integer", value))
}

pub fn get_bool(value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| wrong_type("bool", value))
}

/// Wrap already-encoded bytes as an embedded CBOR data item.
pub fn wrap_tag24(inner_bytes: Vec<u8>) -> Value {
    Value::Tag(TAG_ENCODED_CBOR, Box::new(Value::Bytes(inner_bytes)))
}

/// The encoded bytes held by an embedded CBOR data item.
pub fn unwrap_tag24(value: &Value) -> Result<&[u8]> {
    match value {
        Value::Tag(TAG_ENCODED_CBOR, inner) => get_byte_string(inner),
        _ => Err(wrong_type("tag 24 byte string", value)),
    }
}

/// Look up a mandatory entry of a map and convert it.
pub fn field<'a, T>(
    map: &'a [(Value, Value)],
    label: &Label,
    convert: impl FnOnce(&'a Value) -> Result<T>,
) -> Result<T> {
    get_by_label(map, label).and_then(convert)
}

/// Look up an optional entry of a map and convert it when present.
pub fn opt_field<'a, T>(
    map: &'a [(Value, Value)],
    label: &Label,
    convert: impl FnOnce(&'a Value) -> Result<T>,
) -> Result<Option<T>> {
    get_opt_by_label(map, label).map(convert).transpose()
}

/// Decode a mandatory, text-labelled entry of a map.
pub fn decode_field<T: FromCbor>(map: &[(Value, Value)], name: &str) -> Validated<T> {
    T::from_cbor(get_by_label(map, &text(name))?)
}

/// Decode an optional, text-labelled entry of a map.
pub fn decode_opt_field<T: FromCbor>(map: &[(Value, Value)], name: &str) -> Validated<Option<T>> {
    get_opt_by_label(map, &text(name))
        .map(T::from_cbor)
        .transpose()
}

/// Collect decoded map entries, rejecting any key that appears twice.
pub fn unique_keys<K, V>(entries: Vec<(K, V)>, context: &'static str) -> Result<BTreeMap<K, V>>
where
    K: Ord + Display,
{
    let mut map = BTreeMap::new();
    for (key, value) in entries {
        let duplicate = key.to_string();
        if map.insert(key, value).is_some() {
            return Err(Error::DuplicateKey {
                context,
                key: duplicate,
            });
        }
    }
    Ok(map)
}

/// Wire order of the text keys of a decoded map, replayed when the structure is encoded again.
///
/// Key order does not take part in equality.
#[derive(Clone, Debug, Default)]
pub struct KeyOrder(Vec<String>);

impl KeyOrder {
    pub fn of(map: &[(Value, Value)]) -> Self {
        Self(
            map.iter()
                .filter_map(|(key, _)| key.as_text().map(str::to_string))
                .collect(),
        )
    }

    /// Assemble a map from `entries`. Recorded keys come first in their recorded order, the
    /// others follow in the order given.
    pub fn map(&self, mut entries: Vec<(&str, Value)>) -> Value {
        entries.sort_by_key(|(key, _)| {
            self.0
                .iter()
                .position(|recorded| recorded == key)
                .unwrap_or(usize::MAX)
        });
        Value::Map(
            entries
                .into_iter()
                .map(|(key, value)| (Value::Text(key.to_string()), value))
                .collect(),
        )
    }
}

impl PartialEq for KeyOrder {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}
