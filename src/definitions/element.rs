//! Disclosed data element values.
use ciborium::Value;
use serde_json::Value as JsonValue;

use crate::cbor;
use crate::definitions::identifiers::ElementIdentifier;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::validated::{collect_all, Validated};

/// The value of a data element, mirroring the shape of the CBOR it was decoded from.
///
/// Maps only carry text keys; any other CBOR value (including tagged values such as dates) is a
/// scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Scalar(Value),
    Array(Vec<Element>),
    Map(Vec<(ElementIdentifier, Element)>),
}

impl Element {
    pub fn text(s: impl Into<String>) -> Self {
        Element::Scalar(Value::Text(s.into()))
    }

    /// Full-date (RFC 8943), e.g. `2024-01-31`.
    pub fn full_date(s: impl Into<String>) -> Self {
        Element::Scalar(Value::Tag(cbor::TAG_FULL_DATE, Box::new(Value::Text(s.into()))))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Element::Scalar(value) => value.as_text(),
            Element::Array(_) | Element::Map(_) => None,
        }
    }

    /// Look up an entry of a map element.
    pub fn get(&self, identifier: &str) -> Option<&Element> {
        match self {
            Element::Map(entries) => entries
                .iter()
                .find(|(key, _)| key.as_str() == identifier)
                .map(|(_, value)| value),
            Element::Scalar(_) | Element::Array(_) => None,
        }
    }

    /// JSON rendering for display. Byte strings become base64url text and tags are dropped.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Element::Scalar(value) => scalar_to_json(value),
            Element::Array(items) => JsonValue::Array(items.iter().map(Element::to_json).collect()),
            Element::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

fn scalar_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Text(t) => JsonValue::String(t.clone()),
        Value::Integer(i) => {
            let i = i128::from(*i);
            i64::try_from(i)
                .map(JsonValue::from)
                .or_else(|_| u64::try_from(i).map(JsonValue::from))
                .unwrap_or_else(|_| JsonValue::String(i.to_string()))
        }
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Bytes(b) => JsonValue::String(base64::encode_config(b, base64::URL_SAFE_NO_PAD)),
        Value::Tag(_, inner) => scalar_to_json(inner),
        Value::Array(items) => JsonValue::Array(items.iter().map(scalar_to_json).collect()),
        Value::Map(entries) => JsonValue::Object(
            entries
                .iter()
                .map(|(k, v)| (cbor::diagnostic(k), scalar_to_json(v)))
                .collect(),
        ),
        _ => JsonValue::Null,
    }
}

impl FromCbor for Element {
    fn from_cbor(value: &Value) -> Validated<Self> {
        match value {
            Value::Array(items) => Ok(Element::Array(collect_all(
                items.iter().map(Element::from_cbor),
            )?)),
            Value::Map(entries) => Ok(Element::Map(collect_all(entries.iter().map(
                |(key, value)| {
                    crate::accumulate!(
                        ElementIdentifier::from_cbor(key),
                        Element::from_cbor(value)
                    )
                },
            ))?)),
            scalar => Ok(Element::Scalar(scalar.clone())),
        }
    }
}

impl ToCbor for Element {
    fn to_cbor(&self) -> Value {
        match self {
            Element::Scalar(value) => value.clone(),
            Element::Array(items) => Value::Array(items.iter().map(ToCbor::to_cbor).collect()),
            Element::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.to_cbor(), value.to_cbor()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn driving_privileges_shape_is_preserved() {
        let value = Value::Array(vec![Value::Map(vec![
            (
                Value::Text("vehicle_category_code".into()),
                Value::Text("B".into()),
            ),
            (
                Value::Text("issue_date".into()),
                Value::Tag(1004, Box::new(Value::Text("2020-01-01".into()))),
            ),
        ])]);
        let element = Element::from_cbor(&value).unwrap();
        let Element::Array(privileges) = &element else {
            panic!("expected an array, got {element:?}")
        };
        assert_eq!(
            privileges[0].get("vehicle_category_code").and_then(Element::as_text),
            Some("B")
        );
        assert_eq!(element.to_cbor(), value);
        assert_eq!(
            element.to_json(),
            serde_json::json!([{"vehicle_category_code": "B", "issue_date": "2020-01-01"}])
        );
    }

    #[test]
    fn map_keys_must_be_text() {
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Null),
            (Value::Text(String::new()), Value::Null),
        ]);
        assert_eq!(Element::from_cbor(&value).unwrap_err().len(), 2);
    }
}
