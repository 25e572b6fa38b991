use ciborium::Value;

use crate::cbor;
use crate::validated::Validated;

/// Decoding of a wire structure from a generic CBOR value.
///
/// Implementations validate independent sibling fields together and report every failure.
pub trait FromCbor: Sized {
    fn from_cbor(value: &Value) -> Validated<Self>;

    fn from_cbor_bytes(bytes: &[u8]) -> Validated<Self> {
        Self::from_cbor(&cbor::from_slice(bytes)?)
    }
}

impl FromCbor for Value {
    fn from_cbor(value: &Value) -> Validated<Self> {
        Ok(value.clone())
    }
}
