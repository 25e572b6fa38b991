use ciborium::Value;

use crate::cbor;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::validated::Validated;

/// A CBOR byte string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteStr(Vec<u8>);

impl ByteStr {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for ByteStr {
    fn from(bytes: Vec<u8>) -> ByteStr {
        ByteStr(bytes)
    }
}

impl From<ByteStr> for Vec<u8> {
    fn from(ByteStr(bytes): ByteStr) -> Vec<u8> {
        bytes
    }
}

impl AsRef<[u8]> for ByteStr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromCbor for ByteStr {
    fn from_cbor(value: &Value) -> Validated<Self> {
        Ok(ByteStr(cbor::get_byte_string(value)?.to_vec()))
    }
}

impl ToCbor for ByteStr {
    fn to_cbor(&self) -> Value {
        Value::Bytes(self.0.clone())
    }
}
