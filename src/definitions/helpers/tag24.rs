//! Support for embedded
//! [CBOR Data Items](https://www.ietf.org/rfc/rfc8949.html#name-encoded-cbor-data-item),
//! also known as a tagged data item with tag number 24.

use ciborium::Value;

use crate::cbor;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::Validated;

/// A wrapper for a struct that is to be encoded as a CBOR tagged item, with tag number 24.
///
/// If this struct is created through decoding CBOR, then the original byte representation is
/// preserved for future encoding, so digests and signatures computed over it stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag24<T> {
    inner: T,
    inner_bytes: Vec<u8>,
}

impl<T> Tag24<T> {
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// The encoding of the inner value, without the tag.
    pub fn inner_bytes(&self) -> &[u8] {
        &self.inner_bytes
    }

    /// The full `#6.24(bstr)` encoding.
    pub fn tagged_bytes(&self) -> Result<Vec<u8>, Error> {
        cbor::to_vec(&cbor::wrap_tag24(self.inner_bytes.clone()))
    }
}

impl<T: ToCbor> Tag24<T> {
    pub fn new(inner: T) -> Result<Tag24<T>, Error> {
        let inner_bytes = inner.to_cbor_bytes()?;
        Ok(Self { inner, inner_bytes })
    }
}

impl<T: FromCbor> Tag24<T> {
    pub fn from_bytes(inner_bytes: Vec<u8>) -> Validated<Tag24<T>> {
        let inner = T::from_cbor_bytes(&inner_bytes)?;
        Ok(Self { inner, inner_bytes })
    }
}

impl<T: FromCbor> FromCbor for Tag24<T> {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let inner_bytes = cbor::unwrap_tag24(value)?;
        Self::from_bytes(inner_bytes.to_vec())
    }
}

impl<T> ToCbor for Tag24<T> {
    fn to_cbor(&self) -> Value {
        cbor::wrap_tag24(self.inner_bytes.clone())
    }
}

impl<T> AsRef<T> for Tag24<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}
