//! ToCbor is specifically NOT implemented for Vec<T> where T: ToCbor, as Vec<u8> likely should be
//! represented as a bytestr instead of an array in cbor.

use ciborium::Value;

use crate::cbor;
use crate::error::Error;

pub trait ToCbor {
    fn to_cbor(&self) -> Value;

    fn to_cbor_bytes(&self) -> Result<Vec<u8>, Error> {
        cbor::to_vec(&self.to_cbor())
    }
}

impl ToCbor for Value {
    fn to_cbor(&self) -> Value {
        self.clone()
    }
}
