mod from_cbor;
mod to_cbor;

pub use from_cbor::FromCbor;
pub use to_cbor::ToCbor;
