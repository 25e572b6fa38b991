#![no_main]

use libfuzzer_sys::fuzz_target;
use mdoc_core::definitions::traits::FromCbor;
use mdoc_core::definitions::DeviceResponse;

fuzz_target!(|data: &[u8]| {
    let _ = DeviceResponse::from_cbor_bytes(data);
});
