//! COSE primitives (RFC 9052) restricted to what ISO/IEC 18013-5 uses: EC2 P-256 keys and
//! ES256 `COSE_Sign1` structures.
pub mod header;
pub mod key;
pub mod sign1;

pub use header::{ProtectedHeaders, UnprotectedHeaders};
pub use key::{CoseKey, DeviceKey, EDeviceKey, EReaderKey};
pub use sign1::{CoseSign1, CoseSignature, PreparedCoseSign1, VerificationResult};

use coset::iana;

use crate::error::Error;

impl From<coset::CoseError> for Error {
    fn from(error: coset::CoseError) -> Self {
        Error::Cose(error.to_string())
    }
}

/// Trait to represent the signature algorithm of a signer or verifier.
pub trait SignatureAlgorithm {
    fn algorithm(&self) -> iana::Algorithm;
}

impl SignatureAlgorithm for p256::ecdsa::SigningKey {
    fn algorithm(&self) -> iana::Algorithm {
        iana::Algorithm::ES256
    }
}

impl SignatureAlgorithm for p256::ecdsa::VerifyingKey {
    fn algorithm(&self) -> iana::Algorithm {
        iana::Algorithm::ES256
    }
}
