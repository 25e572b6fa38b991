//! `COSE_Sign1` (RFC 9052 §4.2) with ECDSA P-256 / SHA-256.
//!
//! Signatures travel as the raw 64-byte `r‖s` concatenation COSE mandates; verification converts
//! them to DER before handing them to [p256::ecdsa].
use ciborium::Value;
use coset::{AsCborValue, SignatureContext};
use p256::ecdsa::{DerSignature, Signature, VerifyingKey};
use signature::Verifier;

use super::header::{ProtectedHeaders, UnprotectedHeaders};
use crate::cbor;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::Validated;

/// Tag number of a `COSE_Sign1` structure.
pub const COSE_SIGN1_TAG: u64 = 18;

/// The raw signature, index 3 of the `COSE_Sign1` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoseSignature<'a>(&'a [u8]);

impl<'a> CoseSignature<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        self.0
    }

    /// DER encoding of the `r‖s` signature.
    pub fn to_der(&self) -> Result<DerSignature, String> {
        Signature::from_slice(self.0)
            .map(|signature| signature.to_der())
            .map_err(|e| format!("malformed ECDSA signature of {} bytes: {e}", self.0.len()))
    }
}

/// Outcome of checking a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Success,
    Failure(String),
    Error(String),
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VerificationResult::Success)
    }

    /// Map a failed verification to the error of the calling context.
    pub fn into_result(self, error: impl FnOnce(String) -> Error) -> Result<(), Error> {
        match self {
            VerificationResult::Success => Ok(()),
            VerificationResult::Failure(reason) | VerificationResult::Error(reason) => {
                Err(error(reason))
            }
        }
    }
}

/// A [coset::CoseSign1] together with the CBOR it was read from, so re-encoding is byte-exact.
#[derive(Debug, Clone, PartialEq)]
pub struct CoseSign1 {
    inner: coset::CoseSign1,
    cbor: Value,
}

impl CoseSign1 {
    /// Start building a signature. `detached_payload` is signed but not embedded.
    pub fn prepare(
        protected: ProtectedHeaders,
        unprotected: UnprotectedHeaders,
        payload: Option<Vec<u8>>,
        detached_payload: Option<&[u8]>,
    ) -> Result<PreparedCoseSign1, Error> {
        let builder = coset::CoseSign1Builder::new().unprotected(unprotected.0);
        let builder = match payload {
            Some(payload) => builder.payload(payload),
            None => builder,
        };
        // The builder re-encodes protected headers; decoded ones must be signed as received.
        let inner = coset::CoseSign1 {
            protected: protected.0,
            ..builder.build()
        };
        let signature_payload = sig_structure(&inner, detached_payload);
        Ok(PreparedCoseSign1 {
            inner,
            signature_payload,
        })
    }

    pub fn protected(&self) -> ProtectedHeaders {
        ProtectedHeaders(self.inner.protected.clone())
    }

    pub fn unprotected(&self) -> UnprotectedHeaders {
        UnprotectedHeaders(self.inner.unprotected.clone())
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.inner.payload.as_deref()
    }

    pub fn signature(&self) -> CoseSignature<'_> {
        CoseSignature(&self.inner.signature)
    }

    /// The `Sig_structure` bytes covered by the signature.
    pub fn signature_payload(&self, detached_payload: Option<&[u8]>) -> Vec<u8> {
        sig_structure(&self.inner, detached_payload)
    }

    pub fn verify(
        &self,
        verifying_key: &VerifyingKey,
        detached_payload: Option<&[u8]>,
    ) -> VerificationResult {
        let signature = match self.signature().to_der() {
            Ok(signature) => signature,
            Err(e) => return VerificationResult::Error(e),
        };
        let to_be_verified = self.signature_payload(detached_payload);
        match verifying_key.verify(&to_be_verified, &signature) {
            Ok(()) => VerificationResult::Success,
            Err(e) => VerificationResult::Failure(format!("signature is not valid: {e}")),
        }
    }
}

fn sig_structure(cose_sign1: &coset::CoseSign1, detached_payload: Option<&[u8]>) -> Vec<u8> {
    coset::sig_structure_data(
        SignatureContext::CoseSign1,
        cose_sign1.protected.clone(),
        None,
        &[],
        detached_payload
            .or(cose_sign1.payload.as_deref())
            .unwrap_or_default(),
    )
}

/// A `COSE_Sign1` waiting for its signature.
#[derive(Debug, Clone)]
pub struct PreparedCoseSign1 {
    inner: coset::CoseSign1,
    signature_payload: Vec<u8>,
}

impl PreparedCoseSign1 {
    /// The bytes to sign.
    pub fn signature_payload(&self) -> &[u8] {
        &self.signature_payload
    }

    /// Attach the raw `r‖s` signature.
    pub fn finalize(self, signature: Vec<u8>) -> Result<CoseSign1, Error> {
        let inner = coset::CoseSign1 {
            signature,
            ..self.inner
        };
        let cbor = inner.clone().to_cbor_value()?;
        Ok(CoseSign1 { inner, cbor })
    }
}

fn payload(value: &Value) -> Result<(), Error> {
    if !value.is_null() {
        cbor::get_byte_string(value)?;
    }
    Ok(())
}

impl FromCbor for CoseSign1 {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let untagged = match value {
            Value::Tag(COSE_SIGN1_TAG, inner) => inner.as_ref(),
            _ => value,
        };
        let array = cbor::as_array(untagged)?;
        if array.len() > 4 {
            return Err(Error::CborWrongType {
                expected: "COSE_Sign1 array of 4 elements",
                cbor: cbor::diagnostic(value),
            }
            .into());
        }
        crate::accumulate!(
            cbor::get_by_index(array, 0)
                .map_err(Into::into)
                .and_then(ProtectedHeaders::from_cbor),
            cbor::get_by_index(array, 1)
                .map_err(Into::into)
                .and_then(UnprotectedHeaders::from_cbor),
            cbor::get_by_index(array, 2).and_then(payload),
            cbor::get_by_index(array, 3).and_then(cbor::get_byte_string),
        )?;
        Ok(Self {
            inner: coset::CoseSign1::from_cbor_value(untagged.clone()).map_err(Error::from)?,
            cbor: value.clone(),
        })
    }
}

impl ToCbor for CoseSign1 {
    fn to_cbor(&self) -> Value {
        self.cbor.clone()
    }
}

#[cfg(test)]
mod test {
    use coset::iana;
    use p256::ecdsa::SigningKey;
    use signature::Signer;

    use super::*;

    fn signed(payload: &[u8]) -> (CoseSign1, SigningKey) {
        let key = SigningKey::random(&mut rand::thread_rng());
        let prepared = CoseSign1::prepare(
            ProtectedHeaders::new(iana::Algorithm::ES256).unwrap(),
            UnprotectedHeaders::new(),
            Some(payload.to_vec()),
            None,
        )
        .unwrap();
        let signature: Signature = key.sign(prepared.signature_payload());
        (
            prepared.finalize(signature.to_bytes().to_vec()).unwrap(),
            key,
        )
    }

    fn with_signature(cose_sign1: &CoseSign1, signature: Vec<u8>) -> CoseSign1 {
        CoseSign1::prepare(
            cose_sign1.protected(),
            cose_sign1.unprotected(),
            cose_sign1.payload().map(<[u8]>::to_vec),
            None,
        )
        .unwrap()
        .finalize(signature)
        .unwrap()
    }

    #[test]
    fn signature_payload_is_a_sig_structure() {
        let prepared = CoseSign1::prepare(
            ProtectedHeaders::new(iana::Algorithm::ES256).unwrap(),
            UnprotectedHeaders::new(),
            Some(vec![0xaa]),
            None,
        )
        .unwrap();
        // ["Signature1", h'a10126', h'', h'aa']
        assert_eq!(
            hex::encode(prepared.signature_payload()),
            "846a5369676e61747572653143a101264041aa"
        );
    }

    #[test]
    fn verifies_and_detects_tampering() {
        let (cose_sign1, key) = signed(b"payload");
        let key = VerifyingKey::from(&key);
        assert!(cose_sign1.verify(&key, None).is_success());

        let mut bytes = cose_sign1.signature().as_bytes().to_vec();
        bytes[10] ^= 0x01;
        let tampered = with_signature(&cose_sign1, bytes);
        assert!(matches!(
            tampered.verify(&key, None),
            VerificationResult::Failure(_)
        ));
    }

    #[test]
    fn interoperates_with_coset_signing() {
        let (cose_sign1, key) = signed(b"payload");
        let bytes = cbor::to_vec(&cose_sign1.to_cbor()).unwrap();
        let decoded = <coset::CoseSign1 as coset::CborSerializable>::from_slice(&bytes).unwrap();
        let verifying_key = VerifyingKey::from(&key);
        decoded
            .verify_signature(&[], |signature, data| {
                verifying_key.verify(data, &Signature::from_slice(signature)?)
            })
            .unwrap();
    }

    #[test]
    fn wrong_signature_length_is_an_error() {
        let (cose_sign1, key) = signed(b"payload");
        let truncated =
            with_signature(&cose_sign1, cose_sign1.signature().as_bytes()[..63].to_vec());
        assert!(matches!(
            truncated.verify(&VerifyingKey::from(&key), None),
            VerificationResult::Error(_)
        ));
    }

    #[test]
    fn missing_signature_element_fails_decoding() {
        let (cose_sign1, _) = signed(b"payload");
        let Value::Array(mut array) = cose_sign1.to_cbor() else {
            panic!("untagged COSE_Sign1 is an array")
        };
        array.pop();
        let errors = CoseSign1::from_cbor(&Value::Array(array)).unwrap_err();
        assert_eq!(
            errors.first(),
            Some(&Error::CborIndexNotFound { index: 3, len: 3 })
        );
    }

    #[test]
    fn every_malformed_element_is_reported() {
        let value = Value::Array(vec![
            Value::Bytes(hex::decode("a10126").unwrap()),
            Value::Array(vec![]),
            Value::Text("payload".into()),
            Value::Null,
        ]);
        let errors = CoseSign1::from_cbor(&value).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn decoding_keeps_tag_and_bytes() {
        let (cose_sign1, _) = signed(b"payload");
        let tagged = Value::Tag(COSE_SIGN1_TAG, Box::new(cose_sign1.to_cbor()));
        let decoded = CoseSign1::from_cbor(&tagged).unwrap();
        assert_eq!(decoded.to_cbor(), tagged);
        assert_eq!(decoded.payload(), Some(&b"payload"[..]));
    }
}
