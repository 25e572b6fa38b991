//! Error taxonomy shared by every decoding and verification step.
//!
//! Single failures are reported as [Error]. Validation of sibling fields collects every failure
//! into [Errors] so a caller sees all malformed fields of a structure in one pass.
use std::fmt;

/// A single, typed failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    // Structural decoding.
    #[error("CBOR field not found: {label}")]
    CborFieldNotFound { label: String },
    #[error("CBOR index {index} not found in an array of length {len}")]
    CborIndexNotFound { index: usize, len: usize },
    #[error("expected CBOR {expected}, received: {cbor}")]
    CborWrongType { expected: &'static str, cbor: String },
    #[error("expected a CBOR number, received: {cbor}")]
    CborNotANumber { cbor: String },
    #[error("expected a CBOR byte string, received: {cbor}")]
    CborNotAByteString { cbor: String },
    #[error("unable to decode CBOR: {0}")]
    CborDecoding(String),
    #[error("unable to encode CBOR: {0}")]
    CborEncoding(String),
    #[error("malformed COSE structure: {0}")]
    Cose(String),
    #[error("duplicate {context} key: {key}")]
    DuplicateKey { context: &'static str, key: String },
    #[error("{kind} must be a non-empty string")]
    EmptyIdentifier { kind: &'static str },
    #[error("expected a non-empty {0}")]
    EmptyCollection(&'static str),

    // Semantic and policy.
    #[error("unsupported COSE key type: {0}")]
    UnsupportedKeyType(i128),
    #[error("unsupported elliptic curve: {0}")]
    UnsupportedCurve(i128),
    #[error("invalid COSE key: {0}")]
    InvalidCoseKey(String),
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),
    #[error("unsupported cipher suite: {0}")]
    UnsupportedCipherSuite(i128),
    #[error("invalid targeted connection, only BLE (2) is supported: {0}")]
    InvalidTargetedConnection(i128),
    #[error("invalid device retrieval method version, expected 1: {0}")]
    InvalidRetrievalVersion(i128),
    #[error("unsupported {structure} version: {version}")]
    UnsupportedVersion {
        structure: &'static str,
        version: String,
    },
    #[error("invalid random salt of {0} bytes, expected at least 16")]
    InvalidRandom(usize),
    #[error("invalid X.509 certificate: {0}")]
    InvalidX509Certificate(String),
    #[error("invalid QR code engagement: {0}")]
    InvalidQrCode(String),
    #[error("document type mismatch: expected {expected}, found {found}")]
    DocTypeMismatch { expected: String, found: String },
    #[error("no digest for {namespace}/{digest_id} in the mobile security object")]
    MissingDigest { namespace: String, digest_id: u64 },
    #[error("digest mismatch for element {element_identifier} ({namespace}/{digest_id})")]
    DigestMismatch {
        namespace: String,
        digest_id: u64,
        element_identifier: String,
    },
    #[error("invalid validity info: {0}")]
    InvalidValidityInfo(String),
    #[error("document is not valid until {0}")]
    DocumentNotYetValid(String),
    #[error("document expired at {0}")]
    DocumentExpired(String),

    // Cryptographic.
    #[error("invalid issuer signature: {0}")]
    InvalidIssuerSignature(String),
    #[error("invalid device signature: {0}")]
    InvalidDeviceSignature(String),
    #[error("trust chain validation failed: {0}")]
    TrustChainValidationFailed(String),
    #[error("unable to decrypt session data")]
    Decryption,
    #[error("unable to encrypt session data: {0}")]
    Encryption(String),
    #[error("session message counter exhausted")]
    CounterExhausted,
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("unknown key: {0}")]
    UnknownKey(String),
    #[error("device key does not match the key bound to the document")]
    DeviceKeyMismatch,

    // Protocol.
    #[error("session data is neither a device request nor a device response")]
    SessionData,
    #[error("unsupported device authentication: {0}")]
    UnsupportedDeviceAuth(&'static str),
    #[error("no document of type {0} was requested")]
    DocumentNotRequested(String),
    #[error("device response contains no documents (status {0})")]
    NoDocuments(u64),
    #[error("unable to decode base64url: {0}")]
    Base64(String),
}

/// One or more failures collected while validating independent fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first failure, which is the only one for short-circuited validation.
    pub fn first(&self) -> Option<&Error> {
        self.0.first()
    }

    pub fn into_vec(self) -> Vec<Error> {
        self.0
    }

    pub fn extend(&mut self, other: Errors) {
        self.0.extend(other.0)
    }

    pub fn contains(&self, predicate: impl Fn(&Error) -> bool) -> bool {
        self.0.iter().any(predicate)
    }
}

impl From<Error> for Errors {
    fn from(error: Error) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut errors = self.0.iter();
        if let Some(first) = errors.next() {
            write!(f, "{first}")?;
        }
        for error in errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
