use ciborium::Value;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

use super::util::{common_name_or_unknown, public_key};
use crate::definitions::helpers::NonEmptyVec;
use crate::definitions::traits::ToCbor;
use crate::error::Error;

type Result<T, E = Error> = std::result::Result<T, E>;

fn invalid(message: impl std::fmt::Display) -> Error {
    Error::InvalidX509Certificate(message.to_string())
}

/// X.509 certificate with the DER representation held in memory for ease of serialization.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CertificateWithDer {
    pub inner: Certificate,
    der: Vec<u8>,
}

impl CertificateWithDer {
    pub fn from_pem(bytes: &[u8]) -> Result<Self> {
        let (_, der) = pem_rfc7468::decode_vec(bytes)
            .map_err(|e| invalid(format!("unable to parse certificate from PEM encoding: {e}")))?;
        CertificateWithDer::from_der(&der)
    }

    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let inner = Certificate::from_der(bytes)
            .map_err(|e| invalid(format!("unable to parse certificate from DER encoding: {e}")))?;
        Ok(Self {
            inner,
            der: bytes.to_vec(),
        })
    }

    pub fn from_cert(certificate: Certificate) -> Result<Self> {
        let der = certificate.to_der().map_err(invalid)?;
        Ok(Self {
            inner: certificate,
            der,
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

/// Certificate chain ordered from the end-entity (document signer) certificate towards the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X5Chain(NonEmptyVec<CertificateWithDer>);

impl From<NonEmptyVec<CertificateWithDer>> for X5Chain {
    fn from(v: NonEmptyVec<CertificateWithDer>) -> Self {
        Self(v)
    }
}

impl X5Chain {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Decode an `x5chain` header value: one DER certificate, or an array of them.
    pub fn from_cbor(cbor: &Value) -> Result<Self> {
        match cbor {
            Value::Bytes(bytes) => Self::builder().with_der_certificate(bytes)?.build(),
            Value::Array(x509s) => x509s
                .iter()
                .try_fold(Self::builder(), |builder, x509| match x509 {
                    Value::Bytes(bytes) => builder.with_der_certificate(bytes),
                    _ => Err(invalid(format!(
                        "expected x509 certificate in the x5chain to be a cbor encoded bytestring, but received: {x509:?}"
                    ))),
                })?
                .build(),
            _ => Err(invalid(format!(
                "expected x5chain to be a cbor encoded bytestring or array, but received: {cbor:?}"
            ))),
        }
    }

    /// Retrieve the end-entity certificate.
    pub fn end_entity_certificate(&self) -> &Certificate {
        &self.0.first().inner
    }

    /// Retrieve the public key of the end-entity certificate.
    pub fn end_entity_public_key(&self) -> Result<p256::ecdsa::VerifyingKey> {
        public_key(self.end_entity_certificate())
    }

    pub fn end_entity_common_name(&self) -> &str {
        common_name_or_unknown(self.end_entity_certificate())
    }

    /// Retrieve the root-entity certificate.
    pub fn root_entity_certificate(&self) -> &Certificate {
        &self.0.last().inner
    }

    pub fn root_entity_common_name(&self) -> &str {
        common_name_or_unknown(self.root_entity_certificate())
    }

    /// Iterate over the certificates in the chain.
    pub fn iter(&self) -> impl Iterator<Item = &CertificateWithDer> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl ToCbor for X5Chain {
    fn to_cbor(&self) -> Value {
        match self.0.as_ref() {
            [cert] => Value::Bytes(cert.der.clone()),
            certs => Value::Array(
                certs
                    .iter()
                    .map(|x509| Value::Bytes(x509.der.clone()))
                    .collect(),
            ),
        }
    }
}

#[derive(Default, Debug, Clone)]
pub struct Builder {
    certs: Vec<CertificateWithDer>,
}

impl Builder {
    pub fn with_certificate(mut self, cert: Certificate) -> Result<Builder> {
        let x509 = CertificateWithDer::from_cert(cert)?;
        self.certs.push(x509);
        Ok(self)
    }
    pub fn with_pem_certificate(mut self, data: &[u8]) -> Result<Builder> {
        let x509 = CertificateWithDer::from_pem(data)?;
        self.certs.push(x509);
        Ok(self)
    }
    pub fn with_der_certificate(mut self, data: &[u8]) -> Result<Builder> {
        let x509 = CertificateWithDer::from_der(data)?;
        self.certs.push(x509);
        Ok(self)
    }
    pub fn build(self) -> Result<X5Chain> {
        Ok(X5Chain(self.certs.try_into().map_err(|_| {
            invalid("at least one certificate must be given to the builder")
        })?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::x509::test::setup;

    #[test]
    fn single_certificate_encodes_as_a_byte_string() {
        let (root, _, _) = setup();
        let x5chain = X5Chain::builder()
            .with_certificate(root)
            .unwrap()
            .build()
            .unwrap();
        let Value::Bytes(der) = x5chain.to_cbor() else {
            panic!("expected a byte string")
        };
        assert_eq!(X5Chain::from_cbor(&Value::Bytes(der)).unwrap(), x5chain);
        assert_eq!(x5chain.end_entity_common_name(), "Test IACA");
    }

    #[test]
    fn chains_decode_from_arrays() {
        let (root, signer, _) = setup();
        let x5chain = X5Chain::builder()
            .with_certificate(signer)
            .unwrap()
            .with_certificate(root)
            .unwrap()
            .build()
            .unwrap();
        let decoded = X5Chain::from_cbor(&x5chain.to_cbor()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.end_entity_common_name(), "Test Document Signer");
        assert_eq!(decoded.root_entity_common_name(), "Test IACA");
        assert!(decoded.end_entity_public_key().is_ok());
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        let error = X5Chain::from_cbor(&Value::Bytes(vec![0x30, 0x03, 0x01])).unwrap_err();
        assert!(matches!(error, Error::InvalidX509Certificate(_)));
        let error = X5Chain::from_cbor(&Value::Array(vec![])).unwrap_err();
        assert!(matches!(error, Error::InvalidX509Certificate(_)));
    }
}
