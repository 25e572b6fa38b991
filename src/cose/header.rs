use ciborium::Value;
use coset::iana::{self, EnumI64};
use coset::{AsCborValue, Label, RegisteredLabelWithPrivate};

use crate::cbor;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::definitions::x509::X5Chain;
use crate::error::Error;
use crate::validated::Validated;

/// See: <https://www.iana.org/assignments/cose/cose.xhtml#header-parameters>
pub const X5CHAIN_COSE_HEADER_LABEL: i64 = 0x21;

/// Protected header bucket. The encoded map is kept byte for byte since signatures cover it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedHeaders(pub(super) coset::ProtectedHeader);

impl ProtectedHeaders {
    pub fn new(alg: iana::Algorithm) -> Result<Self, Error> {
        let header = coset::HeaderBuilder::new().algorithm(alg).build();
        let original_data = cbor::to_vec(&header.clone().to_cbor_value()?)?;
        Ok(Self(coset::ProtectedHeader {
            original_data: Some(original_data),
            header,
        }))
    }

    pub fn raw(&self) -> &[u8] {
        self.0.original_data.as_deref().unwrap_or_default()
    }

    pub fn alg(&self) -> Option<iana::Algorithm> {
        match self.0.header.alg {
            Some(RegisteredLabelWithPrivate::Assigned(alg)) => Some(alg),
            _ => None,
        }
    }

    /// Require the signature algorithm to be `expected`.
    pub fn require_alg(&self, expected: iana::Algorithm) -> Result<(), Error> {
        match &self.0.header.alg {
            Some(RegisteredLabelWithPrivate::Assigned(alg)) if *alg == expected => Ok(()),
            Some(alg) => Err(Error::UnsupportedAlgorithm(format!("{alg:?}"))),
            None => Err(Error::CborFieldNotFound {
                label: iana::HeaderParameter::Alg.to_i64().to_string(),
            }),
        }
    }
}

impl FromCbor for ProtectedHeaders {
    fn from_cbor(value: &Value) -> Validated<Self> {
        cbor::get_byte_string(value)?;
        let protected = coset::ProtectedHeader::from_cbor_bstr(value.clone()).map_err(|e| {
            match e {
                coset::CoseError::UnregisteredIanaValue
                | coset::CoseError::UnregisteredIanaNonPrivateValue => {
                    Error::UnsupportedAlgorithm(e.to_string())
                }
                e => e.into(),
            }
        })?;
        // ISO/IEC 18013-5 only knows integer algorithm identifiers.
        if let Some(RegisteredLabelWithPrivate::Text(alg)) = &protected.header.alg {
            return Err(Error::CborNotANumber {
                cbor: format!("{alg:?}"),
            }
            .into());
        }
        Ok(Self(protected))
    }
}

impl ToCbor for ProtectedHeaders {
    fn to_cbor(&self) -> Value {
        Value::Bytes(self.raw().to_vec())
    }
}

/// Unprotected header bucket. Labels coset does not interpret, x5chain among them, stay in
/// wire order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnprotectedHeaders(pub(super) coset::Header);

impl UnprotectedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_x5chain(mut self, x5chain: &X5Chain) -> Self {
        self.0
            .rest
            .push((Label::Int(X5CHAIN_COSE_HEADER_LABEL), x5chain.to_cbor()));
        self
    }

    pub fn get(&self, label: &Label) -> Option<&Value> {
        self.0
            .rest
            .iter()
            .find(|(candidate, _)| candidate == label)
            .map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The certificate chain carried under label 33.
    pub fn x5chain(&self) -> Result<X5Chain, Error> {
        let value = self
            .get(&Label::Int(X5CHAIN_COSE_HEADER_LABEL))
            .ok_or_else(|| Error::CborFieldNotFound {
                label: X5CHAIN_COSE_HEADER_LABEL.to_string(),
            })?;
        X5Chain::from_cbor(value)
    }
}

impl FromCbor for UnprotectedHeaders {
    fn from_cbor(value: &Value) -> Validated<Self> {
        cbor::as_map(value)?;
        Ok(Self(
            coset::Header::from_cbor_value(value.clone()).map_err(Error::from)?,
        ))
    }
}
