//! COSE_Key (RFC 9052 §7) for EC2 keys on P-256, the only key type ISO/IEC 18013-5 mandates.
use ciborium::Value;
use coset::iana::{self, EnumI64};
use coset::{AsCborValue, Label};
use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes, PublicKey};

use crate::cbor;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::Validated;

const COORDINATE_LENGTH: usize = 32;

/// An EC2 public key on P-256, with the CBOR it was read from.
#[derive(Debug, Clone)]
pub struct CoseKey {
    x: [u8; COORDINATE_LENGTH],
    y: [u8; COORDINATE_LENGTH],
    cbor: Value,
}

/// Long-term key bound to a credential in its mobile security object.
pub type DeviceKey = CoseKey;
/// Ephemeral session key of the holder.
pub type EDeviceKey = CoseKey;
/// Ephemeral session key of the reader.
pub type EReaderKey = CoseKey;

fn param(key: &coset::CoseKey, parameter: iana::Ec2KeyParameter) -> Result<&Value, Error> {
    let label = Label::Int(parameter.to_i64());
    key.params
        .iter()
        .find(|(candidate, _)| *candidate == label)
        .map(|(_, value)| value)
        .ok_or_else(|| Error::CborFieldNotFound {
            label: parameter.to_i64().to_string(),
        })
}

fn kty(key: &coset::CoseKey) -> Result<(), Error> {
    match &key.kty {
        coset::KeyType::Assigned(iana::KeyType::EC2) => Ok(()),
        coset::KeyType::Assigned(kty) => Err(Error::UnsupportedKeyType(kty.to_i64().into())),
        coset::KeyType::Text(kty) => Err(Error::InvalidCoseKey(format!("key type {kty:?}"))),
    }
}

fn crv(key: &coset::CoseKey) -> Result<(), Error> {
    let crv = cbor::get_int(param(key, iana::Ec2KeyParameter::Crv)?)?;
    if crv != i128::from(iana::EllipticCurve::P_256.to_i64()) {
        return Err(Error::UnsupportedCurve(crv));
    }
    Ok(())
}

fn coordinate(
    key: &coset::CoseKey,
    parameter: iana::Ec2KeyParameter,
) -> Result<[u8; COORDINATE_LENGTH], Error> {
    let bytes = cbor::get_byte_string(param(key, parameter)?)?;
    bytes.try_into().map_err(|_| {
        Error::InvalidCoseKey(format!(
            "{parameter:?} coordinate must be {COORDINATE_LENGTH} bytes, received {}",
            bytes.len()
        ))
    })
}

impl CoseKey {
    pub fn x(&self) -> &[u8] {
        &self.x
    }

    pub fn y(&self) -> &[u8] {
        &self.y
    }

    pub fn to_public_key(&self) -> Result<PublicKey, Error> {
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&self.x),
            FieldBytes::from_slice(&self.y),
            false,
        );
        Option::from(PublicKey::from_encoded_point(&point))
            .ok_or_else(|| Error::InvalidCoseKey("point is not on the P-256 curve".to_string()))
    }

    pub fn to_verifying_key(&self) -> Result<p256::ecdsa::VerifyingKey, Error> {
        self.to_public_key().map(Into::into)
    }
}

/// Keys are equal when they name the same point.
impl PartialEq for CoseKey {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y
    }
}

impl Eq for CoseKey {}

impl TryFrom<&PublicKey> for CoseKey {
    type Error = Error;

    fn try_from(key: &PublicKey) -> Result<Self, Error> {
        let point = key.to_encoded_point(false);
        let (Some(px), Some(py)) = (point.x(), point.y()) else {
            return Err(Error::InvalidCoseKey(
                "the identity point has no coordinates".to_string(),
            ));
        };
        let mut x = [0u8; COORDINATE_LENGTH];
        let mut y = [0u8; COORDINATE_LENGTH];
        x.copy_from_slice(px);
        y.copy_from_slice(py);
        let cbor = coset::CoseKeyBuilder::new_ec2_pub_key(
            iana::EllipticCurve::P_256,
            x.to_vec(),
            y.to_vec(),
        )
        .build()
        .to_cbor_value()?;
        Ok(Self { x, y, cbor })
    }
}

impl TryFrom<&p256::ecdsa::VerifyingKey> for CoseKey {
    type Error = Error;

    fn try_from(key: &p256::ecdsa::VerifyingKey) -> Result<Self, Error> {
        Self::try_from(&PublicKey::from(key))
    }
}

impl FromCbor for CoseKey {
    fn from_cbor(value: &Value) -> Validated<Self> {
        cbor::as_map(value)?;
        let key = coset::CoseKey::from_cbor_value(value.clone()).map_err(Error::from)?;
        let (_, _, x, y) = crate::accumulate!(
            kty(&key),
            crv(&key),
            coordinate(&key, iana::Ec2KeyParameter::X),
            coordinate(&key, iana::Ec2KeyParameter::Y),
        )?;
        let key = Self {
            x,
            y,
            cbor: value.clone(),
        };
        key.to_public_key()?;
        Ok(key)
    }
}

impl ToCbor for CoseKey {
    fn to_cbor(&self) -> Value {
        self.cbor.clone()
    }
}
