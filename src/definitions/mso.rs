//! The Mobile Security Object: the issuer-signed digest manifest of a document.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ciborium::Value;
use sha2::{Digest, Sha256};
use strum_macros::{AsRefStr, EnumString};

use crate::cbor;
use crate::cose::CoseKey;
use crate::definitions::helpers::ByteStr;
use crate::definitions::identifiers::{DocType, NameSpace};
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::definitions::validity_info::ValidityInfo;
use crate::error::Error;
use crate::validated::{collect_all, Validated};

pub const MSO_VERSION: &str = "1.0";

/// Identifier of a digest within a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DigestId(u64);

impl DigestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DigestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DigestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromCbor for DigestId {
    fn from_cbor(value: &Value) -> Validated<Self> {
        Ok(Self(cbor::get_uint(value)?))
    }
}

impl ToCbor for DigestId {
    fn to_cbor(&self) -> Value {
        Value::Integer(self.0.into())
    }
}

pub type DigestIds = BTreeMap<DigestId, ByteStr>;

/// Digest algorithms; only SHA-256 is supported.
#[derive(Clone, Debug, Copy, PartialEq, Eq, EnumString, AsRefStr)]
pub enum DigestAlgorithm {
    #[strum(serialize = "SHA-256")]
    SHA256,
}

impl DigestAlgorithm {
    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::SHA256 => Sha256::digest(bytes).to_vec(),
        }
    }
}

impl FromCbor for DigestAlgorithm {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let name = cbor::get_text(value)?;
        Ok(DigestAlgorithm::from_str(name)
            .map_err(|_| Error::UnsupportedDigestAlgorithm(name.to_string()))?)
    }
}

impl ToCbor for DigestAlgorithm {
    fn to_cbor(&self) -> Value {
        Value::Text(self.as_ref().to_string())
    }
}

/// The key the holder proves possession of during device authentication.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceKeyInfo {
    pub device_key: CoseKey,
    pub key_authorizations: Option<Value>,
    pub key_info: Option<Value>,
}

impl From<CoseKey> for DeviceKeyInfo {
    fn from(device_key: CoseKey) -> Self {
        Self {
            device_key,
            key_authorizations: None,
            key_info: None,
        }
    }
}

impl FromCbor for DeviceKeyInfo {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let device_key = cbor::decode_field::<CoseKey>(map, "deviceKey")?;
        Ok(Self {
            device_key,
            key_authorizations: cbor::get_opt_by_label(map, &cbor::text("keyAuthorizations"))
                .cloned(),
            key_info: cbor::get_opt_by_label(map, &cbor::text("keyInfo")).cloned(),
        })
    }
}

impl ToCbor for DeviceKeyInfo {
    fn to_cbor(&self) -> Value {
        let mut map = vec![(Value::Text("deviceKey".into()), self.device_key.to_cbor())];
        if let Some(key_authorizations) = &self.key_authorizations {
            map.push((
                Value::Text("keyAuthorizations".into()),
                key_authorizations.clone(),
            ));
        }
        if let Some(key_info) = &self.key_info {
            map.push((Value::Text("keyInfo".into()), key_info.clone()));
        }
        Value::Map(map)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MobileSecurityObject {
    pub version: String,
    pub digest_algorithm: DigestAlgorithm,
    pub value_digests: BTreeMap<NameSpace, DigestIds>,
    pub device_key_info: DeviceKeyInfo,
    pub doc_type: DocType,
    pub validity_info: ValidityInfo,
}

impl MobileSecurityObject {
    /// Decode the MSO from a `COSE_Sign1` payload, which holds `#6.24(bstr .cbor MSO)`.
    pub fn from_issuer_auth_payload(payload: &[u8]) -> Validated<Self> {
        let tagged = cbor::from_slice(payload)?;
        Self::from_cbor_bytes(cbor::unwrap_tag24(&tagged)?)
    }

    /// The `COSE_Sign1` payload carrying this MSO.
    pub fn to_issuer_auth_payload(&self) -> Result<Vec<u8>, Error> {
        cbor::to_vec(&cbor::wrap_tag24(self.to_cbor_bytes()?))
    }

    pub fn digest(&self, namespace: &NameSpace, digest_id: DigestId) -> Option<&ByteStr> {
        self.value_digests
            .get(namespace)
            .and_then(|digests| digests.get(&digest_id))
    }
}

fn version(value: &Value) -> Result<String, Error> {
    let version = cbor::get_text(value)?;
    if version != MSO_VERSION {
        return Err(Error::UnsupportedVersion {
            structure: "mobile security object",
            version: version.to_string(),
        });
    }
    Ok(version.to_string())
}

fn digest_ids(value: &Value) -> Validated<DigestIds> {
    let entries = collect_all(cbor::as_map(value)?.iter().map(|(id, digest)| {
        crate::accumulate!(DigestId::from_cbor(id), ByteStr::from_cbor(digest))
    }))?;
    Ok(cbor::unique_keys(entries, "digest id")?)
}

fn value_digests(value: &Value) -> Validated<BTreeMap<NameSpace, DigestIds>> {
    let entries = collect_all(cbor::as_map(value)?.iter().map(|(namespace, digests)| {
        crate::accumulate!(NameSpace::from_cbor(namespace), digest_ids(digests))
    }))?;
    Ok(cbor::unique_keys(entries, "namespace")?)
}

impl FromCbor for MobileSecurityObject {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (version, digest_algorithm, value_digests, device_key_info, doc_type, validity_info) =
            crate::accumulate!(
                cbor::field(map, &cbor::text("version"), version),
                cbor::decode_field::<DigestAlgorithm>(map, "digestAlgorithm"),
                cbor::get_by_label(map, &cbor::text("valueDigests"))
                    .map_err(Into::into)
                    .and_then(value_digests),
                cbor::decode_field::<DeviceKeyInfo>(map, "deviceKeyInfo"),
                cbor::decode_field::<DocType>(map, "docType"),
                cbor::decode_field::<ValidityInfo>(map, "validityInfo"),
            )?;
        Ok(Self {
            version,
            digest_algorithm,
            value_digests,
            device_key_info,
            doc_type,
            validity_info,
        })
    }
}

impl ToCbor for MobileSecurityObject {
    fn to_cbor(&self) -> Value {
        let value_digests = self
            .value_digests
            .iter()
            .map(|(namespace, digests)| {
                (
                    namespace.to_cbor(),
                    Value::Map(
                        digests
                            .iter()
                            .map(|(id, digest)| (id.to_cbor(), digest.to_cbor()))
                            .collect(),
                    ),
                )
            })
            .collect();
        Value::Map(vec![
            (Value::Text("version".into()), Value::Text(self.version.clone())),
            (
                Value::Text("digestAlgorithm".into()),
                self.digest_algorithm.to_cbor(),
            ),
            (Value::Text("valueDigests".into()), Value::Map(value_digests)),
            (
                Value::Text("deviceKeyInfo".into()),
                self.device_key_info.to_cbor(),
            ),
            (Value::Text("docType".into()), self.doc_type.to_cbor()),
            (
                Value::Text("validityInfo".into()),
                self.validity_info.to_cbor(),
            ),
        ])
    }
}

#[cfg(test)]
mod test {
    use p256::ecdsa::SigningKey;
    use time::macros::datetime;

    use super::*;

    fn mso() -> MobileSecurityObject {
        let key = SigningKey::random(&mut rand::thread_rng());
        let digests = [(DigestId::new(0), ByteStr::from(vec![7u8; 32]))]
            .into_iter()
            .collect();
        MobileSecurityObject {
            version: MSO_VERSION.to_string(),
            digest_algorithm: DigestAlgorithm::SHA256,
            value_digests: [("org.iso.18013.5.1".parse().unwrap(), digests)]
                .into_iter()
                .collect(),
            device_key_info: CoseKey::try_from(key.verifying_key()).unwrap().into(),
            doc_type: "org.iso.18013.5.1.mDL".parse().unwrap(),
            validity_info: ValidityInfo::new(
                datetime!(2024-01-01 0:00 UTC),
                datetime!(2024-01-01 0:00 UTC),
                datetime!(2030-01-01 0:00 UTC),
                None,
            )
            .unwrap(),
        }
    }

    fn replace(value: Value, key: &str, replacement: Value) -> Value {
        let Value::Map(entries) = value else {
            panic!("expected a map")
        };
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| {
                    if k.as_text() == Some(key) {
                        (k, replacement.clone())
                    } else {
                        (k, v)
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn decodes_from_the_issuer_auth_payload() {
        let mso = mso();
        let payload = mso.to_issuer_auth_payload().unwrap();
        let decoded = MobileSecurityObject::from_issuer_auth_payload(&payload).unwrap();
        assert_eq!(decoded, mso);
        assert_eq!(
            decoded.digest(&"org.iso.18013.5.1".parse().unwrap(), DigestId::new(0)),
            Some(&ByteStr::from(vec![7u8; 32]))
        );
    }

    #[test]
    fn payload_must_be_tag24() {
        let payload = mso().to_cbor_bytes().unwrap();
        assert!(MobileSecurityObject::from_issuer_auth_payload(&payload).is_err());
    }

    fn digests(ids: &[u64]) -> Value {
        Value::Map(
            ids.iter()
                .map(|id| (Value::Integer((*id).into()), Value::Bytes(vec![7u8; 32])))
                .collect(),
        )
    }

    #[test]
    fn repeated_digest_ids_are_rejected() {
        let value_digests = Value::Map(vec![(
            Value::Text("org.iso.18013.5.1".into()),
            digests(&[4, 9, 4]),
        )]);
        let value = replace(mso().to_cbor(), "valueDigests", value_digests);
        let errors = MobileSecurityObject::from_cbor(&value).unwrap_err();
        assert_eq!(
            errors.into_vec(),
            vec![Error::DuplicateKey {
                context: "digest id",
                key: "4".to_string()
            }]
        );
    }

    #[test]
    fn repeated_namespaces_are_rejected() {
        let value_digests = Value::Map(vec![
            (Value::Text("org.iso.18013.5.1".into()), digests(&[1])),
            (Value::Text("org.iso.18013.5.1".into()), digests(&[2])),
        ]);
        let value = replace(mso().to_cbor(), "valueDigests", value_digests);
        let errors = MobileSecurityObject::from_cbor(&value).unwrap_err();
        assert_eq!(
            errors.into_vec(),
            vec![Error::DuplicateKey {
                context: "namespace",
                key: "org.iso.18013.5.1".to_string()
            }]
        );
    }

    #[test]
    fn only_sha256_is_supported() {
        let value = replace(mso().to_cbor(), "digestAlgorithm", Value::Text("SHA-512".into()));
        let errors = MobileSecurityObject::from_cbor(&value).unwrap_err();
        assert_eq!(
            errors.into_vec(),
            vec![Error::UnsupportedDigestAlgorithm("SHA-512".into())]
        );
    }

    #[test]
    fn sibling_failures_are_accumulated() {
        let value = replace(mso().to_cbor(), "version", Value::Text("2.0".into()));
        let value = replace(value, "docType", Value::Integer(1.into()));
        let value = replace(value, "validityInfo", Value::Null);
        let errors = MobileSecurityObject::from_cbor(&value).unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
