//! This module contains the definition of the [IssuerSigned] struct and related types.
//!
//! - [IssuerNameSpaces] holds, per namespace, the disclosable [IssuerSignedItemBytes].
//! - [IssuerSignedItemBytes] is a [`Tag24<IssuerSignedItem>`] whose original encoding is the
//!   input of the digest committed to in the mobile security object.
//! - [IssuerAuth] is the issuer's `COSE_Sign1` over that mobile security object.
use ciborium::Value;
use coset::iana;

use crate::cbor;
use crate::cose::{CoseSign1, VerificationResult};
use crate::definitions::element::Element;
use crate::definitions::helpers::{ByteStr, NonEmptyVec, Tag24};
use crate::definitions::identifiers::{ElementIdentifier, NameSpace};
use crate::definitions::mso::{DigestId, MobileSecurityObject};
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::definitions::x509::X5Chain;
use crate::error::Error;
use crate::validated::{collect_all, Validated};

/// Minimum length of the salt of an [IssuerSignedItem].
pub const MIN_RANDOM_LENGTH: usize = 16;

/// Represents an item signed by the issuer.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSignedItem {
    /// The ID of the digest committing to this item.
    pub digest_id: DigestId,

    /// Salt preventing digest guessing.
    pub random: ByteStr,

    /// The identifier of the element.
    pub element_identifier: ElementIdentifier,

    /// The value of the element.
    pub element_value: Element,
}

pub type IssuerSignedItemBytes = Tag24<IssuerSignedItem>;

fn random(value: &Value) -> Result<ByteStr, Error> {
    let random = cbor::get_byte_string(value)?;
    if random.len() < MIN_RANDOM_LENGTH {
        return Err(Error::InvalidRandom(random.len()));
    }
    Ok(random.to_vec().into())
}

impl FromCbor for IssuerSignedItem {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (digest_id, random, element_identifier, element_value) = crate::accumulate!(
            cbor::decode_field::<DigestId>(map, "digestID"),
            cbor::field(map, &cbor::text("random"), random),
            cbor::decode_field::<ElementIdentifier>(map, "elementIdentifier"),
            cbor::decode_field::<Element>(map, "elementValue"),
        )?;
        Ok(Self {
            digest_id,
            random,
            element_identifier,
            element_value,
        })
    }
}

impl ToCbor for IssuerSignedItem {
    fn to_cbor(&self) -> Value {
        Value::Map(vec![
            (Value::Text("digestID".into()), self.digest_id.to_cbor()),
            (Value::Text("random".into()), self.random.to_cbor()),
            (
                Value::Text("elementIdentifier".into()),
                self.element_identifier.to_cbor(),
            ),
            (
                Value::Text("elementValue".into()),
                self.element_value.to_cbor(),
            ),
        ])
    }
}

/// Issuer-signed items per namespace, in wire order.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerNameSpaces(Vec<(NameSpace, NonEmptyVec<IssuerSignedItemBytes>)>);

impl IssuerNameSpaces {
    pub fn new(namespaces: Vec<(NameSpace, NonEmptyVec<IssuerSignedItemBytes>)>) -> Self {
        Self(namespaces)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NameSpace, &NonEmptyVec<IssuerSignedItemBytes>)> {
        self.0.iter().map(|(namespace, items)| (namespace, items))
    }

    pub fn get(&self, namespace: &str) -> Option<&NonEmptyVec<IssuerSignedItemBytes>> {
        self.0
            .iter()
            .find(|(ns, _)| ns.as_str() == namespace)
            .map(|(_, items)| items)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only the items matching `keep`, dropping namespaces left without items.
    pub fn retain_items(
        &self,
        mut keep: impl FnMut(&NameSpace, &IssuerSignedItem) -> bool,
    ) -> Option<IssuerNameSpaces> {
        let retained: Vec<_> = self
            .0
            .iter()
            .filter_map(|(namespace, items)| {
                items
                    .filtered(|item| keep(namespace, item.as_ref()))
                    .map(|items| (namespace.clone(), items))
            })
            .collect();
        if retained.is_empty() {
            None
        } else {
            Some(Self(retained))
        }
    }
}

impl FromCbor for IssuerNameSpaces {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let namespaces = collect_all(cbor::as_map(value)?.iter().map(|(namespace, items)| {
            crate::accumulate!(
                NameSpace::from_cbor(namespace),
                NonEmptyVec::<IssuerSignedItemBytes>::from_cbor(items)
            )
        }))?;
        if namespaces.is_empty() {
            return Err(Error::EmptyCollection("issuer namespaces").into());
        }
        Ok(Self(namespaces))
    }
}

impl ToCbor for IssuerNameSpaces {
    fn to_cbor(&self) -> Value {
        Value::Map(
            self.0
                .iter()
                .map(|(namespace, items)| (namespace.to_cbor(), items.to_cbor()))
                .collect(),
        )
    }
}

/// The issuer's signature over the mobile security object.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerAuth {
    cose_sign1: CoseSign1,
    mso: MobileSecurityObject,
    x5chain: X5Chain,
}

impl IssuerAuth {
    pub fn cose_sign1(&self) -> &CoseSign1 {
        &self.cose_sign1
    }

    pub fn mso(&self) -> &MobileSecurityObject {
        &self.mso
    }

    /// Document signer certificate chain from the unprotected headers.
    pub fn x5chain(&self) -> &X5Chain {
        &self.x5chain
    }

    /// Verify the issuer signature against the document signer certificate.
    pub fn verify_signature(&self) -> VerificationResult {
        match self.x5chain.end_entity_public_key() {
            Ok(key) => self.cose_sign1.verify(&key, None),
            Err(e) => VerificationResult::Error(e.to_string()),
        }
    }
}

impl TryFrom<CoseSign1> for IssuerAuth {
    type Error = crate::error::Errors;

    fn try_from(cose_sign1: CoseSign1) -> Validated<Self> {
        let mso = cose_sign1
            .payload()
            .ok_or_else(|| Error::CborWrongType {
                expected: "issuer auth payload byte string",
                cbor: "null".to_string(),
            })
            .map_err(Into::into)
            .and_then(MobileSecurityObject::from_issuer_auth_payload);
        let (_, mso, x5chain) = crate::accumulate!(
            cose_sign1.protected().require_alg(iana::Algorithm::ES256),
            mso,
            cose_sign1.unprotected().x5chain(),
        )?;
        Ok(Self {
            cose_sign1,
            mso,
            x5chain,
        })
    }
}

impl FromCbor for IssuerAuth {
    fn from_cbor(value: &Value) -> Validated<Self> {
        CoseSign1::from_cbor(value)?.try_into()
    }
}

impl ToCbor for IssuerAuth {
    fn to_cbor(&self) -> Value {
        self.cose_sign1.to_cbor()
    }
}

/// Represents an issuer-signed object.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSigned {
    pub namespaces: Option<IssuerNameSpaces>,
    pub issuer_auth: IssuerAuth,
    key_order: cbor::KeyOrder,
}

impl IssuerSigned {
    pub fn new(namespaces: Option<IssuerNameSpaces>, issuer_auth: IssuerAuth) -> Self {
        Self {
            namespaces,
            issuer_auth,
            key_order: cbor::KeyOrder::default(),
        }
    }

    /// Recompute the digest of every item and compare it with the mobile security object.
    ///
    /// All mismatching and missing digests are reported.
    pub fn verify_digests(&self) -> Validated<()> {
        let Some(namespaces) = &self.namespaces else {
            return Ok(());
        };
        let mso = self.issuer_auth.mso();
        let checks = namespaces.iter().flat_map(|(namespace, items)| {
            items
                .iter()
                .map(move |item| verify_item_digest(mso, namespace, item))
        });
        collect_all(checks).map(|_| ())
    }
}

fn verify_item_digest(
    mso: &MobileSecurityObject,
    namespace: &NameSpace,
    item: &IssuerSignedItemBytes,
) -> Result<(), Error> {
    let digest_id = item.as_ref().digest_id;
    let expected = mso
        .digest(namespace, digest_id)
        .ok_or_else(|| Error::MissingDigest {
            namespace: namespace.to_string(),
            digest_id: digest_id.value(),
        })?;
    let digest = mso.digest_algorithm.digest(&item.tagged_bytes()?);
    if digest.as_slice() != expected.as_ref() {
        tracing::warn!(
            "digest mismatch for {namespace}/{} ({digest_id})",
            item.as_ref().element_identifier
        );
        return Err(Error::DigestMismatch {
            namespace: namespace.to_string(),
            digest_id: digest_id.value(),
            element_identifier: item.as_ref().element_identifier.to_string(),
        });
    }
    Ok(())
}

impl FromCbor for IssuerSigned {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (namespaces, issuer_auth) = crate::accumulate!(
            cbor::decode_opt_field::<IssuerNameSpaces>(map, "nameSpaces"),
            cbor::decode_field::<IssuerAuth>(map, "issuerAuth"),
        )?;
        Ok(Self {
            namespaces,
            issuer_auth,
            key_order: cbor::KeyOrder::of(map),
        })
    }
}

impl ToCbor for IssuerSigned {
    fn to_cbor(&self) -> Value {
        let mut map = Vec::new();
        if let Some(namespaces) = &self.namespaces {
            map.push(("nameSpaces", namespaces.to_cbor()));
        }
        map.push(("issuerAuth", self.issuer_auth.to_cbor()));
        self.key_order.map(map)
    }
}
