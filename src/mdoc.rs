//! The issuer-signed credential held in a wallet.
//!
//! An [Mdoc] can only be built from issuer-signed data whose every item matches its digest in
//! the mobile security object, so holding one means the disclosed values are the ones the
//! issuer committed to. The issuer signature and certificate chain are checked separately, by
//! the verifier, see [crate::presentation::reader].
use std::collections::BTreeMap;

use ciborium::Value;

use crate::cbor;
use crate::definitions::device_request::RequestedElements;
use crate::definitions::element::Element;
use crate::definitions::identifiers::{DocType, ElementIdentifier, NameSpace};
use crate::definitions::issuer_signed::{IssuerNameSpaces, IssuerSigned};
use crate::definitions::mso::MobileSecurityObject;
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::Validated;

/// Disclosed element values per namespace.
pub type Claims = BTreeMap<NameSpace, BTreeMap<ElementIdentifier, Element>>;

#[derive(Clone, Debug, PartialEq)]
pub struct Mdoc {
    doc_type: DocType,
    issuer_signed: IssuerSigned,
    key_order: cbor::KeyOrder,
}

/// Decode an mdoc from its CBOR encoding, checking every digest.
pub fn valid_mdoc(bytes: &[u8]) -> Validated<Mdoc> {
    Mdoc::from_bytes(bytes)
}

impl Mdoc {
    /// Assemble an mdoc, checking that the document types agree and every item matches its
    /// digest.
    pub fn new(doc_type: DocType, issuer_signed: IssuerSigned) -> Validated<Self> {
        let mso_doc_type = &issuer_signed.issuer_auth.mso().doc_type;
        if mso_doc_type != &doc_type {
            return Err(Error::DocTypeMismatch {
                expected: doc_type.to_string(),
                found: mso_doc_type.to_string(),
            }
            .into());
        }
        issuer_signed.verify_digests()?;
        Ok(Self {
            doc_type,
            issuer_signed,
            key_order: cbor::KeyOrder::default(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Validated<Self> {
        Self::from_cbor_bytes(bytes)
    }

    pub fn doc_type(&self) -> &DocType {
        &self.doc_type
    }

    pub fn issuer_signed(&self) -> &IssuerSigned {
        &self.issuer_signed
    }

    pub fn mso(&self) -> &MobileSecurityObject {
        self.issuer_signed.issuer_auth.mso()
    }

    pub fn namespaces(&self) -> Option<&IssuerNameSpaces> {
        self.issuer_signed.namespaces.as_ref()
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        self.to_cbor_bytes()
    }

    /// A copy of this mdoc holding only the requested items.
    ///
    /// Namespace and item order is kept, namespaces left without items are dropped. The issuer
    /// authentication is untouched, so the result still verifies.
    pub fn selectively_disclose(&self, requested: &RequestedElements) -> Mdoc {
        let namespaces = self.namespaces().and_then(|namespaces| {
            namespaces.retain_items(|namespace, item| {
                requested
                    .get(namespace)
                    .is_some_and(|identifiers| identifiers.contains(&item.element_identifier))
            })
        });
        let mut disclosed = self.clone();
        disclosed.issuer_signed.namespaces = namespaces;
        disclosed
    }

    /// Every element value, per namespace.
    pub fn claims(&self) -> Claims {
        let mut claims = Claims::new();
        for (namespace, items) in self.namespaces().into_iter().flat_map(|ns| ns.iter()) {
            let elements = claims.entry(namespace.clone()).or_default();
            for item in items.iter() {
                let item = item.as_ref();
                elements.insert(item.element_identifier.clone(), item.element_value.clone());
            }
        }
        claims
    }

    /// Elements in `requested` that this mdoc does not hold.
    pub fn missing_elements(&self, requested: &RequestedElements) -> RequestedElements {
        let claims = self.claims();
        requested
            .iter()
            .filter_map(|(namespace, identifiers)| {
                let missing: Vec<_> = identifiers
                    .iter()
                    .filter(|id| {
                        !claims
                            .get(namespace)
                            .is_some_and(|elements| elements.contains_key(*id))
                    })
                    .cloned()
                    .collect();
                (!missing.is_empty()).then(|| (namespace.clone(), missing))
            })
            .collect()
    }
}

impl FromCbor for Mdoc {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (doc_type, issuer_signed) = crate::accumulate!(
            cbor::decode_field::<DocType>(map, "docType"),
            cbor::decode_field::<IssuerSigned>(map, "issuerSigned"),
        )?;
        Ok(Self {
            key_order: cbor::KeyOrder::of(map),
            ..Self::new(doc_type, issuer_signed)?
        })
    }
}

impl ToCbor for Mdoc {
    fn to_cbor(&self) -> Value {
        self.key_order.map(vec![
            ("docType", self.doc_type.to_cbor()),
            ("issuerSigned", self.issuer_signed.to_cbor()),
        ])
    }
}

#[cfg(test)]
pub(crate) mod test {
    use p256::ecdsa::SigningKey;
    use time::macros::datetime;

    use super::*;
    use crate::cose::CoseKey;
    use crate::definitions::validity_info::ValidityInfo;
    use crate::definitions::x509::{test::setup, X5Chain};
    use crate::issuance::mdoc::{Builder, Namespaces};

    pub(crate) const DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
    pub(crate) const NAMESPACE: &str = "org.iso.18013.5.1";

    pub(crate) fn namespaces() -> Namespaces {
        let elements = [
            ("family_name", Element::text("Doe")),
            ("given_name", Element::text("Jane")),
            ("birth_date", Element::full_date("1990-01-31")),
            ("age_over_21", Element::Scalar(Value::Bool(true))),
        ]
        .into_iter()
        .map(|(id, value)| (id.parse().unwrap(), value))
        .collect();
        [(NAMESPACE.parse().unwrap(), elements)].into_iter().collect()
    }

    /// An mdoc issued to `device_key`.
    pub(crate) fn issue(device_key: &SigningKey) -> Mdoc {
        let (_, signer, signer_key) = setup();
        let x5chain = X5Chain::builder()
            .with_certificate(signer)
            .unwrap()
            .build()
            .unwrap();
        Builder::default()
            .doc_type(DOC_TYPE.parse().unwrap())
            .namespaces(namespaces())
            .validity_info(
                ValidityInfo::new(
                    datetime!(2024-01-01 0:00 UTC),
                    datetime!(2024-01-01 0:00 UTC),
                    datetime!(2050-01-01 0:00 UTC),
                    None,
                )
                .unwrap(),
            )
            .device_key(CoseKey::try_from(device_key.verifying_key()).unwrap())
            .x5chain(x5chain)
            .issue(&signer_key)
            .unwrap()
    }

    fn requested(elements: &[&str]) -> RequestedElements {
        [(
            NAMESPACE.parse().unwrap(),
            elements.iter().map(|id| id.parse().unwrap()).collect(),
        )]
        .into_iter()
        .collect()
    }

    static MDOC: &str = include_str!("../test/definitions/mdoc.cbor");
    static MDOC_DISCLOSED: &str = include_str!("../test/definitions/mdoc_disclosed.cbor");

    fn fixture(hex: &str) -> Vec<u8> {
        hex::decode(hex.trim()).unwrap()
    }

    /// Encode `mdoc` after applying `edit` to its issuer auth `COSE_Sign1` array.
    fn with_issuer_auth(mdoc: &Mdoc, mut edit: impl FnMut(&mut Vec<Value>)) -> Vec<u8> {
        let mut value = mdoc.to_cbor();
        let Value::Map(entries) = &mut value else {
            panic!("an mdoc is a map")
        };
        for (key, issuer_signed) in entries.iter_mut() {
            if key.as_text() != Some("issuerSigned") {
                continue;
            }
            let Value::Map(fields) = issuer_signed else {
                panic!("issuerSigned is a map")
            };
            for (key, issuer_auth) in fields.iter_mut() {
                if let (Some("issuerAuth"), Value::Array(array)) = (key.as_text(), issuer_auth) {
                    edit(array);
                }
            }
        }
        cbor::to_vec(&value).unwrap()
    }

    #[test]
    fn fixture_round_trips_byte_for_byte() {
        let bytes = fixture(MDOC);
        let mdoc = valid_mdoc(&bytes).unwrap();
        assert_eq!(mdoc.encode().unwrap(), bytes);
        assert_eq!(mdoc.claims()[NAMESPACE].len(), 6);
        let issuer_auth = &mdoc.issuer_signed().issuer_auth;
        assert!(issuer_auth.verify_signature().is_success());
        assert_eq!(
            issuer_auth.x5chain().end_entity_common_name(),
            "Fixture Document Signer"
        );
    }

    #[test]
    fn disclosure_keeps_item_order_and_encodes_deterministically() {
        let mdoc = valid_mdoc(&fixture(MDOC)).unwrap();
        let disclosed =
            mdoc.selectively_disclose(&requested(&["driving_privileges", "family_name"]));

        let identifiers: Vec<&str> = disclosed
            .namespaces()
            .and_then(|namespaces| namespaces.get(NAMESPACE))
            .unwrap()
            .iter()
            .map(|item| item.as_ref().element_identifier.as_str())
            .collect();
        assert_eq!(identifiers, ["family_name", "driving_privileges"]);
        assert_eq!(disclosed.encode().unwrap(), fixture(MDOC_DISCLOSED));
        assert!(valid_mdoc(&fixture(MDOC_DISCLOSED)).is_ok());
    }

    #[test]
    fn decoded_key_order_is_kept() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let Value::Map(mut entries) = mdoc.to_cbor() else {
            panic!("an mdoc is a map")
        };
        entries.reverse();
        for (_, value) in entries.iter_mut() {
            if let Value::Map(fields) = value {
                fields.reverse();
            }
        }
        let bytes = cbor::to_vec(&Value::Map(entries)).unwrap();
        assert_ne!(bytes, mdoc.encode().unwrap());

        let decoded = valid_mdoc(&bytes).unwrap();
        assert_eq!(decoded.encode().unwrap(), bytes);
        assert_eq!(decoded, mdoc);
    }

    #[test]
    fn encoding_is_byte_exact() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let bytes = mdoc.encode().unwrap();
        let decoded = valid_mdoc(&bytes).unwrap();
        assert_eq!(decoded.encode().unwrap(), bytes);
        assert_eq!(decoded.claims(), mdoc.claims());
    }

    #[test]
    fn disclosure_only_narrows() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let disclosed = mdoc.selectively_disclose(&requested(&["given_name", "nationality"]));

        let claims = disclosed.claims();
        let identifiers: Vec<&str> = claims[NAMESPACE].keys().map(|id| id.as_str()).collect();
        assert_eq!(identifiers, ["given_name"]);
        assert_eq!(mdoc.claims()[NAMESPACE].len(), 4);
        assert!(disclosed.issuer_signed().verify_digests().is_ok());
        assert_eq!(
            disclosed.missing_elements(&requested(&["given_name", "nationality"])),
            requested(&["nationality"])
        );
    }

    #[test]
    fn disclosing_nothing_drops_the_namespaces() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let disclosed = mdoc.selectively_disclose(&RequestedElements::new());
        assert!(disclosed.namespaces().is_none());
        assert!(valid_mdoc(&disclosed.encode().unwrap()).is_ok());
    }

    #[test]
    fn tampered_values_are_detected() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let bytes = mdoc.encode().unwrap();
        // "Jane" -> "Jone"
        let position = bytes
            .windows(4)
            .position(|window| window == b"Jane")
            .unwrap();
        let mut tampered = bytes.clone();
        tampered[position + 1] = b'o';

        let errors = valid_mdoc(&tampered).unwrap_err();
        assert!(errors.contains(|e| matches!(
            e,
            Error::DigestMismatch { element_identifier, .. } if element_identifier == "given_name"
        )));
    }

    #[test]
    fn tampered_digests_are_detected() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let item = mdoc.namespaces().unwrap().get(NAMESPACE).unwrap()[1].as_ref().clone();
        let digest = mdoc
            .mso()
            .digest(&NAMESPACE.parse().unwrap(), item.digest_id)
            .unwrap()
            .as_ref()
            .to_vec();
        let bytes = mdoc.encode().unwrap();
        let position = bytes
            .windows(digest.len())
            .position(|window| window == digest.as_slice())
            .unwrap();
        let mut tampered = bytes.clone();
        tampered[position] ^= 0xff;

        let errors = valid_mdoc(&tampered).unwrap_err();
        assert!(errors.contains(|e| matches!(
            e,
            Error::DigestMismatch { element_identifier, .. }
                if *element_identifier == item.element_identifier.to_string()
        )));
    }

    #[test]
    fn missing_doc_type_is_reported() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let Value::Map(mut entries) = mdoc.to_cbor() else {
            panic!("an mdoc is a map")
        };
        entries.retain(|(key, _)| key.as_text() != Some("docType"));
        let errors = valid_mdoc(&cbor::to_vec(&Value::Map(entries)).unwrap()).unwrap_err();
        assert_eq!(
            errors.into_vec(),
            vec![Error::CborFieldNotFound {
                label: "\"docType\"".to_string()
            }]
        );
    }

    #[test]
    fn text_algorithm_is_reported() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let protected = cbor::to_vec(&Value::Map(vec![(
            Value::Integer(1.into()),
            Value::Text("ES256".into()),
        )]))
        .unwrap();
        let bytes = with_issuer_auth(&mdoc, |array| array[0] = Value::Bytes(protected.clone()));
        let errors = valid_mdoc(&bytes).unwrap_err();
        assert!(errors.contains(|e| matches!(e, Error::CborNotANumber { .. })));
    }

    #[test]
    fn missing_signature_is_reported() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let bytes = with_issuer_auth(&mdoc, |array| {
            array.pop();
        });
        let errors = valid_mdoc(&bytes).unwrap_err();
        assert!(errors.contains(|e| *e == Error::CborIndexNotFound { index: 3, len: 3 }));
    }

    #[test]
    fn doc_type_must_match_the_mso() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let errors = Mdoc::new(
            "org.example.other".parse().unwrap(),
            mdoc.issuer_signed().clone(),
        )
        .unwrap_err();
        assert!(matches!(errors.first(), Some(Error::DocTypeMismatch { .. })));
    }
}
