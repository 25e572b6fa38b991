#![allow(dead_code)]
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::random;
use signature::Signer;
use time::macros::datetime;
use x509_cert::builder::{Builder as _, CertificateBuilder, Profile};
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages};
use x509_cert::spki::{SignatureBitStringEncoding, SubjectPublicKeyInfoOwned};
use x509_cert::time::Validity;
use x509_cert::Certificate;

use mdoc_core::cose::CoseKey;
use mdoc_core::crypto::InMemoryKeyStore;
use mdoc_core::definitions::x509::{
    CertificateWithDer, ValidationOptions, X5Chain, X5ChainValidator,
};
use mdoc_core::definitions::helpers::NonEmptyVec;
use mdoc_core::definitions::{
    DeviceRequest, DocRequest, DocType, Element, ElementIdentifier, ItemsRequest, NameSpace,
    RequestedElements, ValidityInfo,
};
use mdoc_core::issuance::{Builder, Namespaces};
use mdoc_core::Mdoc;

pub const DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
pub const NAMESPACE: &str = "org.iso.18013.5.1";
pub const DEVICE_KEY_ID: &str = "device";

/// An issuing authority: a root certificate and a document signer certificate issued by it.
pub struct Issuer {
    pub root: Certificate,
    pub signer: Certificate,
    pub signer_key: SigningKey,
}

/// A wallet holding one mdoc and the device key it was issued to.
pub struct Wallet {
    pub mdoc: Mdoc,
    pub key_store: InMemoryKeyStore,
}

fn sign(mut builder: CertificateBuilder<'_, SigningKey>, key: &SigningKey) -> Result<Certificate> {
    let tbs = builder.finalize()?;
    let signature: Signature = key.sign(&tbs);
    Ok(builder.assemble(signature.to_der().to_bitstring()?)?)
}

impl Issuer {
    pub fn new() -> Result<Self> {
        let root_key = SigningKey::random(&mut rand::thread_rng());
        let signer_key = SigningKey::random(&mut rand::thread_rng());
        let issuer_name: x509_cert::name::Name = "CN=Integration IACA,C=US".parse()?;

        let mut root = CertificateBuilder::new(
            Profile::Manual { issuer: None },
            random::<u64>().into(),
            Validity::from_now(Duration::from_secs(3600))?,
            issuer_name.clone(),
            SubjectPublicKeyInfoOwned::from_key(VerifyingKey::from(&root_key))?,
            &root_key,
        )?;
        root.add_extension(&BasicConstraints {
            ca: true,
            path_len_constraint: Some(0),
        })?;
        root.add_extension(&KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign))?;
        let root = sign(root, &root_key)?;

        let mut signer = CertificateBuilder::new(
            Profile::Manual {
                issuer: Some(issuer_name),
            },
            random::<u64>().into(),
            Validity::from_now(Duration::from_secs(3600))?,
            "CN=Integration Document Signer,C=US".parse()?,
            SubjectPublicKeyInfoOwned::from_key(VerifyingKey::from(&signer_key))?,
            &root_key,
        )?;
        signer.add_extension(&KeyUsage(KeyUsages::DigitalSignature.into()))?;
        let signer = sign(signer, &root_key)?;

        Ok(Self {
            root,
            signer,
            signer_key,
        })
    }

    /// A validator trusting this issuer's root.
    pub fn validator(&self) -> Result<X5ChainValidator> {
        Ok(X5ChainValidator::new(
            vec![CertificateWithDer::from_cert(self.root.clone())?],
            ValidationOptions::default(),
        ))
    }

    /// Issue an mDL to a fresh device key, valid from 2024 until 2050.
    pub fn issue(&self) -> Result<Wallet> {
        let device_key = SigningKey::random(&mut rand::thread_rng());
        let x5chain = X5Chain::builder()
            .with_certificate(self.signer.clone())?
            .build()?;
        let mdoc = Builder::default()
            .doc_type(DOC_TYPE.parse::<DocType>()?)
            .namespaces(namespaces()?)
            .validity_info(ValidityInfo::new(
                datetime!(2024-01-01 0:00 UTC),
                datetime!(2024-01-01 0:00 UTC),
                datetime!(2050-01-01 0:00 UTC),
                None,
            )?)
            .device_key(CoseKey::try_from(device_key.verifying_key())?)
            .x5chain(x5chain)
            .issue(&self.signer_key)
            .context("could not issue mdoc")?;
        let mut key_store = InMemoryKeyStore::new();
        key_store.insert(DEVICE_KEY_ID, device_key);
        Ok(Wallet { mdoc, key_store })
    }
}

pub fn namespaces() -> Result<Namespaces> {
    let elements = [
        ("family_name", Element::text("Doe")),
        ("given_name", Element::text("Jane")),
        ("birth_date", Element::full_date("1990-01-31")),
        ("age_over_21", Element::Scalar(ciborium::Value::Bool(true))),
    ]
    .into_iter()
    .map(|(id, value)| Ok((id.parse::<ElementIdentifier>()?, value)))
    .collect::<Result<BTreeMap<_, _>>>()?;
    Ok([(NAMESPACE.parse::<NameSpace>()?, elements)]
        .into_iter()
        .collect())
}

/// A device request for `elements` of the mDL namespace.
pub fn request(elements: &[&str]) -> Result<DeviceRequest> {
    let requested: RequestedElements = [(
        NAMESPACE.parse::<NameSpace>()?,
        elements
            .iter()
            .map(|id| id.parse::<ElementIdentifier>())
            .collect::<Result<Vec<_>, _>>()?,
    )]
    .into_iter()
    .collect();
    let items_request = ItemsRequest::new(DOC_TYPE.parse::<DocType>()?, &requested);
    let doc_request = DocRequest::new(items_request)?;
    Ok(DeviceRequest::new(NonEmptyVec::new(doc_request)))
}
