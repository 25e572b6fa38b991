use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, bail, Result};
use coset::iana;
use p256::ecdsa::Signature;
use rand::Rng;
use signature::Signer;

use crate::cose::{
    CoseKey, CoseSign1, PreparedCoseSign1, ProtectedHeaders, SignatureAlgorithm,
    UnprotectedHeaders,
};
use crate::definitions::element::Element;
use crate::definitions::helpers::{NonEmptyVec, Tag24};
use crate::definitions::identifiers::{DocType, ElementIdentifier, NameSpace};
use crate::definitions::issuer_signed::{
    IssuerAuth, IssuerNameSpaces, IssuerSigned, IssuerSignedItem, IssuerSignedItemBytes,
};
use crate::definitions::mso::{
    DeviceKeyInfo, DigestAlgorithm, DigestId, DigestIds, MobileSecurityObject, MSO_VERSION,
};
use crate::definitions::validity_info::ValidityInfo;
use crate::definitions::x509::X5Chain;
use crate::mdoc::Mdoc;

/// Element values to issue, per namespace.
pub type Namespaces = BTreeMap<NameSpace, BTreeMap<ElementIdentifier, Element>>;

/// An incomplete mdoc, requiring a remotely signed signature to be completed.
#[derive(Debug, Clone)]
pub struct PreparedMdoc {
    doc_type: DocType,
    namespaces: IssuerNameSpaces,
    prepared_sig: PreparedCoseSign1,
}

#[derive(Debug, Clone, Default)]
pub struct Builder {
    doc_type: Option<DocType>,
    namespaces: Option<Namespaces>,
    validity_info: Option<ValidityInfo>,
    digest_algorithm: Option<DigestAlgorithm>,
    device_key_info: Option<DeviceKeyInfo>,
    x5chain: Option<X5Chain>,
}

impl PreparedMdoc {
    /// Retrieve the payload for a remote signature.
    pub fn signature_payload(&self) -> &[u8] {
        self.prepared_sig.signature_payload()
    }

    /// Supply the remotely signed signature (raw `r‖s`) to complete and issue the prepared mdoc.
    pub fn complete(self, signature: Vec<u8>) -> Result<Mdoc> {
        let PreparedMdoc {
            doc_type,
            namespaces,
            prepared_sig,
        } = self;

        let issuer_auth = IssuerAuth::try_from(prepared_sig.finalize(signature)?)?;
        let issuer_signed = IssuerSigned::new(Some(namespaces), issuer_auth);
        Ok(Mdoc::new(doc_type, issuer_signed)?)
    }
}

impl Builder {
    /// Set the document type.
    pub fn doc_type(mut self, doc_type: DocType) -> Self {
        self.doc_type = Some(doc_type);
        self
    }

    /// Set the data elements.
    pub fn namespaces(mut self, namespaces: Namespaces) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    pub fn validity_info(mut self, validity_info: ValidityInfo) -> Self {
        self.validity_info = Some(validity_info);
        self
    }

    /// Set the digest algorithm; SHA-256 when unset.
    pub fn digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = Some(digest_algorithm);
        self
    }

    /// Set the information about the device key that this mdoc will be issued to.
    pub fn device_key_info(mut self, device_key_info: DeviceKeyInfo) -> Self {
        self.device_key_info = Some(device_key_info);
        self
    }

    pub fn device_key(self, device_key: CoseKey) -> Self {
        self.device_key_info(device_key.into())
    }

    /// Set the x5chain of the issuing key.
    pub fn x5chain(mut self, x5chain: X5Chain) -> Self {
        self.x5chain = Some(x5chain);
        self
    }

    /// Prepare the mdoc for remote signing with ES256.
    pub fn prepare(self) -> Result<PreparedMdoc> {
        let doc_type = self
            .doc_type
            .ok_or_else(|| anyhow!("missing parameter: 'doc_type'"))?;
        let namespaces = self
            .namespaces
            .ok_or_else(|| anyhow!("missing parameter: 'namespaces'"))?;
        let validity_info = self
            .validity_info
            .ok_or_else(|| anyhow!("missing parameter: 'validity_info'"))?;
        let device_key_info = self
            .device_key_info
            .ok_or_else(|| anyhow!("missing parameter: 'device_key_info'"))?;
        let x5chain = self
            .x5chain
            .ok_or_else(|| anyhow!("missing parameter: 'x5chain'"))?;
        let digest_algorithm = self.digest_algorithm.unwrap_or(DigestAlgorithm::SHA256);

        let issuer_namespaces = to_issuer_namespaces(namespaces)?;
        let value_digests = digest_namespaces(&issuer_namespaces, digest_algorithm)?;

        let mso = MobileSecurityObject {
            version: MSO_VERSION.to_string(),
            digest_algorithm,
            value_digests,
            device_key_info,
            doc_type: doc_type.clone(),
            validity_info,
        };

        let prepared_sig = CoseSign1::prepare(
            ProtectedHeaders::new(iana::Algorithm::ES256)?,
            UnprotectedHeaders::new().with_x5chain(&x5chain),
            Some(mso.to_issuer_auth_payload()?),
            None,
        )
        .map_err(|e| anyhow!("error preparing cosesign1: {}", e))?;

        Ok(PreparedMdoc {
            doc_type,
            namespaces: issuer_namespaces,
            prepared_sig,
        })
    }

    /// Directly issue an mdoc.
    pub fn issue<S>(self, signer: &S) -> Result<Mdoc>
    where
        S: Signer<Signature> + SignatureAlgorithm,
    {
        if signer.algorithm() != iana::Algorithm::ES256 {
            bail!("unsupported signature algorithm: {:?}", signer.algorithm());
        }
        let prepared_mdoc = self.prepare()?;
        let signature: Signature = signer
            .try_sign(prepared_mdoc.signature_payload())
            .map_err(|e| anyhow!("error signing cosesign1: {}", e))?;
        prepared_mdoc.complete(signature.to_bytes().to_vec())
    }
}

fn to_issuer_namespaces(namespaces: Namespaces) -> Result<IssuerNameSpaces> {
    if namespaces.is_empty() {
        bail!("at least one namespace required");
    }
    let mut used_ids = HashSet::new();
    let namespaces = namespaces
        .into_iter()
        .map(|(name, elements)| {
            let items = elements
                .into_iter()
                .map(|(element_identifier, element_value)| {
                    Tag24::new(IssuerSignedItem {
                        digest_id: generate_digest_id(&mut used_ids),
                        random: Vec::from(rand::thread_rng().gen::<[u8; 16]>()).into(),
                        element_identifier,
                        element_value,
                    })
                    .map_err(|err| anyhow!("unable to encode IssuerSignedItem as cbor: {}", err))
                })
                .collect::<Result<Vec<IssuerSignedItemBytes>>>()?;
            let items = NonEmptyVec::try_from(items)
                .map_err(|_| anyhow!("at least one element required in namespace {name}"))?;
            Ok((name, items))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(IssuerNameSpaces::new(namespaces))
}

fn digest_namespaces(
    namespaces: &IssuerNameSpaces,
    digest_algorithm: DigestAlgorithm,
) -> Result<BTreeMap<NameSpace, DigestIds>> {
    namespaces
        .iter()
        .map(|(name, items)| Ok((name.clone(), digest_namespace(items, digest_algorithm)?)))
        .collect()
}

fn digest_namespace(
    items: &[IssuerSignedItemBytes],
    digest_algorithm: DigestAlgorithm,
) -> Result<DigestIds> {
    let mut used_ids = items.iter().map(|item| item.as_ref().digest_id).collect();

    // Decoy digests hide the number of elements issued.
    let decoys: Vec<(DigestId, Vec<u8>)> = (0..rand::thread_rng().gen_range(5..10))
        .map(|_| {
            let bytes = std::iter::repeat_with(|| rand::thread_rng().gen::<u8>())
                .take(512)
                .collect();
            (generate_digest_id(&mut used_ids), bytes)
        })
        .collect();

    items
        .iter()
        .map(|item| -> Result<(DigestId, Vec<u8>)> {
            Ok((item.as_ref().digest_id, item.tagged_bytes()?))
        })
        .chain(decoys.into_iter().map(Ok))
        .map(|result: Result<_>| {
            let (digest_id, bytes) = result?;
            Ok((digest_id, digest_algorithm.digest(&bytes).into()))
        })
        .collect()
}

fn generate_digest_id(used_ids: &mut HashSet<DigestId>) -> DigestId {
    loop {
        let digest_id = DigestId::new(u64::from(rand::thread_rng().gen::<u32>()));
        if used_ids.insert(digest_id) {
            return digest_id;
        }
    }
}
