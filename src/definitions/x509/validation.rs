//! Trust-chain validation of the document signer certificate chain.
use const_oid::AssociatedOid;
use p256::ecdsa::Signature;
use signature::Verifier;
use time::OffsetDateTime;
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::Certificate;

use super::util::{common_name_or_unknown, public_key};
use super::x5chain::{CertificateWithDer, X5Chain};

/// Decides whether a certificate chain ends in a trusted root.
pub trait TrustChainValidator {
    fn is_trust_chain_valid(&self, x5chain: &X5Chain) -> bool;
}

impl<F> TrustChainValidator for F
where
    F: Fn(&X5Chain) -> bool,
{
    fn is_trust_chain_valid(&self, x5chain: &X5Chain) -> bool {
        self(x5chain)
    }
}

/// Options for chain and document validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// The time to use for validity period checks.
    /// If `None`, the current system time is used.
    pub validation_time: Option<OffsetDateTime>,
    /// Accept a chain whose root is self-signed but not a configured trust anchor.
    pub allow_self_signed_root: bool,
}

impl ValidationOptions {
    /// Get the validation time, defaulting to current time if not set.
    pub fn validation_time(&self) -> OffsetDateTime {
        self.validation_time.unwrap_or_else(OffsetDateTime::now_utc)
    }
}

/// Check that the issuer certificate signed the subject certificate.
pub fn issuer_signed_subject(subject: &Certificate, issuer: &Certificate) -> bool {
    let issuer_public_key = match public_key(issuer) {
        Ok(pk) => pk,
        Err(e) => {
            tracing::error!("failed to decode issuer public key: {e}");
            return false;
        }
    };

    let sig = match Signature::from_der(subject.signature.raw_bytes()) {
        Ok(sig) => sig,
        Err(e) => {
            tracing::error!("failed to parse subject signature: {e:?}");
            return false;
        }
    };

    let tbs = match subject.tbs_certificate.to_der() {
        Ok(tbs) => tbs,
        Err(e) => {
            tracing::error!("failed to encode subject tbs: {e:?}");
            return false;
        }
    };

    match issuer_public_key.verify(&tbs, &sig) {
        Ok(()) => true,
        Err(e) => {
            tracing::info!("subject certificate signature could not be validated: {e:?}");
            false
        }
    }
}

/// Check certificate validity period against a specific time.
pub fn valid_at(certificate: &Certificate, at: OffsetDateTime) -> bool {
    let validity = &certificate.tbs_certificate.validity;
    let not_after = OffsetDateTime::from(validity.not_after.to_system_time());
    let not_before = OffsetDateTime::from(validity.not_before.to_system_time());
    not_before <= at && at <= not_after
}

/// Check that a certificate is a CA allowed to sit above `intermediates_below` CA certificates.
pub fn may_issue(certificate: &Certificate, intermediates_below: usize) -> bool {
    let extension = certificate
        .tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|extension| extension.extn_id == BasicConstraints::OID);
    let Some(extension) = extension else {
        tracing::info!(
            "issuing certificate '{}' has no BasicConstraints extension",
            common_name_or_unknown(certificate)
        );
        return false;
    };
    let constraints = match BasicConstraints::from_der(extension.extn_value.as_bytes()) {
        Ok(constraints) => constraints,
        Err(e) => {
            tracing::error!("failed to decode BasicConstraints: {e}");
            return false;
        }
    };
    if !constraints.ca {
        tracing::info!(
            "issuing certificate '{}' is not a CA",
            common_name_or_unknown(certificate)
        );
        return false;
    }
    match constraints.path_len_constraint {
        Some(path_len) if usize::from(path_len) < intermediates_below => {
            tracing::info!(
                "certificate '{}' allows {path_len} intermediates, found {intermediates_below}",
                common_name_or_unknown(certificate)
            );
            false
        }
        _ => true,
    }
}

/// Validates a chain against a set of trust anchors (IACA root certificates).
///
/// Each certificate must be signed by the next one and be within its validity period. The last
/// certificate must be a trust anchor or be signed by one. Every issuing certificate, anchors
/// included, must be a CA whose path length admits the intermediates below it. Only when no trust
/// anchor is configured, a self-signed root (including a single self-signed certificate) is
/// accepted if [ValidationOptions::allow_self_signed_root] is set.
#[derive(Debug, Clone, Default)]
pub struct X5ChainValidator {
    trust_anchors: Vec<CertificateWithDer>,
    options: ValidationOptions,
}

impl X5ChainValidator {
    pub fn new(trust_anchors: Vec<CertificateWithDer>, options: ValidationOptions) -> Self {
        Self {
            trust_anchors,
            options,
        }
    }

    /// Accept self-signed roots with no trust anchors configured.
    pub fn self_signed() -> Self {
        Self {
            trust_anchors: Vec::new(),
            options: ValidationOptions {
                allow_self_signed_root: true,
                ..Default::default()
            },
        }
    }

    /// `below` counts the chain certificates under `root`.
    fn root_is_trusted(&self, root: &CertificateWithDer, below: usize) -> bool {
        if self
            .trust_anchors
            .iter()
            .any(|anchor| anchor.der() == root.der())
        {
            return true;
        }
        if let Some(anchor) = self
            .trust_anchors
            .iter()
            .find(|anchor| issuer_signed_subject(&root.inner, &anchor.inner))
        {
            return valid_at(&anchor.inner, self.options.validation_time())
                && may_issue(&anchor.inner, below);
        }
        self.trust_anchors.is_empty()
            && self.options.allow_self_signed_root
            && issuer_signed_subject(&root.inner, &root.inner)
    }
}

impl TrustChainValidator for X5ChainValidator {
    fn is_trust_chain_valid(&self, x5chain: &X5Chain) -> bool {
        let at = self.options.validation_time();
        let certificates: Vec<&CertificateWithDer> = x5chain.iter().collect();

        if let Some(expired) = certificates.iter().find(|c| !valid_at(&c.inner, at)) {
            tracing::info!(
                "certificate '{}' is outside its validity period",
                common_name_or_unknown(&expired.inner)
            );
            return false;
        }

        for pair in certificates.windows(2) {
            if !issuer_signed_subject(&pair[0].inner, &pair[1].inner) {
                tracing::info!(
                    "certificate '{}' was not issued by '{}'",
                    common_name_or_unknown(&pair[0].inner),
                    common_name_or_unknown(&pair[1].inner)
                );
                return false;
            }
        }

        let issuers_are_cas = certificates
            .iter()
            .enumerate()
            .skip(1)
            .all(|(position, issuer)| may_issue(&issuer.inner, position - 1));
        if !issuers_are_cas {
            return false;
        }

        let trusted = match certificates.split_last() {
            Some((root, below)) => self.root_is_trusted(root, below.len()),
            None => false,
        };
        if !trusted {
            tracing::info!(
                "certificate chain does not terminate in a trusted root: '{}'",
                x5chain.root_entity_common_name()
            );
        }
        trusted
    }
}
