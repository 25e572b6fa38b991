//! This module is responsible for establishing a session with a device and verifying the
//! documents it presents.
//!
//! Issuer data authentication of a [Document] is a typestate pipeline:
//!
//! ```text
//! DocumentVerification<Unverified>
//!     --validate_certificate--> DocumentVerification<CertificateChainChecked>
//!     --validate_issuer_signature--> DocumentVerification<SignatureVerified>
//! ```
//!
//! A document can only be taken out of the pipeline once both steps succeeded.
use std::collections::BTreeMap;
use std::marker::PhantomData;

use coset::iana;
use uuid::Uuid;

use crate::cbor;
use crate::cose::VerificationResult;
use crate::crypto::{EphemeralKeyPair, KeyAgreement};
use crate::definitions::device_engagement::{DeviceEngagement, DeviceEngagementBytes};
use crate::definitions::device_request::DeviceRequest;
use crate::definitions::device_response::{DeviceResponse, Document};
use crate::definitions::device_signed::DeviceAuthentication;
use crate::definitions::helpers::Tag24;
use crate::definitions::identifiers::DocType;
use crate::definitions::session::{
    Handover, SessionData, SessionEncryption, SessionEstablishment, SessionKeys, SessionMessage,
    SessionTranscript,
};
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::definitions::x509::{TrustChainValidator, ValidationOptions};
use crate::error::Error;
use crate::mdoc::{Claims, Mdoc};
use crate::validated::{collect_all, Validated};

/// Claims of every verified document, per document type.
pub type VerifiedClaims = BTreeMap<DocType, Claims>;

/// Nothing checked yet.
#[derive(Debug)]
pub struct Unverified;
/// The document signer certificate chain ends in a trusted root.
#[derive(Debug)]
pub struct CertificateChainChecked;
/// The issuer signature over the mobile security object is valid.
#[derive(Debug)]
pub struct SignatureVerified;

#[derive(Debug)]
pub struct DocumentVerification<S> {
    document: Document,
    state: PhantomData<S>,
}

impl<S> DocumentVerification<S> {
    pub fn document(&self) -> &Document {
        &self.document
    }

    fn advance<T>(self) -> DocumentVerification<T> {
        DocumentVerification {
            document: self.document,
            state: PhantomData,
        }
    }
}

impl DocumentVerification<Unverified> {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            state: PhantomData,
        }
    }

    pub fn validate_certificate(
        self,
        validator: &impl TrustChainValidator,
    ) -> Result<DocumentVerification<CertificateChainChecked>, Error> {
        let x5chain = self.document.issuer_signed.issuer_auth.x5chain();
        if !validator.is_trust_chain_valid(x5chain) {
            tracing::info!(
                "untrusted document signer '{}'",
                x5chain.end_entity_common_name()
            );
            return Err(Error::TrustChainValidationFailed(format!(
                "no trusted root for '{}'",
                x5chain.end_entity_common_name()
            )));
        }
        Ok(self.advance())
    }
}

impl DocumentVerification<CertificateChainChecked> {
    pub fn validate_issuer_signature(
        self,
    ) -> Result<DocumentVerification<SignatureVerified>, Error> {
        match self.document.issuer_signed.issuer_auth.verify_signature() {
            VerificationResult::Success => Ok(self.advance()),
            VerificationResult::Failure(reason) | VerificationResult::Error(reason) => {
                tracing::info!("issuer signature verification failed: {reason}");
                Err(Error::InvalidIssuerSignature(reason))
            }
        }
    }
}

impl DocumentVerification<SignatureVerified> {
    pub fn into_document(self) -> Document {
        self.document
    }
}

/// Check that `document` was signed by a trusted issuer, returning it unchanged.
pub fn validate_issuer_data_authentication(
    document: Document,
    validator: &impl TrustChainValidator,
) -> Result<Document, Error> {
    Ok(DocumentVerification::new(document)
        .validate_certificate(validator)?
        .validate_issuer_signature()?
        .into_document())
}

/// Check the device signature of `document` against the device key in its mobile security
/// object.
pub fn device_authentication(
    document: &Document,
    session_transcript: &SessionTranscript,
) -> Result<(), Error> {
    let device_key = document
        .issuer_signed
        .issuer_auth
        .mso()
        .device_key_info
        .device_key
        .to_verifying_key()?;
    let device_signature = document.device_signed.device_auth.device_signature();
    device_signature
        .protected()
        .require_alg(iana::Algorithm::ES256)?;

    let payload = DeviceAuthentication::new(
        session_transcript.clone(),
        document.doc_type.clone(),
        document.device_signed.namespaces.clone(),
    )
    .bytes()?;
    let result = device_signature
        .verify(&device_key, Some(payload.as_slice()))
        .into_result(Error::InvalidDeviceSignature);
    if let Err(e) = &result {
        tracing::info!("device authentication failed: {e}");
    }
    result
}

fn verify_document(
    document: &Document,
    session_transcript: &SessionTranscript,
    validator: &impl TrustChainValidator,
    options: &ValidationOptions,
) -> Validated<(DocType, Claims)> {
    let document = validate_issuer_data_authentication(document.clone(), validator)?;
    let (mdoc, _, _) = crate::accumulate!(
        Mdoc::new(document.doc_type.clone(), document.issuer_signed.clone()),
        document
            .issuer_signed
            .issuer_auth
            .mso()
            .validity_info
            .check(options.validation_time()),
        device_authentication(&document, session_transcript),
    )?;
    Ok((document.doc_type, mdoc.claims()))
}

/// Verify every document of `response`: issuer data authentication, digests, validity window
/// and device authentication. Failures of all documents are reported together. A document type
/// may appear only once.
pub fn verify_response(
    response: &DeviceResponse,
    session_transcript: &SessionTranscript,
    validator: &impl TrustChainValidator,
    options: &ValidationOptions,
) -> Validated<VerifiedClaims> {
    if response.documents.is_none() {
        return Err(Error::NoDocuments(response.status as u64).into());
    }
    let verified = collect_all(
        response
            .documents()
            .map(|document| verify_document(document, session_transcript, validator, options)),
    )?;
    Ok(cbor::unique_keys(verified, "docType")?)
}

/// Reader side of a BLE session.
pub struct SessionManager {
    session_transcript: SessionTranscript,
    encryption: SessionEncryption,
}

impl SessionManager {
    /// Engage with the device shown in `qr_code` and encrypt `request` into a
    /// [SessionEstablishment].
    ///
    /// Returns the session, the encoded session establishment and the BLE Ident of the device.
    pub fn establish_session(
        qr_code: &str,
        request: &DeviceRequest,
    ) -> Validated<(Self, Vec<u8>, [u8; 16])> {
        let device_engagement = DeviceEngagementBytes::from_qr_code_uri(qr_code)?;
        let ble_ident = device_engagement.as_ref().ble_ident()?;

        let e_reader_key = EphemeralKeyPair::generate();
        let e_reader_key_bytes = Tag24::new(e_reader_key.public_key()?)?;
        let e_device_key = device_engagement.as_ref().e_device_key().clone();

        let session_transcript =
            SessionTranscript::new(device_engagement, e_reader_key_bytes.clone(), Handover::Qr);
        let keys = SessionKeys::derive(&e_reader_key, &e_device_key, &session_transcript)?;
        let mut encryption = SessionEncryption::new(keys);

        let session_establishment = SessionEstablishment {
            e_reader_key: e_reader_key_bytes,
            data: encryption.encrypt_request(request)?.into(),
        };
        let session = Self {
            session_transcript,
            encryption,
        };
        Ok((session, session_establishment.to_cbor_bytes()?, ble_ident))
    }

    pub fn session_transcript(&self) -> &SessionTranscript {
        &self.session_transcript
    }

    pub fn device_engagement(&self) -> Option<&DeviceEngagement> {
        self.session_transcript
            .device_engagement_bytes
            .as_ref()
            .map(|bytes| bytes.as_ref())
    }

    /// The UUID to connect to when the device acts as BLE central client.
    pub fn first_central_client_uuid(&self) -> Option<&Uuid> {
        self.device_engagement()
            .and_then(DeviceEngagement::ble_options)
            .and_then(|options| options.central_client_mode.as_ref())
            .map(|mode| &mode.uuid)
    }

    /// Encrypt a further request, returning the encoded [SessionData].
    pub fn new_request(&mut self, request: &DeviceRequest) -> Result<Vec<u8>, Error> {
        let ciphertext = self.encryption.encrypt_request(request)?;
        SessionData::new(ciphertext).to_cbor_bytes()
    }

    /// Decrypt the device's [SessionData] and verify the response it carries.
    pub fn handle_response(
        &mut self,
        session_data: &[u8],
        validator: &impl TrustChainValidator,
        options: &ValidationOptions,
    ) -> Validated<VerifiedClaims> {
        let session_data = SessionData::from_cbor_bytes(session_data)?;
        if let (None, Some(status)) = (&session_data.data, session_data.status) {
            tracing::info!("device sent status {status:?} without a response");
            return Err(Error::SessionData.into());
        }
        match self.encryption.open(&session_data)? {
            SessionMessage::Response(response) => {
                verify_response(&response, &self.session_transcript, validator, options)
            }
            SessionMessage::Request(_) => {
                tracing::warn!("device sent a device request");
                Err(Error::SessionData.into())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use p256::ecdsa::SigningKey;

    use super::*;
    use crate::crypto::InMemoryKeyStore;
    use crate::definitions::device_request::RequestedElements;
    use crate::definitions::helpers::NonEmptyVec;
    use crate::definitions::x509::X5ChainValidator;
    use crate::mdoc::test::{issue, NAMESPACE};
    use crate::presentation::device::AuthenticatedMdoc;

    fn transcript(nonce: &str) -> SessionTranscript {
        SessionTranscript {
            device_engagement_bytes: None,
            e_reader_key_bytes: None,
            handover: Handover::openid4vp("client", "https://verifier/response", nonce, "mdoc")
                .unwrap(),
        }
    }

    fn document(session_transcript: &SessionTranscript) -> Document {
        let device_key = SigningKey::random(&mut rand::thread_rng());
        let mdoc = issue(&device_key);
        let mut key_store = InMemoryKeyStore::new();
        key_store.insert("device", device_key);
        let requested: RequestedElements = [(
            NAMESPACE.parse().unwrap(),
            vec!["family_name".parse().unwrap()],
        )]
        .into_iter()
        .collect();
        AuthenticatedMdoc::sign(&mdoc, &requested, session_transcript, &key_store, "device")
            .unwrap()
            .into_document(None)
    }

    #[test]
    fn untrusted_chains_stop_the_pipeline() {
        let session_transcript = transcript("n");
        let validator = |_: &crate::definitions::x509::X5Chain| false;
        let error = validate_issuer_data_authentication(document(&session_transcript), &validator)
            .unwrap_err();
        assert!(matches!(error, Error::TrustChainValidationFailed(_)));
    }

    #[test]
    fn device_signature_is_bound_to_the_transcript() {
        let session_transcript = transcript("n");
        let document = document(&session_transcript);
        assert!(device_authentication(&document, &session_transcript).is_ok());
        assert!(matches!(
            device_authentication(&document, &transcript("other")),
            Err(Error::InvalidDeviceSignature(_))
        ));
    }

    #[test]
    fn verify_response_returns_the_disclosed_claims() {
        let session_transcript = transcript("n");
        let response = DeviceResponse::build_device_response(document(&session_transcript));
        // The test IACA is not configured, accept the document signer's chain as presented.
        let validator = |_: &crate::definitions::x509::X5Chain| true;
        let claims = verify_response(
            &response,
            &session_transcript,
            &validator,
            &ValidationOptions::default(),
        )
        .unwrap();
        let disclosed = &claims["org.iso.18013.5.1.mDL"][NAMESPACE];
        assert_eq!(disclosed.len(), 1);
        assert_eq!(disclosed["family_name"].as_text(), Some("Doe"));
    }

    #[test]
    fn repeated_document_types_are_rejected() {
        let session_transcript = transcript("n");
        let document = document(&session_transcript);
        let response = DeviceResponse {
            version: DeviceResponse::VERSION.to_string(),
            documents: Some(NonEmptyVec::try_from(vec![document.clone(), document]).unwrap()),
            document_errors: None,
            status: crate::definitions::device_response::Status::OK,
        };
        let validator = |_: &crate::definitions::x509::X5Chain| true;
        let errors = verify_response(
            &response,
            &session_transcript,
            &validator,
            &ValidationOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            errors.into_vec(),
            vec![Error::DuplicateKey {
                context: "docType",
                key: "org.iso.18013.5.1.mDL".to_string()
            }]
        );
    }

    #[test]
    fn responses_without_documents_are_rejected() {
        let response = DeviceResponse {
            version: DeviceResponse::VERSION.to_string(),
            documents: None,
            document_errors: None,
            status: crate::definitions::device_response::Status::GeneralError,
        };
        let errors = verify_response(
            &response,
            &transcript("n"),
            &X5ChainValidator::self_signed(),
            &ValidationOptions::default(),
        )
        .unwrap_err();
        assert_eq!(errors.into_vec(), vec![Error::NoDocuments(10)]);
    }
}
