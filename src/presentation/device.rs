//! This module is responsible for the device's interaction with the reader.
//!
//! Presenting a document takes two steps: the stored [Mdoc] is reduced to the requested
//! elements, then the device signs the [DeviceAuthentication] structure binding the disclosed
//! document to the session transcript. Signing can happen in-process through a [KeyStore] or
//! remotely through [AuthenticatedMdoc::prepare] and [PreparedAuthentication::complete].
//!
//! For BLE engagement the device goes through three states:
//!
//! ```text
//! SessionManagerInit --qr_engagement--> SessionManagerEngaged
//!     --process_session_establishment--> SessionManager --respond--> SessionData
//! ```
use coset::iana;

use crate::cose::{CoseSign1, PreparedCoseSign1, ProtectedHeaders, UnprotectedHeaders};
use crate::crypto::{EphemeralKeyPair, KeyAgreement, KeyStore};
use crate::definitions::device_engagement::{
    BleOptions, DeviceEngagement, DeviceEngagementBytes, DeviceRetrievalMethod,
};
use crate::definitions::device_request::{DeviceRequest, RequestedElements};
use crate::definitions::device_response::{
    DeviceResponse, Document, DocumentErrorCode, ElementErrors,
};
use crate::definitions::device_signed::{
    DeviceAuth, DeviceAuthentication, DeviceNameSpaces, DeviceNameSpacesBytes, DeviceSigned,
};
use crate::definitions::helpers::{NonEmptyVec, Tag24};
use crate::definitions::session::{
    Handover, SessionData, SessionEncryption, SessionEstablishment, SessionKeys, SessionMessage,
    SessionStatus, SessionTranscript,
};
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::mdoc::Mdoc;
use crate::validated::Validated;

/// A disclosed mdoc together with the device's proof of possession.
#[derive(Clone, Debug)]
pub struct AuthenticatedMdoc {
    mdoc: Mdoc,
    device_signed: DeviceSigned,
}

/// A disclosed mdoc waiting for the device signature.
#[derive(Clone, Debug)]
pub struct PreparedAuthentication {
    mdoc: Mdoc,
    namespaces: DeviceNameSpacesBytes,
    prepared_sig: PreparedCoseSign1,
}

impl AuthenticatedMdoc {
    /// Disclose `requested` from `mdoc` and prepare the device signature over the
    /// `DeviceAuthenticationBytes`.
    pub fn prepare(
        mdoc: &Mdoc,
        requested: &RequestedElements,
        session_transcript: &SessionTranscript,
    ) -> Result<PreparedAuthentication, Error> {
        let mdoc = mdoc.selectively_disclose(requested);
        let namespaces = Tag24::new(DeviceNameSpaces::new())?;
        let device_authentication = DeviceAuthentication::new(
            session_transcript.clone(),
            mdoc.doc_type().clone(),
            namespaces.clone(),
        );
        let payload = device_authentication.bytes()?;
        let prepared_sig = CoseSign1::prepare(
            ProtectedHeaders::new(iana::Algorithm::ES256)?,
            UnprotectedHeaders::new(),
            None,
            Some(payload.as_slice()),
        )?;
        Ok(PreparedAuthentication {
            mdoc,
            namespaces,
            prepared_sig,
        })
    }

    /// Disclose and sign with the key `key_id` of `key_store`, which must be the device key
    /// bound into the mobile security object.
    pub fn sign(
        mdoc: &Mdoc,
        requested: &RequestedElements,
        session_transcript: &SessionTranscript,
        key_store: &impl KeyStore,
        key_id: &str,
    ) -> Result<Self, Error> {
        let device_key = mdoc.mso().device_key_info.device_key.to_public_key()?;
        if key_store.public_key(key_id)? != device_key {
            return Err(Error::DeviceKeyMismatch);
        }
        let prepared = Self::prepare(mdoc, requested, session_transcript)?;
        let signature = key_store.sign(key_id, prepared.signature_payload())?;
        prepared.complete(signature)
    }

    pub fn mdoc(&self) -> &Mdoc {
        &self.mdoc
    }

    pub fn device_signed(&self) -> &DeviceSigned {
        &self.device_signed
    }

    pub fn into_document(self, errors: Option<ElementErrors>) -> Document {
        Document::new(
            self.mdoc.doc_type().clone(),
            self.mdoc.issuer_signed().clone(),
            self.device_signed,
            errors,
        )
    }
}

impl PreparedAuthentication {
    /// Retrieve the payload for a remote signature.
    pub fn signature_payload(&self) -> &[u8] {
        self.prepared_sig.signature_payload()
    }

    /// Supply the raw `r‖s` device signature.
    pub fn complete(self, signature: Vec<u8>) -> Result<AuthenticatedMdoc, Error> {
        Ok(AuthenticatedMdoc {
            mdoc: self.mdoc,
            device_signed: DeviceSigned {
                namespaces: self.namespaces,
                device_auth: DeviceAuth::DeviceSignature(self.prepared_sig.finalize(signature)?),
            },
        })
    }
}

/// Answer `request` with the elements of `mdoc` it asks for.
///
/// Requested elements the mdoc does not hold are reported in the document errors.
pub fn respond(
    mdoc: &Mdoc,
    request: &DeviceRequest,
    session_transcript: &SessionTranscript,
    key_store: &impl KeyStore,
    key_id: &str,
) -> Result<DeviceResponse, Error> {
    let items_request = request
        .items_request(mdoc.doc_type())
        .ok_or_else(|| Error::DocumentNotRequested(mdoc.doc_type().to_string()))?;
    let requested = items_request.requested_elements();

    let errors: ElementErrors = mdoc
        .missing_elements(&requested)
        .into_iter()
        .map(|(namespace, identifiers)| {
            let codes = identifiers
                .into_iter()
                .map(|id| (id, DocumentErrorCode::DataNotReturned))
                .collect();
            (namespace, codes)
        })
        .collect();
    if !errors.is_empty() {
        tracing::info!(
            "{} requested namespaces hold elements missing from the mdoc",
            errors.len()
        );
    }

    let authenticated =
        AuthenticatedMdoc::sign(mdoc, &requested, session_transcript, key_store, key_id)?;
    let document = authenticated.into_document((!errors.is_empty()).then_some(errors));
    Ok(DeviceResponse::build_device_response(document))
}

/// Initialisation state: the ephemeral device key and the device engagement.
pub struct SessionManagerInit {
    e_device_key: EphemeralKeyPair,
    device_engagement: DeviceEngagementBytes,
}

/// Engagement shown to the reader, waiting for the session establishment.
pub struct SessionManagerEngaged {
    e_device_key: EphemeralKeyPair,
    device_engagement: DeviceEngagementBytes,
    handover: Handover,
}

/// Established session.
pub struct SessionManager {
    session_transcript: SessionTranscript,
    encryption: SessionEncryption,
}

impl SessionManagerInit {
    /// Generate the ephemeral device key and the device engagement offering `ble_options`.
    pub fn initialise(ble_options: BleOptions) -> Result<Self, Error> {
        let e_device_key = EphemeralKeyPair::generate();
        let device_engagement = DeviceEngagement::new(
            e_device_key.public_key()?,
            NonEmptyVec::new(DeviceRetrievalMethod::BLE(ble_options)),
        )?;
        Ok(Self {
            e_device_key,
            device_engagement: Tag24::new(device_engagement)?,
        })
    }

    pub fn ble_ident(&self) -> Result<[u8; 16], Error> {
        self.device_engagement.as_ref().ble_ident()
    }

    /// Begins the device engagement using a QR code, returning the `mdoc:` URI to display.
    pub fn qr_engagement(self) -> (SessionManagerEngaged, String) {
        let qr_code_uri = self.device_engagement.to_qr_code_uri();
        let engaged = SessionManagerEngaged {
            e_device_key: self.e_device_key,
            device_engagement: self.device_engagement,
            handover: Handover::Qr,
        };
        (engaged, qr_code_uri)
    }
}

impl SessionManagerEngaged {
    /// Derive the session keys from the reader's ephemeral key and decrypt its first request.
    pub fn process_session_establishment(
        self,
        session_establishment: &[u8],
    ) -> Validated<(SessionManager, DeviceRequest)> {
        let session_establishment = SessionEstablishment::from_cbor_bytes(session_establishment)?;
        let session_transcript = SessionTranscript::new(
            self.device_engagement,
            session_establishment.e_reader_key.clone(),
            self.handover,
        );
        let keys = SessionKeys::derive(
            &self.e_device_key,
            session_establishment.e_reader_key.as_ref(),
            &session_transcript,
        )?;
        let mut encryption = SessionEncryption::new(keys);
        let request = encryption.decrypt_request(session_establishment.data.as_ref())?;
        Ok((
            SessionManager {
                session_transcript,
                encryption,
            },
            request,
        ))
    }
}

impl SessionManager {
    pub fn session_transcript(&self) -> &SessionTranscript {
        &self.session_transcript
    }

    /// Decrypt a further request from the reader.
    pub fn handle_request(&mut self, session_data: &[u8]) -> Validated<DeviceRequest> {
        let session_data = SessionData::from_cbor_bytes(session_data)?;
        match self.encryption.open(&session_data)? {
            SessionMessage::Request(request) => Ok(request),
            SessionMessage::Response(_) => {
                tracing::warn!("reader sent a device response");
                Err(Error::SessionData.into())
            }
        }
    }

    /// Answer `request` from `mdoc`, returning the encoded [SessionData].
    pub fn respond(
        &mut self,
        mdoc: &Mdoc,
        request: &DeviceRequest,
        key_store: &impl KeyStore,
        key_id: &str,
    ) -> Result<Vec<u8>, Error> {
        let response = respond(mdoc, request, &self.session_transcript, key_store, key_id)?;
        let ciphertext = self.encryption.encrypt_response(&response)?;
        SessionData::new(ciphertext).to_cbor_bytes()
    }

    /// The encoded [SessionData] ending the session.
    pub fn terminate(self) -> Result<Vec<u8>, Error> {
        SessionData::status(SessionStatus::SessionTermination).to_cbor_bytes()
    }
}

#[cfg(test)]
mod test {
    use p256::ecdsa::SigningKey;

    use super::*;
    use crate::crypto::InMemoryKeyStore;
    use crate::definitions::device_request::{DocRequest, ItemsRequest};
    use crate::mdoc::test::{issue, DOC_TYPE, NAMESPACE};

    fn transcript() -> SessionTranscript {
        SessionTranscript {
            device_engagement_bytes: None,
            e_reader_key_bytes: None,
            handover: Handover::Qr,
        }
    }

    fn request(doc_type: &str, elements: &[&str]) -> DeviceRequest {
        let requested: RequestedElements = [(
            NAMESPACE.parse().unwrap(),
            elements.iter().map(|id| id.parse().unwrap()).collect(),
        )]
        .into_iter()
        .collect();
        let items_request = ItemsRequest::new(doc_type.parse().unwrap(), &requested);
        DeviceRequest::new(NonEmptyVec::new(DocRequest::new(items_request).unwrap()))
    }

    #[test]
    fn respond_reports_missing_elements() {
        let device_key = SigningKey::random(&mut rand::thread_rng());
        let mdoc = issue(&device_key);
        let mut key_store = InMemoryKeyStore::new();
        key_store.insert("device", device_key);

        let response = respond(
            &mdoc,
            &request(DOC_TYPE, &["family_name", "portrait"]),
            &transcript(),
            &key_store,
            "device",
        )
        .unwrap();
        let document = response.documents().next().unwrap();
        let errors = document.errors.as_ref().unwrap();
        assert_eq!(errors[0].1[0].0.as_str(), "portrait");
        assert_eq!(errors[0].1[0].1, DocumentErrorCode::DataNotReturned);
        assert_eq!(response.documents().count(), 1);
    }

    #[test]
    fn respond_requires_a_request_for_the_doc_type() {
        let device_key = SigningKey::random(&mut rand::thread_rng());
        let mdoc = issue(&device_key);
        let mut key_store = InMemoryKeyStore::new();
        key_store.insert("device", device_key);
        assert_eq!(
            respond(
                &mdoc,
                &request("org.example.other", &["family_name"]),
                &transcript(),
                &key_store,
                "device",
            )
            .unwrap_err(),
            Error::DocumentNotRequested(DOC_TYPE.to_string())
        );
    }

    #[test]
    fn signing_requires_the_bound_device_key() {
        let mdoc = issue(&SigningKey::random(&mut rand::thread_rng()));
        let mut key_store = InMemoryKeyStore::new();
        key_store.insert("other", SigningKey::random(&mut rand::thread_rng()));
        let result = AuthenticatedMdoc::sign(
            &mdoc,
            &RequestedElements::new(),
            &transcript(),
            &key_store,
            "other",
        );
        assert_eq!(result.unwrap_err(), Error::DeviceKeyMismatch);
    }
}
