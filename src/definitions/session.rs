//! Session establishment and the encrypted envelope exchanged after device engagement.
//!
//! Both parties derive `SKReader` and `SKDevice` from an ECDH shared secret salted with the
//! hash of the [SessionTranscript]. Requests travel encrypted under `SKReader`, responses under
//! `SKDevice`, each with its own message counter.
use ciborium::Value;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cbor;
use crate::cose::{CoseKey, EReaderKey};
use crate::crypto::{Aes256GcmCipher, KeyAgreement, SymmetricCipher, KEY_LENGTH, NONCE_LENGTH};
use crate::definitions::device_engagement::DeviceEngagementBytes;
use crate::definitions::device_request::DeviceRequest;
use crate::definitions::device_response::DeviceResponse;
use crate::definitions::helpers::{ByteStr, Tag24};
use crate::definitions::traits::{FromCbor, ToCbor};
use crate::error::Error;
use crate::validated::Validated;

pub type EReaderKeyBytes = Tag24<EReaderKey>;
pub type SessionTranscriptBytes = Tag24<SessionTranscript>;

const READER_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0];
const DEVICE_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

/// Transport specific part of the [SessionTranscript].
#[derive(Clone, Debug, PartialEq)]
pub enum Handover {
    /// QR code engagement, encoded as `null`.
    Qr,
    /// NFC negotiated handover: the Handover Select message and, if any, the Handover Request.
    Nfc {
        handover_select: ByteStr,
        handover_request: Option<ByteStr>,
    },
    /// OpenID4VP presentation (ISO/IEC 18013-7 Annex B).
    OpenId4Vp {
        client_id_hash: ByteStr,
        response_uri_hash: ByteStr,
        nonce: String,
    },
}

impl Handover {
    /// Build the OpenID4VP handover, binding the verifier's client id and response uri to the
    /// wallet generated nonce.
    pub fn openid4vp(
        client_id: &str,
        response_uri: &str,
        nonce: &str,
        mdoc_generated_nonce: &str,
    ) -> Result<Self, Error> {
        let hash = |value: &str| -> Result<ByteStr, Error> {
            let bytes = cbor::to_vec(&Value::Array(vec![
                Value::Text(value.to_string()),
                Value::Text(mdoc_generated_nonce.to_string()),
            ]))?;
            Ok(Sha256::digest(bytes).to_vec().into())
        };
        Ok(Self::OpenId4Vp {
            client_id_hash: hash(client_id)?,
            response_uri_hash: hash(response_uri)?,
            nonce: nonce.to_string(),
        })
    }
}

impl FromCbor for Handover {
    fn from_cbor(value: &Value) -> Validated<Self> {
        if value.is_null() {
            return Ok(Self::Qr);
        }
        let array = cbor::as_array(value)?;
        let bytes = |index: usize| -> Result<ByteStr, Error> {
            Ok(cbor::get_byte_string(cbor::get_by_index(array, index)?)?
                .to_vec()
                .into())
        };
        match array.len() {
            2 => {
                let request = cbor::get_by_index(array, 1)?;
                let (handover_select, handover_request) = crate::accumulate!(
                    bytes(0),
                    if request.is_null() {
                        Ok(None)
                    } else {
                        bytes(1).map(Some)
                    },
                )?;
                Ok(Self::Nfc {
                    handover_select,
                    handover_request,
                })
            }
            3 => {
                let (client_id_hash, response_uri_hash, nonce) = crate::accumulate!(
                    bytes(0),
                    bytes(1),
                    cbor::get_by_index(array, 2)
                        .and_then(cbor::get_text)
                        .map(str::to_string),
                )?;
                Ok(Self::OpenId4Vp {
                    client_id_hash,
                    response_uri_hash,
                    nonce,
                })
            }
            _ => Err(Error::CborWrongType {
                expected: "null, NFC or OpenID4VP handover",
                cbor: cbor::diagnostic(value),
            }
            .into()),
        }
    }
}

impl ToCbor for Handover {
    fn to_cbor(&self) -> Value {
        match self {
            Self::Qr => Value::Null,
            Self::Nfc {
                handover_select,
                handover_request,
            } => Value::Array(vec![
                handover_select.to_cbor(),
                handover_request
                    .as_ref()
                    .map(ToCbor::to_cbor)
                    .unwrap_or(Value::Null),
            ]),
            Self::OpenId4Vp {
                client_id_hash,
                response_uri_hash,
                nonce,
            } => Value::Array(vec![
                client_id_hash.to_cbor(),
                response_uri_hash.to_cbor(),
                Value::Text(nonce.clone()),
            ]),
        }
    }
}

/// `[DeviceEngagementBytes, EReaderKeyBytes, Handover]`, with `null` for the parts a flow
/// does not have.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionTranscript {
    pub device_engagement_bytes: Option<DeviceEngagementBytes>,
    pub e_reader_key_bytes: Option<EReaderKeyBytes>,
    pub handover: Handover,
}

impl SessionTranscript {
    pub fn new(
        device_engagement_bytes: DeviceEngagementBytes,
        e_reader_key_bytes: EReaderKeyBytes,
        handover: Handover,
    ) -> Self {
        Self {
            device_engagement_bytes: Some(device_engagement_bytes),
            e_reader_key_bytes: Some(e_reader_key_bytes),
            handover,
        }
    }

    /// The encoded `SessionTranscriptBytes`, which salts the session key derivation.
    pub fn bytes(&self) -> Result<Vec<u8>, Error> {
        cbor::to_vec(&cbor::wrap_tag24(self.to_cbor_bytes()?))
    }
}

impl FromCbor for SessionTranscript {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let array = cbor::as_array(value)?;
        let optional = |index: usize| -> Result<Option<&Value>, Error> {
            let value = cbor::get_by_index(array, index)?;
            Ok((!value.is_null()).then_some(value))
        };
        let (device_engagement_bytes, e_reader_key_bytes, handover) = crate::accumulate!(
            optional(0)
                .map_err(Into::into)
                .and_then(|v| v.map(DeviceEngagementBytes::from_cbor).transpose()),
            optional(1)
                .map_err(Into::into)
                .and_then(|v| v.map(EReaderKeyBytes::from_cbor).transpose()),
            cbor::get_by_index(array, 2)
                .map_err(Into::into)
                .and_then(Handover::from_cbor),
        )?;
        Ok(Self {
            device_engagement_bytes,
            e_reader_key_bytes,
            handover,
        })
    }
}

impl ToCbor for SessionTranscript {
    fn to_cbor(&self) -> Value {
        Value::Array(vec![
            self.device_engagement_bytes
                .as_ref()
                .map(ToCbor::to_cbor)
                .unwrap_or(Value::Null),
            self.e_reader_key_bytes
                .as_ref()
                .map(ToCbor::to_cbor)
                .unwrap_or(Value::Null),
            self.handover.to_cbor(),
        ])
    }
}

/// The reader's first message: its ephemeral key and the encrypted device request.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionEstablishment {
    pub e_reader_key: EReaderKeyBytes,
    pub data: ByteStr,
}

impl FromCbor for SessionEstablishment {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let (e_reader_key, data) = crate::accumulate!(
            cbor::decode_field::<EReaderKeyBytes>(map, "eReaderKey"),
            cbor::decode_field::<ByteStr>(map, "data"),
        )?;
        Ok(Self { e_reader_key, data })
    }
}

impl ToCbor for SessionEstablishment {
    fn to_cbor(&self) -> Value {
        Value::Map(vec![
            (Value::Text("eReaderKey".into()), self.e_reader_key.to_cbor()),
            (Value::Text("data".into()), self.data.to_cbor()),
        ])
    }
}

/// Status codes carried by [SessionData].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    SessionEncryptionError = 10,
    CborDecodingError = 11,
    SessionTermination = 20,
}

impl TryFrom<u64> for SessionStatus {
    type Error = Error;

    fn try_from(status: u64) -> Result<Self, Error> {
        match status {
            10 => Ok(Self::SessionEncryptionError),
            11 => Ok(Self::CborDecodingError),
            20 => Ok(Self::SessionTermination),
            _ => Err(Error::CborWrongType {
                expected: "session status 10, 11 or 20",
                cbor: status.to_string(),
            }),
        }
    }
}

/// Any message after session establishment.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionData {
    pub data: Option<ByteStr>,
    pub status: Option<SessionStatus>,
}

impl SessionData {
    pub fn new(ciphertext: Vec<u8>) -> Self {
        Self {
            data: Some(ciphertext.into()),
            status: None,
        }
    }

    pub fn status(status: SessionStatus) -> Self {
        Self {
            data: None,
            status: Some(status),
        }
    }
}

impl FromCbor for SessionData {
    fn from_cbor(value: &Value) -> Validated<Self> {
        let map = cbor::as_map(value)?;
        let status = |value: &Value| -> Result<SessionStatus, Error> {
            SessionStatus::try_from(cbor::get_uint(value)?)
        };
        let (data, status) = crate::accumulate!(
            cbor::decode_opt_field::<ByteStr>(map, "data"),
            cbor::opt_field(map, &cbor::text("status"), status),
        )?;
        Ok(Self { data, status })
    }
}

impl ToCbor for SessionData {
    fn to_cbor(&self) -> Value {
        let mut map = Vec::new();
        if let Some(data) = &self.data {
            map.push((Value::Text("data".into()), data.to_cbor()));
        }
        if let Some(status) = self.status {
            map.push((
                Value::Text("status".into()),
                Value::Integer((status as u64).into()),
            ));
        }
        Value::Map(map)
    }
}

/// `SKReader` and `SKDevice`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    sk_reader: [u8; KEY_LENGTH],
    sk_device: [u8; KEY_LENGTH],
}

impl SessionKeys {
    /// Derive the session keys per ISO/IEC 18013-5 §9.1.1.5.
    ///
    /// `SK = HKDF-SHA256(ZAB, salt = SHA-256(SessionTranscriptBytes), info, 32)` with info
    /// `"SKReader"` or `"SKDevice"`.
    pub fn derive(
        own_key: &impl KeyAgreement,
        peer_key: &CoseKey,
        transcript: &SessionTranscript,
    ) -> Result<Self, Error> {
        let shared_secret = own_key.shared_secret(peer_key)?;
        let salt = Sha256::digest(transcript.bytes()?);
        let hkdf = Hkdf::<Sha256>::new(Some(salt.as_slice()), &shared_secret);

        let mut keys = Self {
            sk_reader: [0u8; KEY_LENGTH],
            sk_device: [0u8; KEY_LENGTH],
        };
        hkdf.expand(b"SKReader", &mut keys.sk_reader)
            .map_err(|e| Error::KeyAgreement(e.to_string()))?;
        hkdf.expand(b"SKDevice", &mut keys.sk_device)
            .map_err(|e| Error::KeyAgreement(e.to_string()))?;
        Ok(keys)
    }
}

/// A decrypted [SessionData] payload.
#[derive(Clone, Debug)]
pub enum SessionMessage {
    Request(DeviceRequest),
    Response(DeviceResponse),
}

/// Encrypts and decrypts the session messages of one engagement.
///
/// Both message directions keep a counter starting at 1; a counter only advances when a
/// message was encrypted or decrypted successfully. Once a counter cannot advance any further,
/// its direction refuses every message.
pub struct SessionEncryption<C: SymmetricCipher = Aes256GcmCipher> {
    keys: SessionKeys,
    cipher: C,
    reader_counter: u32,
    device_counter: u32,
}

fn next(counter: u32) -> Result<u32, Error> {
    counter.checked_add(1).ok_or(Error::CounterExhausted)
}

fn nonce(identifier: [u8; 8], counter: u32) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce[..8].copy_from_slice(&identifier);
    nonce[8..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

impl SessionEncryption<Aes256GcmCipher> {
    pub fn new(keys: SessionKeys) -> Self {
        Self::with_cipher(keys, Aes256GcmCipher)
    }
}

impl<C: SymmetricCipher> SessionEncryption<C> {
    pub fn with_cipher(keys: SessionKeys, cipher: C) -> Self {
        Self {
            keys,
            cipher,
            reader_counter: 1,
            device_counter: 1,
        }
    }

    pub fn encrypt_request(&mut self, request: &DeviceRequest) -> Result<Vec<u8>, Error> {
        let next_counter = next(self.reader_counter)?;
        let plaintext = request.to_cbor_bytes()?;
        let ciphertext = self.cipher.encrypt(
            &self.keys.sk_reader,
            &nonce(READER_IDENTIFIER, self.reader_counter),
            &plaintext,
            &[],
        )?;
        self.reader_counter = next_counter;
        Ok(ciphertext)
    }

    pub fn encrypt_response(&mut self, response: &DeviceResponse) -> Result<Vec<u8>, Error> {
        let next_counter = next(self.device_counter)?;
        let plaintext = response.to_cbor_bytes()?;
        let ciphertext = self.cipher.encrypt(
            &self.keys.sk_device,
            &nonce(DEVICE_IDENTIFIER, self.device_counter),
            &plaintext,
            &[],
        )?;
        self.device_counter = next_counter;
        Ok(ciphertext)
    }

    pub fn decrypt_request(&mut self, ciphertext: &[u8]) -> Validated<DeviceRequest> {
        let next_counter = next(self.reader_counter)?;
        let plaintext = self.cipher.decrypt(
            &self.keys.sk_reader,
            &nonce(READER_IDENTIFIER, self.reader_counter),
            ciphertext,
            &[],
        )?;
        self.reader_counter = next_counter;
        DeviceRequest::from_cbor_bytes(&plaintext)
    }

    pub fn decrypt_response(&mut self, ciphertext: &[u8]) -> Validated<DeviceResponse> {
        let next_counter = next(self.device_counter)?;
        let plaintext = self.cipher.decrypt(
            &self.keys.sk_device,
            &nonce(DEVICE_IDENTIFIER, self.device_counter),
            ciphertext,
            &[],
        )?;
        self.device_counter = next_counter;
        DeviceResponse::from_cbor_bytes(&plaintext)
    }

    /// Decrypt a [SessionData] whose payload may be either a request or a response.
    ///
    /// The payload is tried as a [DeviceRequest] first and as a [DeviceResponse] second.
    pub fn open(&mut self, session_data: &SessionData) -> Validated<SessionMessage> {
        let Some(ciphertext) = &session_data.data else {
            return Err(Error::SessionData.into());
        };
        match self.decrypt_request(ciphertext.as_ref()) {
            Ok(request) => return Ok(SessionMessage::Request(request)),
            Err(e) => tracing::debug!("session data is not a device request: {e}"),
        }
        match self.decrypt_response(ciphertext.as_ref()) {
            Ok(response) => Ok(SessionMessage::Response(response)),
            Err(e) => {
                tracing::debug!("session data is not a device response: {e}");
                Err(Error::SessionData.into())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::EphemeralKeyPair;
    use crate::definitions::device_response::Status;

    #[test]
    fn qr_transcript_encodes_nulls() {
        let transcript = SessionTranscript {
            device_engagement_bytes: None,
            e_reader_key_bytes: None,
            handover: Handover::Qr,
        };
        // [null, null, null]
        assert_eq!(
            transcript.to_cbor_bytes().unwrap(),
            hex_literal::hex!("83f6f6f6")
        );
        // 24(<< [null, null, null] >>)
        assert_eq!(transcript.bytes().unwrap(), hex_literal::hex!("d8184483f6f6f6"));
        assert_eq!(
            SessionTranscript::from_cbor(&transcript.to_cbor()).unwrap(),
            transcript
        );
    }

    #[test]
    fn handover_shapes() {
        let nfc = Handover::Nfc {
            handover_select: vec![1, 2, 3].into(),
            handover_request: None,
        };
        assert_eq!(Handover::from_cbor(&nfc.to_cbor()).unwrap(), nfc);

        let oid4vp = Handover::openid4vp("client", "https://verifier/response", "n", "m").unwrap();
        assert_eq!(Handover::from_cbor(&oid4vp.to_cbor()).unwrap(), oid4vp);
        assert!(Handover::from_cbor(&Value::Array(vec![Value::Null])).is_err());
    }

    #[test]
    fn session_data_status() {
        let data = SessionData::status(SessionStatus::SessionTermination);
        assert_eq!(data.to_cbor_bytes().unwrap(), hex_literal::hex!("a16673746174757314"));
        assert_eq!(SessionData::from_cbor(&data.to_cbor()).unwrap(), data);
        let unknown = Value::Map(vec![(Value::Text("status".into()), Value::Integer(3.into()))]);
        assert!(SessionData::from_cbor(&unknown).is_err());
    }

    #[test]
    fn nonce_layout() {
        assert_eq!(
            nonce(DEVICE_IDENTIFIER, 1),
            [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 1]
        );
        assert_eq!(
            nonce(READER_IDENTIFIER, 258),
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2]
        );
    }

    #[test]
    fn both_parties_derive_the_same_keys() {
        let device = EphemeralKeyPair::generate();
        let reader = EphemeralKeyPair::generate();
        let transcript = SessionTranscript {
            device_engagement_bytes: None,
            e_reader_key_bytes: Some(Tag24::new(reader.public_key().unwrap()).unwrap()),
            handover: Handover::Qr,
        };
        let reader_public = reader.public_key().unwrap();
        let device_public = device.public_key().unwrap();
        let device_keys = SessionKeys::derive(&device, &reader_public, &transcript).unwrap();
        let reader_keys = SessionKeys::derive(&reader, &device_public, &transcript).unwrap();
        assert_eq!(device_keys.sk_reader, reader_keys.sk_reader);
        assert_eq!(device_keys.sk_device, reader_keys.sk_device);
        assert_ne!(device_keys.sk_reader, device_keys.sk_device);
    }

    #[test]
    fn exhausted_counters_refuse_messages() {
        let mut session = SessionEncryption::new(SessionKeys {
            sk_reader: [1; KEY_LENGTH],
            sk_device: [2; KEY_LENGTH],
        });
        let response = DeviceResponse {
            version: DeviceResponse::VERSION.to_string(),
            documents: None,
            document_errors: None,
            status: Status::GeneralError,
        };
        session.device_counter = u32::MAX - 1;
        assert!(session.encrypt_response(&response).is_ok());
        assert_eq!(session.device_counter, u32::MAX);
        assert_eq!(
            session.encrypt_response(&response).unwrap_err(),
            Error::CounterExhausted
        );
        assert_eq!(session.device_counter, u32::MAX);

        session.reader_counter = u32::MAX;
        let errors = session.decrypt_request(&[0; 32]).unwrap_err();
        assert_eq!(errors.first(), Some(&Error::CounterExhausted));
    }
}
