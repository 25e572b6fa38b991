//! Cryptographic capabilities consumed by the engine.
//!
//! Key storage, symmetric encryption and key agreement are reached through the traits in this
//! module so that wallets can back them with hardware or remote services. The default
//! implementations use the RustCrypto P-256 and AES-GCM crates.
use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::{Signature, SigningKey};
use p256::PublicKey;
use signature::Signer;
use zeroize::Zeroizing;

use crate::cose::CoseKey;
use crate::error::Error;

/// Length of an AES-256 key.
pub const KEY_LENGTH: usize = 32;
/// Length of an AES-GCM nonce.
pub const NONCE_LENGTH: usize = 12;

/// Holds private keys and signs with them.
pub trait KeyStore {
    /// Sign `bytes` with ES256, returning the raw `r‖s` signature.
    fn sign(&self, key_id: &str, bytes: &[u8]) -> Result<Vec<u8>, Error>;

    fn public_key(&self, key_id: &str) -> Result<PublicKey, Error>;
}

/// A [KeyStore] keeping P-256 signing keys in memory.
#[derive(Default)]
pub struct InMemoryKeyStore {
    keys: HashMap<String, SigningKey>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key_id: impl Into<String>, key: SigningKey) {
        self.keys.insert(key_id.into(), key);
    }

    fn key(&self, key_id: &str) -> Result<&SigningKey, Error> {
        self.keys
            .get(key_id)
            .ok_or_else(|| Error::UnknownKey(key_id.to_string()))
    }
}

impl KeyStore for InMemoryKeyStore {
    fn sign(&self, key_id: &str, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let signature: Signature = self
            .key(key_id)?
            .try_sign(bytes)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn public_key(&self, key_id: &str) -> Result<PublicKey, Error> {
        Ok(PublicKey::from(self.key(key_id)?.verifying_key()))
    }
}

/// Authenticated symmetric encryption.
pub trait SymmetricCipher {
    fn encrypt(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_LENGTH],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error>;

    /// Fails with [Error::Decryption] when the authentication tag does not match.
    fn decrypt(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_LENGTH],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmCipher;

impl SymmetricCipher for Aes256GcmCipher {
    fn encrypt(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_LENGTH],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| Error::Encryption(e.to_string()))?;
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| Error::Encryption(e.to_string()))
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_LENGTH],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Error::Decryption)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| Error::Decryption)
    }
}

/// Ephemeral ECDH used to derive session keys.
pub trait KeyAgreement {
    fn public_key(&self) -> Result<CoseKey, Error>;

    /// The shared secret `ZAB` with the peer's ephemeral key.
    fn shared_secret(&self, peer: &CoseKey) -> Result<Zeroizing<Vec<u8>>, Error>;
}

/// A P-256 ephemeral key pair, for either `EDeviceKey` or `EReaderKey`.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: EphemeralSecret::random(&mut rand::thread_rng()),
        }
    }
}

impl KeyAgreement for EphemeralKeyPair {
    fn public_key(&self) -> Result<CoseKey, Error> {
        CoseKey::try_from(&self.secret.public_key())
    }

    fn shared_secret(&self, peer: &CoseKey) -> Result<Zeroizing<Vec<u8>>, Error> {
        let peer = peer
            .to_public_key()
            .map_err(|e| Error::KeyAgreement(e.to_string()))?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}
