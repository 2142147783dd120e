//! AEAD envelope for raw evidence snippets
//!
//! Raw leak content is never persisted in plaintext. Each snippet is sealed
//! with AES-GCM under a process-wide key loaded once at startup; a fresh
//! random nonce is drawn from the OS CSPRNG for every encryption call.
//! Reviewer-credential checks are the API layer's job, not this module's.

use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes
const TAG_LEN: usize = 16;

/// Errors from envelope operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Missing or malformed key material. Fatal at startup.
    #[error("crypto configuration error: {0}")]
    Configuration(String),

    /// Tag verification failed: wrong key, tampered ciphertext, or corruption.
    #[error("authentication failed: ciphertext or tag is invalid for this key")]
    Authentication,

    #[error("encryption failure")]
    Encrypt,
}

/// An encrypted snippet as persisted: ciphertext, nonce, and tag kept apart.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

enum Cipher {
    A128(Box<Aes128Gcm>),
    A192(Box<Aes192Gcm>),
    A256(Box<Aes256Gcm>),
}

/// Process-wide AEAD envelope. Construct once in the entrypoint and share.
pub struct Envelope {
    cipher: Cipher,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self.cipher {
            Cipher::A128(_) => "A128",
            Cipher::A192(_) => "A192",
            Cipher::A256(_) => "A256",
        };
        f.debug_struct("Envelope").field("cipher", &variant).finish()
    }
}

impl Envelope {
    /// Build an envelope from raw key bytes (16, 24, or 32).
    pub fn from_key(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = match key.len() {
            16 => Cipher::A128(Box::new(
                Aes128Gcm::new_from_slice(key)
                    .map_err(|e| CryptoError::Configuration(e.to_string()))?,
            )),
            24 => Cipher::A192(Box::new(
                Aes192Gcm::new_from_slice(key)
                    .map_err(|e| CryptoError::Configuration(e.to_string()))?,
            )),
            32 => Cipher::A256(Box::new(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|e| CryptoError::Configuration(e.to_string()))?,
            )),
            n => {
                return Err(CryptoError::Configuration(format!(
                    "encryption key must be 16, 24, or 32 bytes, got {}",
                    n
                )))
            }
        };
        Ok(Self { cipher })
    }

    /// Build an envelope from a base64-encoded key, as carried in config.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Configuration(format!("key is not valid base64: {}", e)))?;
        Self::from_key(&key)
    }

    /// Seal a plaintext snippet. Every call draws a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8], aad: Option<&[u8]>) -> Result<Sealed, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = Payload {
            msg: plaintext,
            aad: aad.unwrap_or(&[]),
        };

        let mut sealed = match &self.cipher {
            Cipher::A128(c) => c.encrypt(nonce, payload),
            Cipher::A192(c) => c.encrypt(nonce, payload),
            Cipher::A256(c) => c.encrypt(nonce, payload),
        }
        .map_err(|_| CryptoError::Encrypt)?;

        // AEAD output is ciphertext || tag; the schema keeps them apart
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok(Sealed {
            ciphertext: sealed,
            nonce: nonce_bytes.to_vec(),
            tag,
        })
    }

    /// Open a sealed snippet. Any mismatch surfaces as
    /// [`CryptoError::Authentication`], never as garbage plaintext.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(CryptoError::Authentication);
        }

        let mut buf = Vec::with_capacity(ciphertext.len() + tag.len());
        buf.extend_from_slice(ciphertext);
        buf.extend_from_slice(tag);

        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: &buf,
            aad: aad.unwrap_or(&[]),
        };

        match &self.cipher {
            Cipher::A128(c) => c.decrypt(nonce, payload),
            Cipher::A192(c) => c.decrypt(nonce, payload),
            Cipher::A256(c) => c.decrypt(nonce, payload),
        }
        .map_err(|_| CryptoError::Authentication)
    }
}
