use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use thiserror::Error;

use crate::models::OAuthState;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("state key must be 32 bytes (raw or base64)")]
    InvalidKey,

    #[error("invalid state")]
    Invalid,

    #[error("failed to seal state: {0}")]
    Seal(String),
}

/// Authenticated encryption of [`OAuthState`] into an opaque URL-safe token.
#[derive(Clone)]
pub struct StateCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateCodec(..)")
    }
}

impl StateCodec {
    /// Accepts base64 that decodes to 32 bytes. Input that is not base64 at
    /// all is used as raw bytes and must itself be 32 bytes long.
    pub fn new(secret: &str) -> Result<Self, StateError> {
        let key = match STANDARD.decode(secret) {
            Ok(decoded) => decoded,
            Err(_) => secret.as_bytes().to_vec(),
        };
        if key.len() != KEY_LEN {
            return Err(StateError::InvalidKey);
        }

        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| StateError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn encode(&self, state: &OAuthState) -> Result<String, StateError> {
        let plaintext = serde_json::to_vec(state).map_err(|e| StateError::Seal(e.to_string()))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| StateError::Seal(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(URL_SAFE.encode(blob))
    }

    pub fn decode(&self, token: &str) -> Result<OAuthState, StateError> {
        let blob = URL_SAFE.decode(token).map_err(|_| StateError::Invalid)?;
        if blob.len() < NONCE_LEN {
            return Err(StateError::Invalid);
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| StateError::Invalid)?;

        serde_json::from_slice(&plaintext).map_err(|_| StateError::Invalid)
    }
}
