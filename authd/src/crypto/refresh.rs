use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use uuid::Uuid;

use super::password::{Argon2Hasher, HashError};

const SECRET_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RefreshError {
    #[error("malformed refresh token")]
    Malformed,

    #[error("refresh secret mismatch")]
    Mismatch,
}

/// Raw refresh secret. Newtype so it never ends up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshSecret(Vec<u8>);

impl RefreshSecret {
    fn generate() -> Self {
        let mut bytes = vec![0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

impl std::fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshSecret(..)")
    }
}

/// Opaque refresh tokens of the form `b64url(session id) "." b64url(secret)`.
///
/// Only the Argon2id hash of the secret is stored; the session id locates the
/// row, the secret proves possession.
#[derive(Debug, Clone)]
pub struct RefreshCodec {
    hasher: Argon2Hasher,
}

impl RefreshCodec {
    pub fn new(hasher: Argon2Hasher) -> Self {
        Self { hasher }
    }

    /// Fresh secret and the hash to persist for it.
    pub fn generate(&self) -> Result<(RefreshSecret, String), HashError> {
        let secret = RefreshSecret::generate();
        let hash = self.hasher.hash(&secret.encoded())?;
        Ok((secret, hash))
    }

    pub fn verify(&self, secret_hash: &str, secret: &RefreshSecret) -> Result<(), RefreshError> {
        match self.hasher.verify(&secret.encoded(), secret_hash) {
            Ok(true) => Ok(()),
            _ => Err(RefreshError::Mismatch),
        }
    }

    pub fn encode(&self, session_id: Uuid, secret: &RefreshSecret) -> String {
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(session_id.as_bytes()),
            secret.encoded()
        )
    }

    pub fn parse(&self, token: &str) -> Result<(Uuid, RefreshSecret), RefreshError> {
        let mut parts = token.split('.');
        let (Some(id_part), Some(secret_part), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RefreshError::Malformed);
        };

        let id = URL_SAFE_NO_PAD
            .decode(id_part)
            .map_err(|_| RefreshError::Malformed)?;
        let id = Uuid::from_slice(&id).map_err(|_| RefreshError::Malformed)?;

        let secret = URL_SAFE_NO_PAD
            .decode(secret_part)
            .map_err(|_| RefreshError::Malformed)?;

        Ok((id, RefreshSecret(secret)))
    }
}
