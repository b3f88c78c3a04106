use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version, ARGON2ID_IDENT,
};
use thiserror::Error;

const MIN_SALT_LEN: usize = 8;
/// The PHC encoding caps salts at 64 base64 characters.
const MAX_SALT_LEN: usize = 48;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),

    #[error("malformed password hash")]
    Malformed,

    #[error("failed to hash password: {0}")]
    Hashing(String),
}

/// Cost parameters for newly created hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    pub time_cost: u32,
    pub memory_cost_kib: u32,
    pub parallelism: u32,
    pub salt_len: usize,
    pub output_len: usize,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_cost_kib: 64 * 1024,
            parallelism: 2,
            salt_len: 16,
            output_len: 32,
        }
    }
}

impl Argon2Params {
    fn to_params(self) -> Result<Params, HashError> {
        if self.salt_len < MIN_SALT_LEN || self.salt_len > MAX_SALT_LEN {
            return Err(HashError::InvalidParams(format!(
                "salt length must be between {} and {} bytes",
                MIN_SALT_LEN, MAX_SALT_LEN
            )));
        }

        Params::new(
            self.memory_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(self.output_len),
        )
        .map_err(|e| HashError::InvalidParams(e.to_string()))
    }
}

/// Argon2id password hasher producing PHC strings.
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Argon2Params,
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2Hasher")
            .field("params", &self.params)
            .finish()
    }
}

impl Argon2Hasher {
    pub fn new(params: Argon2Params) -> Result<Self, HashError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_params()?);
        Ok(Self { params, argon2 })
    }

    pub fn params(&self) -> Argon2Params {
        self.params
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, HashError> {
        let mut salt = vec![0u8; self.params.salt_len];
        OsRng.fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt).map_err(|e| HashError::Hashing(e.to_string()))?;

        let hash = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| HashError::Hashing(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verifies `plaintext` against `encoded` using the parameters embedded
    /// in `encoded`. Anything that is not a well-formed argon2id hash is an
    /// error, never a match.
    pub fn verify(&self, plaintext: &str, encoded: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(encoded).map_err(|_| HashError::Malformed)?;
        if parsed.algorithm != ARGON2ID_IDENT {
            return Err(HashError::Malformed);
        }

        match self.argon2.verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(_) => Err(HashError::Malformed),
        }
    }

    /// True when `encoded` was not produced with the current parameters.
    pub fn needs_rehash(&self, encoded: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(encoded) else {
            return true;
        };
        if parsed.algorithm != ARGON2ID_IDENT || parsed.version != Some(Version::V0x13.into()) {
            return true;
        }

        let Ok(embedded) = Params::try_from(&parsed) else {
            return true;
        };
        if embedded.m_cost() != self.params.memory_cost_kib
            || embedded.t_cost() != self.params.time_cost
            || embedded.p_cost() != self.params.parallelism
        {
            return true;
        }

        let output_len = parsed.hash.map(|h| h.len());
        if output_len != Some(self.params.output_len) {
            return true;
        }

        let mut buf = [0u8; 64];
        let salt_len = parsed
            .salt
            .and_then(|s| s.decode_b64(&mut buf).ok().map(|b| b.len()));
        salt_len != Some(self.params.salt_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_params() -> Argon2Params {
        Argon2Params {
            time_cost: 1,
            memory_cost_kib: 1024,
            parallelism: 1,
            salt_len: 16,
            output_len: 32,
        }
    }

    #[test]
    fn hash_then_verify() {
        let hasher = Argon2Hasher::new(cheap_params()).unwrap();
        let hash = hasher.hash("p@ss").unwrap();

        assert!(hash.starts_with("$argon2id$v=19$m=1024,t=1,p=1$"));
        assert!(hasher.verify("p@ss", &hash).unwrap());
        assert!(!hasher.verify("wrong", &hash).unwrap());
    }

    #[test]
    fn salts_are_unique_per_hash() {
        let hasher = Argon2Hasher::new(cheap_params()).unwrap();
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn verify_uses_embedded_parameters() {
        let old = Argon2Hasher::new(cheap_params()).unwrap();
        let hash = old.hash("p@ss").unwrap();

        let new = Argon2Hasher::new(Argon2Params {
            time_cost: 2,
            ..cheap_params()
        })
        .unwrap();
        assert!(new.verify("p@ss", &hash).unwrap());
        assert!(new.needs_rehash(&hash));
    }

    #[test]
    fn malformed_hash_fails_closed() {
        let hasher = Argon2Hasher::new(cheap_params()).unwrap();

        assert!(hasher.verify("p@ss", "not-a-hash").is_err());
        assert!(hasher.verify("p@ss", "").is_err());
        assert!(hasher.needs_rehash("not-a-hash"));
    }

    #[test]
    fn other_algorithms_are_rejected() {
        let hasher = Argon2Hasher::new(cheap_params()).unwrap();
        let argon2i = Argon2::new(
            Algorithm::Argon2i,
            Version::V0x13,
            cheap_params().to_params().unwrap(),
        );
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2i.hash_password(b"p@ss", &salt).unwrap().to_string();

        assert!(hasher.verify("p@ss", &hash).is_err());
        assert!(hasher.needs_rehash(&hash));
    }

    #[test]
    fn current_hash_does_not_need_rehash() {
        let hasher = Argon2Hasher::new(cheap_params()).unwrap();
        let hash = hasher.hash("p@ss").unwrap();
        assert!(!hasher.needs_rehash(&hash));

        let longer_salt = Argon2Hasher::new(Argon2Params {
            salt_len: 24,
            ..cheap_params()
        })
        .unwrap();
        assert!(longer_salt.needs_rehash(&hash));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(Argon2Hasher::new(Argon2Params {
            time_cost: 0,
            ..cheap_params()
        })
        .is_err());
        assert!(Argon2Hasher::new(Argon2Params {
            salt_len: 4,
            ..cheap_params()
        })
        .is_err());
        assert!(Argon2Hasher::new(Argon2Params {
            output_len: 2,
            ..cheap_params()
        })
        .is_err());
    }
}
