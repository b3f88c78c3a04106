//! Credential primitives: password hashing, access-token signing, refresh
//! token encoding and OAuth state sealing.

pub mod password;
pub mod refresh;
pub mod signer;
pub mod state;

pub use password::{Argon2Hasher, Argon2Params, HashError};
pub use refresh::{RefreshCodec, RefreshError, RefreshSecret};
pub use signer::{AccessClaims, AccessSubject, Jwk, Jwks, TokenError, TokenSigner};
pub use state::{StateCodec, StateError};
