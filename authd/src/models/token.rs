use serde::{Deserialize, Serialize};

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Token pair handed back to a client after sign-up, sign-in, refresh or an
/// OAuth callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenOutput {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_sec: i64,
    pub token_type: String,
}

impl TokenOutput {
    pub fn bearer(access_token: String, refresh_token: String, expires_in_sec: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_in_sec,
            token_type: TOKEN_TYPE_BEARER.to_string(),
        }
    }
}
