use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::models::{TokenOutput, UserIdentity};

#[derive(Debug, Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(length(min = 1, message = "Tenant is required"))]
    pub tenant: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 1, max = 64, message = "Username must be 1-64 characters"))]
    pub username: Option<String>,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    /// Free-form profile attributes stored with the user.
    pub attrs: Option<Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(length(min = 1, message = "Tenant is required"))]
    pub tenant: String,

    /// Email or username.
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Body fallback when no `refresh_token` cookie is sent.
#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

impl From<TokenOutput> for TokenResponse {
    fn from(tokens: TokenOutput) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in_sec,
            token_type: tokens.token_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub user_id: Uuid,
    pub session: TokenResponse,
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub user: UserIdentity,
    pub session: TokenResponse,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub session: TokenResponse,
}

#[derive(Debug, Serialize)]
pub struct MeUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: MeUser,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OAuthStartQuery {
    #[validate(length(min = 1, message = "Tenant is required"))]
    pub tenant: String,

    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,

    #[validate(url(message = "redirect_uri must be an absolute URL"))]
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OAuthCallbackQuery {
    #[validate(length(min = 1, message = "Missing authorization code"))]
    pub code: String,

    #[validate(length(min = 1, message = "Missing state parameter"))]
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_accepts_username_only() {
        let req: SignUpRequest = serde_json::from_value(serde_json::json!({
            "tenant": "acme",
            "username": "alice",
            "password": "p@ss"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert!(req.email.is_none());
    }

    #[test]
    fn sign_up_rejects_bad_email() {
        let req: SignUpRequest = serde_json::from_value(serde_json::json!({
            "tenant": "acme",
            "email": "not-an-email",
            "password": "p@ss"
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn token_response_uses_wire_names() {
        let body = serde_json::to_value(TokenResponse::from(TokenOutput::bearer(
            "a".to_string(),
            "r".to_string(),
            900,
        )))
        .unwrap();
        assert_eq!(body["expires_in"], 900);
        assert_eq!(body["token_type"], "Bearer");
    }
}
