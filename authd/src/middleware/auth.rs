use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::handlers::context::ACCESS_COOKIE;
use crate::services::{AuthError, Principal};
use crate::AppState;

/// Authenticated caller, taken from a bearer token or the `access_token`
/// cookie.
pub struct AuthUser(pub Principal);

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = match bearer_token(parts) {
            Some(token) => token,
            None => CookieJar::from_headers(&parts.headers)
                .get(ACCESS_COOKIE)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
                })?,
        };

        let principal = state.auth.authenticate(&token).map_err(|e| match e {
            AuthError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
            }
            other => other.into(),
        })?;

        Ok(AuthUser(principal))
    }
}
