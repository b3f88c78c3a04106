//! OAuth2 federation entry points: redirect to the provider, then finish
//! the flow on its callback.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use super::context::{set_session_cookies, RequestMeta};
use crate::{
    dtos::{OAuthCallbackQuery, OAuthStartQuery},
    services::{OAuthCallbackInput, OAuthStartInput},
    utils::ValidatedQuery,
    AppState,
};

/// 302 with a `Location` header.
fn found(location: &str) -> Result<Response, AppError> {
    let value = header::HeaderValue::from_str(location)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Invalid redirect location: {}", e)))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, value)]).into_response())
}

pub async fn oauth_start(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    ValidatedQuery(query): ValidatedQuery<OAuthStartQuery>,
) -> Result<Response, AppError> {
    tracing::debug!(provider = %provider, tenant = %query.tenant, client_id = %query.client_id, "OAuth start requested");

    let url = state
        .auth
        .build_oauth_redirect_url(OAuthStartInput {
            provider,
            tenant: query.tenant,
            client_id: query.client_id,
            redirect_uri: query.redirect_uri,
        })
        .await?;

    found(&url)
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    meta: RequestMeta,
    jar: CookieJar,
    ValidatedQuery(query): ValidatedQuery<OAuthCallbackQuery>,
) -> Result<(CookieJar, Response), AppError> {
    let out = state
        .auth
        .handle_oauth_callback(OAuthCallbackInput {
            provider,
            code: query.code,
            state: query.state,
            ip: meta.ip,
            user_agent: meta.user_agent,
        })
        .await?;

    let jar = set_session_cookies(
        jar,
        &out.tokens,
        state.auth.settings().refresh_ttl.num_seconds(),
        state.config.security.cookie_secure,
    );
    Ok((jar, found(&out.redirect_uri)?))
}
