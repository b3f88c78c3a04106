use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use super::context::{clear_session_cookies, refresh_token_from, set_session_cookies, RequestMeta};
use crate::{
    dtos::{
        MeResponse, MeUser, RefreshRequest, RefreshResponse, SignInRequest, SignInResponse,
        SignUpRequest, SignUpResponse,
    },
    middleware::AuthUser,
    models::TokenOutput,
    services::{RefreshInput, SignInInput, SignUpInput},
    utils::ValidatedJson,
    AppState,
};

fn with_session(state: &AppState, jar: CookieJar, tokens: &TokenOutput) -> CookieJar {
    set_session_cookies(
        jar,
        tokens,
        state.auth.settings().refresh_ttl.num_seconds(),
        state.config.security.cookie_secure,
    )
}

fn require_refresh_token(
    jar: &CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<String, AppError> {
    let from_body = body.and_then(|Json(req)| req.refresh_token);
    refresh_token_from(jar, from_body)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing refresh token")))
}

pub async fn sign_up(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SignUpRequest>,
) -> Result<(CookieJar, Json<SignUpResponse>), AppError> {
    let out = state
        .auth
        .sign_up(SignUpInput {
            tenant: req.tenant,
            email: req.email,
            username: req.username,
            password: req.password,
            attrs: req.attrs,
            ip: meta.ip,
            user_agent: meta.user_agent,
        })
        .await?;

    let jar = with_session(&state, jar, &out.tokens);
    Ok((
        jar,
        Json(SignUpResponse {
            user_id: out.user_id,
            session: out.tokens.into(),
        }),
    ))
}

pub async fn sign_in(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SignInRequest>,
) -> Result<(CookieJar, Json<SignInResponse>), AppError> {
    let out = state
        .auth
        .sign_in(SignInInput {
            tenant: req.tenant,
            identifier: req.identifier,
            password: req.password,
            ip: meta.ip,
            user_agent: meta.user_agent,
        })
        .await?;

    let jar = with_session(&state, jar, &out.tokens);
    Ok((
        jar,
        Json(SignInResponse {
            user: out.user,
            session: out.tokens.into(),
        }),
    ))
}

pub async fn refresh(
    State(state): State<AppState>,
    meta: RequestMeta,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, Json<RefreshResponse>), AppError> {
    let refresh_token = require_refresh_token(&jar, body)?;

    let tokens = state
        .auth
        .refresh_tokens(RefreshInput {
            refresh_token,
            user_agent: meta.user_agent,
            ip: meta.ip,
            tenant_id: None,
        })
        .await?;

    let jar = with_session(&state, jar, &tokens);
    Ok((
        jar,
        Json(RefreshResponse {
            session: tokens.into(),
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, StatusCode), AppError> {
    let refresh_token = require_refresh_token(&jar, body)?;
    state.auth.logout(&refresh_token).await?;

    let jar = clear_session_cookies(jar, state.config.security.cookie_secure);
    Ok((jar, StatusCode::NO_CONTENT))
}

pub async fn logout_all(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, StatusCode), AppError> {
    let refresh_token = require_refresh_token(&jar, body)?;
    state.auth.logout_all(&refresh_token).await?;

    let jar = clear_session_cookies(jar, state.config.security.cookie_secure);
    Ok((jar, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<MeResponse>, AppError> {
    let identity = state
        .auth
        .me(principal.tenant_id, principal.user_id)
        .await?;

    Ok(Json(MeResponse {
        user: MeUser {
            id: identity.user_id,
            tenant_id: principal.tenant_id,
            email: identity.email,
            username: identity.username,
        },
    }))
}
