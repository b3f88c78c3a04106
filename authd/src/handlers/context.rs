//! Per-request context shared by the auth handlers: caller address, user
//! agent and the session cookies.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::models::TokenOutput;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
const REFRESH_COOKIE_PATH: &str = "/v1/auth";

/// Caller metadata recorded on every session.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(RequestMeta {
            ip: client_ip(&parts.headers, peer),
            user_agent: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<String>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.unwrap_or_default()
}

/// Refresh token from the cookie, falling back to the request body.
pub fn refresh_token_from(jar: &CookieJar, body: Option<String>) -> Option<String> {
    let clean = |v: &str| v.trim().trim_matches(|c| c == '"' || c == '\'').to_string();

    jar.get(REFRESH_COOKIE)
        .map(|c| clean(c.value()))
        .filter(|v| !v.is_empty())
        .or_else(|| body.map(|v| clean(&v)).filter(|v| !v.is_empty()))
}

pub fn set_session_cookies(
    jar: CookieJar,
    tokens: &TokenOutput,
    refresh_ttl_seconds: i64,
    secure: bool,
) -> CookieJar {
    jar.add(
        Cookie::build((ACCESS_COOKIE, tokens.access_token.clone()))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(tokens.expires_in_sec)),
    )
    .add(
        Cookie::build((REFRESH_COOKIE, tokens.refresh_token.clone()))
            .path(REFRESH_COOKIE_PATH)
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Strict)
            .max_age(time::Duration::seconds(refresh_ttl_seconds)),
    )
}

/// Expires both session cookies, whether or not the request carried them.
pub fn clear_session_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(
        Cookie::build((ACCESS_COOKIE, ""))
            .path("/")
            .http_only(true)
            .secure(secure)
            .max_age(time::Duration::ZERO),
    )
    .add(
        Cookie::build((REFRESH_COOKIE, ""))
            .path(REFRESH_COOKIE_PATH)
            .http_only(true)
            .secure(secure)
            .max_age(time::Duration::ZERO),
    )
}
