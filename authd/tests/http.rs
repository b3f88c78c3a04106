mod common;

use authd::config::{
    AuthConfig, Environment, JwtConfig, OAuthConfig, SecurityConfig, DEV_STATE_KEY,
};
use authd::crypto::Argon2Params;
use authd::{build_router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use common::*;
use secrecy::Secret;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_config() -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config { port: 8080 },
        environment: Environment::Dev,
        service_name: "authd".to_string(),
        log_level: "info".to_string(),
        otlp_endpoint: None,
        database: None,
        jwt: JwtConfig {
            issuer: "http://localhost:8080".to_string(),
            audience: "authd".to_string(),
            signing_key: None,
            access_token_ttl_seconds: 900,
            refresh_token_ttl_days: 30,
        },
        argon2: Argon2Params::default(),
        oauth: OAuthConfig {
            state_key: Secret::new(DEV_STATE_KEY.to_string()),
            state_ttl_seconds: 600,
            http_timeout_seconds: 10,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            cookie_secure: true,
            request_timeout_seconds: 30,
        },
    }
}

async fn app() -> Router {
    let h = harness().await;
    build_router(AppState {
        config: Arc::new(test_config()),
        auth: h.service,
        db: None,
    })
    .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn signup_body() -> Value {
    json!({ "tenant": TENANT, "username": "alice", "password": "p@ss" })
}

#[tokio::test]
async fn health_reports_memory_storage() {
    let response = app().await.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["storage"], "memory");
}

#[tokio::test]
async fn jwks_is_cacheable() {
    let response = app()
        .await
        .oneshot(get("/.well-known/jwks.json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=3600"
    );
    let body = body_json(response).await;
    assert_eq!(body["keys"][0]["use"], "sig");
}

#[tokio::test]
async fn signup_sets_session_cookies() {
    let response = app()
        .await
        .oneshot(post_json("/v1/auth/signup", signup_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    let access = cookies.iter().find(|c| c.starts_with("access_token=")).unwrap();
    assert!(access.contains("HttpOnly"));
    assert!(access.contains("SameSite=Lax"));
    assert!(access.contains("Path=/"));

    let refresh = cookies.iter().find(|c| c.starts_with("refresh_token=")).unwrap();
    assert!(refresh.contains("HttpOnly"));
    assert!(refresh.contains("SameSite=Strict"));
    assert!(refresh.contains("Path=/v1/auth"));
    assert!(refresh.contains("Secure"));

    let body = body_json(response).await;
    assert!(body["user_id"].is_string());
    assert_eq!(body["session"]["token_type"], "Bearer");
    assert_eq!(body["session"]["expires_in"], 900);
}

#[tokio::test]
async fn refresh_rotates_then_rejects_reuse() {
    let app = app().await;

    let response = app
        .clone()
        .oneshot(post_json("/v1/auth/signup", signup_body()))
        .await
        .unwrap();
    let body = body_json(response).await;
    let refresh_token = body["session"]["refresh_token"].as_str().unwrap().to_string();

    // First rotation through the cookie.
    let request = Request::builder()
        .method("POST")
        .uri("/v1/auth/refresh")
        .header(header::COOKIE, format!("refresh_token={refresh_token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Replaying the same token through the body.
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/auth/refresh",
            json!({ "refresh_token": refresh_token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn refresh_without_token_is_bad_request() {
    let response = app()
        .await
        .oneshot(post_json("/v1/auth/refresh", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn me_requires_a_valid_access_token() {
    let app = app().await;

    let response = app.clone().oneshot(get("/v1/auth/me")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(post_json("/v1/auth/signup", signup_body()))
        .await
        .unwrap();
    let body = body_json(response).await;
    let access = body["session"]["access_token"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri("/v1/auth/me")
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let me = body_json(response).await;
    assert_eq!(me["user"]["username"], "alice");
    assert_eq!(me["user"]["id"], body["user_id"]);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = app().await;
    app.clone()
        .oneshot(post_json("/v1/auth/signup", signup_body()))
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            "/v1/auth/signin",
            json!({ "tenant": TENANT, "identifier": "alice", "password": "nope" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Invalid credentials");
}

#[tokio::test]
async fn invalid_signup_body_is_unprocessable() {
    let response = app()
        .await
        .oneshot(post_json(
            "/v1/auth/signup",
            json!({ "tenant": TENANT, "email": "not-an-email", "password": "p@ss" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn logout_clears_cookies() {
    let app = app().await;
    let response = app
        .clone()
        .oneshot(post_json("/v1/auth/signup", signup_body()))
        .await
        .unwrap();
    let body = body_json(response).await;
    let refresh_token = body["session"]["refresh_token"].as_str().unwrap();

    let response = app
        .oneshot(post_json(
            "/v1/auth/logout",
            json!({ "refresh_token": refresh_token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
}

#[tokio::test]
async fn oauth_flow_redirects_to_provider_and_back() {
    let app = app().await;

    let start = format!(
        "/v1/auth/oauth/github/start?tenant={TENANT}&client_id={CLIENT_ID}&redirect_uri={}",
        url::form_urlencoded::byte_serialize(REDIRECT_URI.as_bytes()).collect::<String>()
    );
    let response = app.clone().oneshot(get(&start)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://idp.test/github/authorize"));
    let state = url::Url::parse(location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let callback = format!(
        "/v1/auth/oauth/github/callback?code=octocat&state={}",
        url::form_urlencoded::byte_serialize(state.as_bytes()).collect::<String>()
    );
    let response = app.oneshot(get(&callback)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], REDIRECT_URI);
    assert!(set_cookies(&response)
        .iter()
        .any(|c| c.starts_with("refresh_token=")));
}

#[tokio::test]
async fn oauth_callback_with_bad_state_is_rejected() {
    let response = app()
        .await
        .oneshot(get("/v1/auth/oauth/github/callback?code=octocat&state=garbage"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
