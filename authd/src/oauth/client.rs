use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::provider::{Provider, ProviderEndpoints};
use crate::models::{OAuthIdentity, OAuthProviderConfig};

const USER_AGENT: &str = concat!("authd/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum FederationError {
    #[error("invalid provider endpoint: {0}")]
    InvalidUrl(String),

    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned status {status}")]
    Status { status: u16 },

    #[error("provider rejected the exchange: {0}")]
    Rejected(String),

    #[error("provider response missing {0}")]
    MissingField(&'static str),
}

/// Authorization-code federation with upstream identity providers.
#[async_trait]
pub trait OAuthFederation: Send + Sync {
    fn build_auth_url(
        &self,
        provider: Provider,
        cfg: &OAuthProviderConfig,
        state: &str,
    ) -> Result<String, FederationError>;

    /// Swaps `code` for a provider access token and fetches the user profile.
    /// The returned identity has an empty `tenant_slug`; callers fill it in.
    async fn exchange_code(
        &self,
        provider: Provider,
        cfg: &OAuthProviderConfig,
        code: &str,
    ) -> Result<OAuthIdentity, FederationError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: Option<i64>,
    login: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

/// reqwest-backed [`OAuthFederation`] for Google and GitHub.
#[derive(Debug, Clone)]
pub struct FederationClient {
    http: reqwest::Client,
    google: ProviderEndpoints,
    github: ProviderEndpoints,
}

impl FederationClient {
    pub fn new(timeout: Duration) -> Result<Self, FederationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            google: Provider::Google.default_endpoints(),
            github: Provider::GitHub.default_endpoints(),
        })
    }

    pub fn with_endpoints(mut self, provider: Provider, endpoints: ProviderEndpoints) -> Self {
        match provider {
            Provider::Google => self.google = endpoints,
            Provider::GitHub => self.github = endpoints,
        }
        self
    }

    fn endpoints(&self, provider: Provider) -> &ProviderEndpoints {
        match provider {
            Provider::Google => &self.google,
            Provider::GitHub => &self.github,
        }
    }

    async fn exchange_google(
        &self,
        cfg: &OAuthProviderConfig,
        code: &str,
    ) -> Result<OAuthIdentity, FederationError> {
        let endpoints = self.endpoints(Provider::Google);

        let response = self
            .http
            .post(&endpoints.token)
            .header(ACCEPT, "application/json")
            .form(&[
                ("code", code),
                ("client_id", cfg.client_id.as_str()),
                ("client_secret", cfg.client_secret.as_str()),
                ("redirect_uri", cfg.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;
        let access_token = read_access_token(response).await?;

        let response = self
            .http
            .get(&endpoints.userinfo)
            .bearer_auth(&access_token)
            .send()
            .await?;
        let info: GoogleUserInfo = check_status(response)?.json().await?;

        let id = info
            .id
            .filter(|id| !id.is_empty())
            .ok_or(FederationError::MissingField("id"))?;

        Ok(OAuthIdentity {
            tenant_slug: String::new(),
            provider: Provider::Google.as_str().to_string(),
            provider_user_id: id,
            email: info.email,
            username: info.name,
            attrs: json!({ "picture": info.picture }),
        })
    }

    async fn exchange_github(
        &self,
        cfg: &OAuthProviderConfig,
        code: &str,
    ) -> Result<OAuthIdentity, FederationError> {
        let endpoints = self.endpoints(Provider::GitHub);

        let response = self
            .http
            .post(&endpoints.token)
            .header(ACCEPT, "application/json")
            .query(&[
                ("code", code),
                ("client_id", cfg.client_id.as_str()),
                ("client_secret", cfg.client_secret.as_str()),
                ("redirect_uri", cfg.redirect_url.as_str()),
            ])
            .send()
            .await?;
        let access_token = read_access_token(response).await?;

        let response = self
            .http
            .get(&endpoints.userinfo)
            .header(ACCEPT, "application/vnd.github+json")
            .bearer_auth(&access_token)
            .send()
            .await?;
        let user: GitHubUser = check_status(response)?.json().await?;

        let id = user.id.ok_or(FederationError::MissingField("id"))?;

        Ok(OAuthIdentity {
            tenant_slug: String::new(),
            provider: Provider::GitHub.as_str().to_string(),
            provider_user_id: id.to_string(),
            email: user.email,
            username: user.login,
            attrs: json!({ "avatar_url": user.avatar_url }),
        })
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FederationError> {
    let status = response.status();
    if !status.is_success() {
        tracing::warn!(status = %status, url = %response.url(), "OAuth provider returned an error status");
        return Err(FederationError::Status {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

async fn read_access_token(response: reqwest::Response) -> Result<String, FederationError> {
    let body: TokenResponse = check_status(response)?.json().await?;

    if let Some(error) = body.error.filter(|e| !e.is_empty()) {
        return Err(FederationError::Rejected(error));
    }

    body.access_token
        .filter(|t| !t.is_empty())
        .ok_or(FederationError::MissingField("access_token"))
}

#[async_trait]
impl OAuthFederation for FederationClient {
    fn build_auth_url(
        &self,
        provider: Provider,
        cfg: &OAuthProviderConfig,
        state: &str,
    ) -> Result<String, FederationError> {
        let scope = if cfg.scopes.is_empty() {
            provider.default_scope().to_string()
        } else {
            cfg.scopes.join(" ")
        };

        let mut params = vec![
            ("client_id", cfg.client_id.as_str()),
            ("redirect_uri", cfg.redirect_url.as_str()),
            ("scope", scope.as_str()),
            ("state", state),
        ];
        if provider == Provider::Google {
            params.push(("response_type", "code"));
            params.push(("access_type", "offline"));
            params.push(("prompt", "consent"));
        }

        let url = Url::parse_with_params(&self.endpoints(provider).authorize, &params)
            .map_err(|e| FederationError::InvalidUrl(e.to_string()))?;

        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        provider: Provider,
        cfg: &OAuthProviderConfig,
        code: &str,
    ) -> Result<OAuthIdentity, FederationError> {
        match provider {
            Provider::Google => self.exchange_google(cfg, code).await,
            Provider::GitHub => self.exchange_github(cfg, code).await,
        }
    }
}
