use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Per-provider credentials a client registered with an upstream identity
/// provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// A relying application allowed to start OAuth logins for a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub providers: HashMap<String, OAuthProviderConfig>,
}

impl OAuthClient {
    /// Exact-match check against the registered redirect URIs.
    pub fn allows_redirect(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    pub fn provider(&self, name: &str) -> Option<&OAuthProviderConfig> {
        self.providers.get(name)
    }
}

/// Request context bound into the encrypted `state` parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthState {
    pub tenant_id: Uuid,
    pub tenant_slug: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

/// Provider profile normalized across providers.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthIdentity {
    pub tenant_slug: String,
    pub provider: String,
    pub provider_user_id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub attrs: Value,
}
