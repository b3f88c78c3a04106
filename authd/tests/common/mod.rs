#![allow(dead_code)]

use async_trait::async_trait;
use authd::crypto::{Argon2Hasher, Argon2Params, StateCodec, TokenSigner};
use authd::models::{OAuthIdentity, OAuthProviderConfig};
use authd::oauth::{FederationError, OAuthFederation, Provider};
use authd::ports::{ClientRegistry, Clock};
use authd::services::{AuthService, AuthSettings, Repositories, SignUpInput};
use authd::store::MemoryStore;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const TENANT: &str = "acme";
pub const CLIENT_ID: &str = "portal";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const STATE_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

/// Clock the tests can move forward.
pub struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    pub fn new() -> Self {
        Self(Mutex::new(Utc::now()))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Federation stand-in: any code except `"rejected"` yields the identity
/// `uid-<code>` with email `<code>@example.com`.
pub struct StubFederation;

#[async_trait]
impl OAuthFederation for StubFederation {
    fn build_auth_url(
        &self,
        provider: Provider,
        cfg: &OAuthProviderConfig,
        state: &str,
    ) -> Result<String, FederationError> {
        Ok(format!(
            "https://idp.test/{}/authorize?client_id={}&state={}",
            provider, cfg.client_id, state
        ))
    }

    async fn exchange_code(
        &self,
        provider: Provider,
        _cfg: &OAuthProviderConfig,
        code: &str,
    ) -> Result<OAuthIdentity, FederationError> {
        if code == "rejected" {
            return Err(FederationError::Rejected("bad_verification_code".to_string()));
        }

        Ok(OAuthIdentity {
            tenant_slug: String::new(),
            provider: provider.as_str().to_string(),
            provider_user_id: format!("uid-{code}"),
            email: Some(format!("{code}@example.com")),
            username: None,
            attrs: serde_json::json!({ "name": code }),
        })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<TestClock>,
    pub service: AuthService,
    pub state_codec: StateCodec,
}

pub fn cheap_hasher() -> Argon2Hasher {
    Argon2Hasher::new(Argon2Params {
        time_cost: 1,
        memory_cost_kib: 1024,
        parallelism: 1,
        ..Argon2Params::default()
    })
    .unwrap()
}

pub async fn harness() -> Harness {
    let clock = Arc::new(TestClock::new());
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let tenant_id = store.ensure_tenant(TENANT).await.unwrap();

    let mut providers = HashMap::new();
    providers.insert(
        "github".to_string(),
        OAuthProviderConfig {
            client_id: "gh-client".to_string(),
            client_secret: "gh-secret".to_string(),
            redirect_url: "http://localhost:8080/v1/auth/oauth/github/callback".to_string(),
            scopes: vec![],
        },
    );
    store
        .upsert_oauth_client(
            tenant_id,
            CLIENT_ID,
            "Portal",
            &[REDIRECT_URI.to_string()],
            &providers,
        )
        .await
        .unwrap();

    let signer = TokenSigner::generate("http://localhost:8080", "authd").unwrap();
    let state_codec = StateCodec::new(STATE_KEY).unwrap();

    let service = AuthService::new(
        Repositories::from_store(store.clone()),
        cheap_hasher(),
        Arc::new(signer),
        AuthSettings::default(),
    )
    .with_oauth(state_codec.clone(), Arc::new(StubFederation))
    .with_clock(clock.clone());

    Harness {
        store,
        clock,
        service,
        state_codec,
    }
}

pub fn sign_up_input(username: &str, password: &str) -> SignUpInput {
    SignUpInput {
        tenant: TENANT.to_string(),
        email: None,
        username: Some(username.to_string()),
        password: password.to_string(),
        attrs: None,
        ip: "203.0.113.7".to_string(),
        user_agent: "integration-test".to_string(),
    }
}
