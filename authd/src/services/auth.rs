//! Credential engine: sign-up, sign-in, refresh rotation with reuse
//! detection, logout and OAuth federation.

use chrono::Duration;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use crate::crypto::{
    Argon2Hasher, HashError, Jwks, RefreshCodec, RefreshError, RefreshSecret, StateCodec,
    TokenSigner,
};
use crate::models::{
    NewUser, OAuthClient, OAuthState, RevocationReason, Session, TokenOutput, UserIdentity,
};
use crate::oauth::{OAuthFederation, Provider};
use crate::ports::{
    Clock, OAuthClientRepository, OAuthUserRepository, RepoError, SessionLedger, SystemClock,
    TenantRepository, UserRepository,
};

/// Scope granted to every access token.
pub const ACCESS_SCOPE: &str = "openid profile";

#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Oldest OAuth state accepted at the callback.
    pub state_ttl: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            state_ttl: Duration::minutes(10),
        }
    }
}

/// Storage collaborators of the engine.
#[derive(Clone)]
pub struct Repositories {
    pub tenants: Arc<dyn TenantRepository>,
    pub users: Arc<dyn UserRepository>,
    pub oauth_clients: Arc<dyn OAuthClientRepository>,
    pub oauth_users: Arc<dyn OAuthUserRepository>,
    pub sessions: Arc<dyn SessionLedger>,
}

impl Repositories {
    /// Uses one store for every repository.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: TenantRepository
            + UserRepository
            + OAuthClientRepository
            + OAuthUserRepository
            + SessionLedger
            + 'static,
    {
        Self {
            tenants: store.clone(),
            users: store.clone(),
            oauth_clients: store.clone(),
            oauth_users: store.clone(),
            sessions: store,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignUpInput {
    pub tenant: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: String,
    pub attrs: Option<Value>,
    pub ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct SignUpOutput {
    pub user_id: Uuid,
    pub tokens: TokenOutput,
}

#[derive(Debug, Clone)]
pub struct SignInInput {
    pub tenant: String,
    /// Email or username.
    pub identifier: String,
    pub password: String,
    pub ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct SignInOutput {
    pub user: UserIdentity,
    pub tokens: TokenOutput,
}

#[derive(Debug, Clone)]
pub struct RefreshInput {
    pub refresh_token: String,
    pub user_agent: String,
    pub ip: String,
    /// Skips the user lookup when the caller already knows the tenant.
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct OAuthStartInput {
    pub provider: String,
    pub tenant: String,
    pub client_id: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct OAuthCallbackInput {
    pub provider: String,
    pub code: String,
    pub state: String,
    pub ip: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct OAuthCallbackOutput {
    pub user: UserIdentity,
    pub tokens: TokenOutput,
    /// Taken from the sealed state; the only place the caller may be sent.
    pub redirect_uri: String,
}

/// Identity carried by a valid access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

#[derive(Clone)]
struct OAuthParts {
    state_codec: StateCodec,
    federation: Arc<dyn OAuthFederation>,
}

/// The credential engine. Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct AuthService {
    repos: Repositories,
    hasher: Argon2Hasher,
    refresh: RefreshCodec,
    signer: Arc<TokenSigner>,
    oauth: Option<OAuthParts>,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
    /// Verified against when the account does not exist, so unknown and
    /// known identifiers cost the same Argon2 work.
    decoy_hash: Option<Arc<str>>,
}

fn ledger_err(e: RepoError) -> AuthError {
    AuthError::Internal(anyhow::anyhow!("session ledger: {}", e))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AuthService {
    pub fn new(
        repos: Repositories,
        hasher: Argon2Hasher,
        signer: Arc<TokenSigner>,
        settings: AuthSettings,
    ) -> Self {
        let decoy_hash = match hasher.hash(&Uuid::new_v4().to_string()) {
            Ok(hash) => Some(Arc::from(hash)),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to prepare decoy password hash");
                None
            }
        };

        Self {
            repos,
            refresh: RefreshCodec::new(hasher.clone()),
            hasher,
            signer,
            oauth: None,
            clock: Arc::new(SystemClock),
            settings,
            decoy_hash,
        }
    }

    /// Enables the OAuth entry points.
    pub fn with_oauth(mut self, state_codec: StateCodec, federation: Arc<dyn OAuthFederation>) -> Self {
        self.oauth = Some(OAuthParts {
            state_codec,
            federation,
        });
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> AuthSettings {
        self.settings
    }

    // ==================== Password flows ====================

    pub async fn sign_up(&self, input: SignUpInput) -> Result<SignUpOutput, AuthError> {
        let tenant = input.tenant.trim();
        let email = non_empty(input.email);
        let username = non_empty(input.username);

        if tenant.is_empty() {
            return Err(AuthError::InvalidInput("tenant is required".to_string()));
        }
        if input.password.is_empty() {
            return Err(AuthError::InvalidInput("password is required".to_string()));
        }
        if email.is_none() && username.is_none() {
            return Err(AuthError::InvalidInput(
                "email or username is required".to_string(),
            ));
        }

        let tenant_id = self.resolve_tenant(tenant).await?;
        let password_hash = self.hash_password(input.password).await?;

        let user = self
            .repos
            .users
            .create_user(NewUser {
                tenant_id,
                email,
                username,
                password_hash,
                attrs: input.attrs,
            })
            .await?;

        tracing::info!(user_id = %user.id, tenant_id = %tenant_id, "User signed up");

        let tokens = self
            .start_session(user.id, tenant_id, None, input.user_agent, input.ip)
            .await?;

        Ok(SignUpOutput {
            user_id: user.id,
            tokens,
        })
    }

    pub async fn sign_in(&self, input: SignInInput) -> Result<SignInOutput, AuthError> {
        let tenant = input.tenant.trim();
        let identifier = input.identifier.trim();
        if tenant.is_empty() || identifier.is_empty() || input.password.is_empty() {
            return Err(AuthError::InvalidInput(
                "tenant, identifier and password are required".to_string(),
            ));
        }

        let tenant_id = self.resolve_tenant(tenant).await?;

        let user = match self
            .repos
            .users
            .get_user_by_identifier(tenant_id, identifier)
            .await
        {
            Ok(user) => user,
            Err(RepoError::NotFound) => {
                self.verify_decoy(input.password).await;
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                tracing::error!(tenant_id = %tenant_id, error = %e, "User lookup failed during sign-in");
                self.verify_decoy(input.password).await;
                return Err(AuthError::InvalidCredentials);
            }
        };

        let hasher = self.hasher.clone();
        let password = input.password.clone();
        let encoded = user.password_hash.clone();
        let verified = run_blocking(move || hasher.verify(&password, &encoded)).await?;
        if !matches!(verified, Ok(true)) {
            tracing::info!(user_id = %user.id, tenant_id = %tenant_id, "Sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        }

        if self.hasher.needs_rehash(&user.password_hash) {
            self.rehash_password(user.id, input.password).await;
        }

        tracing::info!(user_id = %user.id, tenant_id = %tenant_id, "User signed in");

        let tokens = self
            .start_session(user.id, tenant_id, None, input.user_agent, input.ip)
            .await?;

        Ok(SignInOutput {
            user: user.identity(),
            tokens,
        })
    }

    async fn verify_decoy(&self, password: String) {
        let Some(encoded) = self.decoy_hash.clone() else {
            return;
        };
        let hasher = self.hasher.clone();
        let _ = run_blocking(move || hasher.verify(&password, &encoded)).await;
    }

    /// Best effort: a failed upgrade never fails the sign-in.
    async fn rehash_password(&self, user_id: Uuid, password: String) {
        let upgraded = match self.hash_password(password).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Password rehash failed");
                return;
            }
        };

        if let Err(e) = self
            .repos
            .users
            .update_password_hash(user_id, &upgraded)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to persist rehashed password");
        } else {
            tracing::debug!(user_id = %user_id, "Password hash upgraded");
        }
    }

    // ==================== Refresh rotation ====================

    pub async fn refresh_tokens(&self, input: RefreshInput) -> Result<TokenOutput, AuthError> {
        let (session_id, secret) = self
            .refresh
            .parse(&input.refresh_token)
            .map_err(|_| AuthError::InvalidRefresh)?;

        let session = self
            .repos
            .sessions
            .find_by_id(session_id)
            .await
            .map_err(ledger_err)?
            .ok_or(AuthError::InvalidRefresh)?;

        // A rotated session is also revoked, so this must run before the
        // revoked/expired check.
        if self
            .repos
            .sessions
            .replaced_already(session.id)
            .await
            .map_err(ledger_err)?
        {
            tracing::warn!(
                session_id = %session.id,
                family_id = %session.family_id,
                user_id = %session.user_id,
                "Refresh token reuse detected"
            );
            self.revoke_family(&session, RevocationReason::ReuseDetected)
                .await?;
            return Err(AuthError::ReuseDetected);
        }

        let now = self.clock.now();
        if session.is_revoked() || session.is_expired_at(now) {
            return Err(AuthError::InvalidRefresh);
        }

        self.verify_refresh_secret(session.refresh_hash.clone(), secret)
            .await
            .map_err(|_| AuthError::InvalidRefresh)?;

        if let Err(e) = self.repos.sessions.update_last_used(session.id).await {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to update session last use");
        }

        let (child_secret, child_hash) = self.new_refresh_secret().await?;
        let child = session.child(
            child_hash,
            input.user_agent,
            input.ip,
            now,
            self.settings.refresh_ttl,
        );
        self.repos
            .sessions
            .create(&child)
            .await
            .map_err(ledger_err)?;

        match self.repos.sessions.mark_replaced(session.id, child.id).await {
            Ok(()) => {}
            Err(RepoError::Conflict) => {
                tracing::warn!(
                    session_id = %session.id,
                    family_id = %session.family_id,
                    "Concurrent rotation lost the race"
                );
                self.revoke_family(&session, RevocationReason::ReuseDetected)
                    .await?;
                return Err(AuthError::ReuseDetected);
            }
            Err(RepoError::NotFound) => return Err(AuthError::InvalidRefresh),
            Err(e) => return Err(ledger_err(e)),
        }

        let tenant_id = match input.tenant_id {
            Some(id) => id,
            None => self
                .repos
                .users
                .get_tenant_id_by_user(session.user_id)
                .await
                .map_err(|_| AuthError::InvalidRefresh)?,
        };

        tracing::info!(
            session_id = %child.id,
            parent_id = %session.id,
            family_id = %session.family_id,
            "Refresh token rotated"
        );

        let access = self.issue_access(session.user_id, tenant_id)?;
        Ok(TokenOutput::bearer(
            access,
            self.refresh.encode(child.id, &child_secret),
            self.settings.access_ttl.num_seconds(),
        ))
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let (session_id, _) = self
            .refresh
            .parse(refresh_token)
            .map_err(|_| AuthError::InvalidRefresh)?;

        self.repos
            .sessions
            .revoke(session_id, RevocationReason::UserLogout)
            .await
            .map_err(ledger_err)?;

        tracing::info!(session_id = %session_id, "Session logged out");
        Ok(())
    }

    pub async fn logout_all(&self, refresh_token: &str) -> Result<(), AuthError> {
        let (session_id, _) = self
            .refresh
            .parse(refresh_token)
            .map_err(|_| AuthError::InvalidRefresh)?;

        let session = self
            .repos
            .sessions
            .find_by_id(session_id)
            .await
            .map_err(ledger_err)?
            .ok_or(AuthError::InvalidRefresh)?;

        self.revoke_family(&session, RevocationReason::UserLogoutAll)
            .await
    }

    async fn revoke_family(
        &self,
        session: &Session,
        reason: RevocationReason,
    ) -> Result<(), AuthError> {
        self.repos
            .sessions
            .revoke_family(session.family_id, reason)
            .await
            .map_err(ledger_err)?;

        if reason == RevocationReason::ReuseDetected {
            tracing::warn!(family_id = %session.family_id, user_id = %session.user_id, reason = %reason, "Session family revoked");
        } else {
            tracing::info!(family_id = %session.family_id, user_id = %session.user_id, reason = %reason, "Session family revoked");
        }
        Ok(())
    }

    // ==================== Identity ====================

    pub async fn me(&self, tenant_id: Uuid, user_id: Uuid) -> Result<UserIdentity, AuthError> {
        let user = self.repos.users.get_user_by_id(tenant_id, user_id).await?;
        Ok(user.identity())
    }

    /// Validates a bearer access token.
    pub fn authenticate(&self, access_token: &str) -> Result<Principal, AuthError> {
        let subject = self
            .signer
            .parse_access(access_token)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let user_id = Uuid::parse_str(&subject.subject).map_err(|_| AuthError::InvalidCredentials)?;
        let tenant_id =
            Uuid::parse_str(&subject.tenant_id).map_err(|_| AuthError::InvalidCredentials)?;

        Ok(Principal { user_id, tenant_id })
    }

    pub fn jwks(&self) -> Jwks {
        self.signer.jwks()
    }

    // ==================== OAuth federation ====================

    pub async fn build_oauth_redirect_url(
        &self,
        input: OAuthStartInput,
    ) -> Result<String, AuthError> {
        let oauth = self.oauth.as_ref().ok_or(AuthError::OAuthNotConfigured)?;

        let tenant = input.tenant.trim();
        if tenant.is_empty() {
            return Err(AuthError::UnknownTenant);
        }
        let tenant_id = self.resolve_tenant(tenant).await?;

        let client = self.load_client(tenant_id, &input.client_id).await?;

        if !client.allows_redirect(&input.redirect_uri) {
            return Err(AuthError::InvalidRedirectUri);
        }

        let provider: Provider = input
            .provider
            .parse()
            .map_err(|_| AuthError::UnsupportedProvider)?;
        let provider_cfg = client
            .provider(provider.as_str())
            .ok_or(AuthError::UnsupportedProvider)?;

        let state = OAuthState {
            tenant_id,
            tenant_slug: tenant.to_string(),
            client_id: client.client_id.clone(),
            redirect_uri: input.redirect_uri,
            nonce: Uuid::new_v4().to_string(),
            issued_at: self.clock.now(),
        };
        let sealed = oauth
            .state_codec
            .encode(&state)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!(e)))?;

        let url = oauth
            .federation
            .build_auth_url(provider, provider_cfg, &sealed)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!(e)))?;

        tracing::debug!(tenant_id = %tenant_id, client_id = %client.client_id, provider = %provider, "OAuth flow started");
        Ok(url)
    }

    pub async fn handle_oauth_callback(
        &self,
        input: OAuthCallbackInput,
    ) -> Result<OAuthCallbackOutput, AuthError> {
        let oauth = self.oauth.as_ref().ok_or(AuthError::OAuthNotConfigured)?;

        let state = oauth
            .state_codec
            .decode(&input.state)
            .map_err(|_| AuthError::InvalidState)?;

        let age = self.clock.now() - state.issued_at;
        if age > self.settings.state_ttl || age < -self.settings.state_ttl {
            tracing::info!(tenant_id = %state.tenant_id, "Expired OAuth state presented");
            return Err(AuthError::InvalidState);
        }

        let client = self.load_client(state.tenant_id, &state.client_id).await?;

        let provider: Provider = input
            .provider
            .parse()
            .map_err(|_| AuthError::UnsupportedProvider)?;
        let provider_cfg = client
            .provider(provider.as_str())
            .ok_or(AuthError::UnsupportedProvider)?;

        let mut identity = oauth
            .federation
            .exchange_code(provider, provider_cfg, &input.code)
            .await
            .map_err(|e| {
                tracing::warn!(provider = %provider, error = %e, "OAuth code exchange failed");
                AuthError::Upstream(e.to_string())
            })?;
        identity.tenant_slug = state.tenant_slug.clone();

        let user = match self
            .repos
            .oauth_users
            .get_user_by_oauth(state.tenant_id, provider.as_str(), &identity.provider_user_id)
            .await
        {
            Ok(user) => user,
            Err(RepoError::NotFound) => {
                let user = self.repos.oauth_users.create_user_from_oauth(&identity).await?;
                tracing::info!(user_id = %user.id, tenant_id = %user.tenant_id, provider = %provider, "User created from OAuth identity");
                user
            }
            Err(e) => return Err(e.into()),
        };

        let tokens = self
            .start_session(
                user.id,
                user.tenant_id,
                Some(state.client_id),
                input.user_agent,
                input.ip,
            )
            .await?;

        tracing::info!(user_id = %user.id, tenant_id = %user.tenant_id, provider = %provider, "User signed in through OAuth");

        Ok(OAuthCallbackOutput {
            user: user.identity(),
            tokens,
            redirect_uri: state.redirect_uri,
        })
    }

    // ==================== Helpers ====================

    async fn resolve_tenant(&self, slug: &str) -> Result<Uuid, AuthError> {
        match self.repos.tenants.resolve_tenant_id(slug).await {
            Ok(id) => Ok(id),
            Err(RepoError::NotFound) => Err(AuthError::UnknownTenant),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_client(&self, tenant_id: Uuid, client_id: &str) -> Result<OAuthClient, AuthError> {
        match self
            .repos
            .oauth_clients
            .get_oauth_client(tenant_id, client_id)
            .await
        {
            Ok(client) => Ok(client),
            Err(RepoError::NotFound) => Err(AuthError::InvalidClient),
            Err(e) => {
                tracing::error!(tenant_id = %tenant_id, client_id = %client_id, error = %e, "OAuth client lookup failed");
                Err(e.into())
            }
        }
    }

    fn issue_access(&self, user_id: Uuid, tenant_id: Uuid) -> Result<String, AuthError> {
        self.signer
            .issue_access(
                &user_id.to_string(),
                &tenant_id.to_string(),
                ACCESS_SCOPE,
                &Uuid::new_v4().to_string(),
                self.settings.access_ttl,
            )
            .map_err(|e| AuthError::Internal(anyhow::anyhow!(e)))
    }

    /// Issues an access token and opens a new session family.
    async fn start_session(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        client_id: Option<String>,
        user_agent: String,
        ip: String,
    ) -> Result<TokenOutput, AuthError> {
        let access = self.issue_access(user_id, tenant_id)?;
        let (secret, hash) = self.new_refresh_secret().await?;

        let mut session = Session::new_family(
            user_id,
            hash,
            user_agent,
            ip,
            self.clock.now(),
            self.settings.refresh_ttl,
        );
        session.client_id = client_id;

        self.repos
            .sessions
            .create(&session)
            .await
            .map_err(ledger_err)?;

        tracing::debug!(session_id = %session.id, family_id = %session.family_id, user_id = %user_id, "Session created");

        Ok(TokenOutput::bearer(
            access,
            self.refresh.encode(session.id, &secret),
            self.settings.access_ttl.num_seconds(),
        ))
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        run_blocking(move || hasher.hash(&password))
            .await?
            .map_err(|e| AuthError::Internal(anyhow::anyhow!(e)))
    }

    async fn new_refresh_secret(&self) -> Result<(RefreshSecret, String), AuthError> {
        let codec = self.refresh.clone();
        run_blocking(move || codec.generate())
            .await?
            .map_err(|e: HashError| AuthError::Internal(anyhow::anyhow!(e)))
    }

    async fn verify_refresh_secret(
        &self,
        hash: String,
        secret: RefreshSecret,
    ) -> Result<(), AuthError> {
        let codec = self.refresh.clone();
        run_blocking(move || codec.verify(&hash, &secret))
            .await?
            .map_err(|_: RefreshError| AuthError::InvalidRefresh)
    }
}

/// Runs Argon2 work off the async workers.
async fn run_blocking<F, T>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("blocking task failed: {}", e)))
}
