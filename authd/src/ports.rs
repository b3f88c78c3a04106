//! Collaborator traits the credential engine depends on.
//!
//! Storage adapters live in [`crate::store`]; the OAuth federation seam is
//! [`crate::oauth::OAuthFederation`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    NewUser, OAuthClient, OAuthIdentity, OAuthProviderConfig, RevocationReason, Session, User,
};

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,

    #[error("conflicting record")]
    Conflict,

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn resolve_tenant_id(&self, slug: &str) -> Result<Uuid, RepoError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` when the email or username is taken in the tenant.
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError>;

    /// Looks a user up by email (case-insensitive) or username.
    async fn get_user_by_identifier(
        &self,
        tenant_id: Uuid,
        identifier: &str,
    ) -> Result<User, RepoError>;

    async fn get_user_by_id(&self, tenant_id: Uuid, user_id: Uuid) -> Result<User, RepoError>;

    async fn update_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), RepoError>;

    async fn get_tenant_id_by_user(&self, user_id: Uuid) -> Result<Uuid, RepoError>;
}

#[async_trait]
pub trait OAuthClientRepository: Send + Sync {
    async fn get_oauth_client(
        &self,
        tenant_id: Uuid,
        client_id: &str,
    ) -> Result<OAuthClient, RepoError>;
}

#[async_trait]
pub trait OAuthUserRepository: Send + Sync {
    /// Identities are scoped per tenant: one provider account that signs in
    /// through two tenants maps to two distinct users, and a match never
    /// crosses into another tenant.
    async fn get_user_by_oauth(
        &self,
        tenant_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<User, RepoError>;

    /// Creates a password-less user under the identity's tenant and links the
    /// provider account to it, atomically.
    async fn create_user_from_oauth(&self, identity: &OAuthIdentity) -> Result<User, RepoError>;
}

/// Append-mostly store of refresh sessions.
#[async_trait]
pub trait SessionLedger: Send + Sync {
    /// Fails with `Conflict` if a session with the same id exists.
    async fn create(&self, session: &Session) -> Result<(), RepoError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, RepoError>;

    async fn replaced_already(&self, id: Uuid) -> Result<bool, RepoError>;

    /// Records `new_id` as the successor of `old_id` and revokes `old_id`
    /// with reason `rotated`, in one conditional step. Returns `Conflict` when
    /// a successor is already recorded and `NotFound` for an unknown id.
    async fn mark_replaced(&self, old_id: Uuid, new_id: Uuid) -> Result<(), RepoError>;

    /// No-op on an already revoked session.
    async fn revoke(&self, id: Uuid, reason: RevocationReason) -> Result<(), RepoError>;

    async fn revoke_family(&self, family_id: Uuid, reason: RevocationReason)
        -> Result<(), RepoError>;

    async fn update_last_used(&self, id: Uuid) -> Result<(), RepoError>;
}

/// Administrative upserts used to seed tenants and OAuth clients at startup.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Returns the tenant id, creating the tenant when missing.
    async fn ensure_tenant(&self, slug: &str) -> Result<Uuid, RepoError>;

    /// Creates or updates a client. Name and redirect URIs are replaced;
    /// providers are merged by name.
    async fn upsert_oauth_client(
        &self,
        tenant_id: Uuid,
        client_id: &str,
        name: &str,
        redirect_uris: &[String],
        providers: &HashMap<String, OAuthProviderConfig>,
    ) -> Result<(), RepoError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
