//! In-process store backing every repository trait. Used in dev when no
//! database is configured and throughout the test suite.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{
    NewUser, OAuthClient, OAuthIdentity, OAuthProviderConfig, RevocationReason, Session, User,
};
use crate::ports::{
    ClientRegistry, Clock, OAuthClientRepository, OAuthUserRepository, RepoError, SessionLedger,
    SystemClock, TenantRepository, UserRepository,
};

#[derive(Default)]
struct Inner {
    tenants: HashMap<String, Uuid>,
    users: HashMap<Uuid, User>,
    /// (tenant_id, provider, provider_user_id) -> user_id
    identities: HashMap<(Uuid, String, String), Uuid>,
    /// (tenant_id, client_id) -> client
    clients: HashMap<(Uuid, String), OAuthClient>,
    sessions: HashMap<Uuid, Session>,
}

impl Inner {
    fn identifier_taken(&self, tenant_id: Uuid, email: Option<&str>, username: Option<&str>) -> bool {
        self.users.values().filter(|u| u.tenant_id == tenant_id).any(|u| {
            let email_taken = email.is_some_and(|e| {
                u.email
                    .as_deref()
                    .is_some_and(|existing| existing.eq_ignore_ascii_case(e))
            });
            let username_taken = username.is_some() && u.username.as_deref() == username;
            email_taken || username_taken
        })
    }

    fn insert_user(&mut self, user: NewUser) -> Result<User, RepoError> {
        if self.identifier_taken(user.tenant_id, user.email.as_deref(), user.username.as_deref()) {
            return Err(RepoError::Conflict);
        }

        let user = User {
            id: Uuid::new_v4(),
            tenant_id: user.tenant_id,
            email: user.email,
            username: user.username,
            password_hash: user.password_hash,
            attrs: user.attrs.unwrap_or_else(|| serde_json::json!({})),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }
}

/// Mutex-guarded maps. Every operation takes the single lock, so conditional
/// updates such as [`SessionLedger::mark_replaced`] are atomic.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Revocation and last-use timestamps are taken from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, RepoError> {
        self.inner
            .lock()
            .map_err(|e| RepoError::Backend(anyhow::anyhow!("Memory store mutex poisoned: {}", e)))
    }

    pub fn user_count(&self) -> usize {
        self.inner.lock().map(|i| i.users.len()).unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().map(|i| i.sessions.len()).unwrap_or(0)
    }

    /// All sessions of a family, oldest first.
    pub fn family(&self, family_id: Uuid) -> Vec<Session> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.family_id == family_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}

#[async_trait]
impl TenantRepository for MemoryStore {
    async fn resolve_tenant_id(&self, slug: &str) -> Result<Uuid, RepoError> {
        self.lock()?.tenants.get(slug).copied().ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError> {
        self.lock()?.insert_user(user)
    }

    async fn get_user_by_identifier(
        &self,
        tenant_id: Uuid,
        identifier: &str,
    ) -> Result<User, RepoError> {
        self.lock()?
            .users
            .values()
            .find(|u| u.tenant_id == tenant_id && u.matches_identifier(identifier))
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn get_user_by_id(&self, tenant_id: Uuid, user_id: Uuid) -> Result<User, RepoError> {
        self.lock()?
            .users
            .get(&user_id)
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn update_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), RepoError> {
        let mut inner = self.lock()?;
        let user = inner.users.get_mut(&user_id).ok_or(RepoError::NotFound)?;
        user.password_hash = hash.to_string();
        Ok(())
    }

    async fn get_tenant_id_by_user(&self, user_id: Uuid) -> Result<Uuid, RepoError> {
        self.lock()?
            .users
            .get(&user_id)
            .map(|u| u.tenant_id)
            .ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl OAuthClientRepository for MemoryStore {
    async fn get_oauth_client(
        &self,
        tenant_id: Uuid,
        client_id: &str,
    ) -> Result<OAuthClient, RepoError> {
        self.lock()?
            .clients
            .get(&(tenant_id, client_id.to_string()))
            .cloned()
            .ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl OAuthUserRepository for MemoryStore {
    async fn get_user_by_oauth(
        &self,
        tenant_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<User, RepoError> {
        let inner = self.lock()?;
        let key = (tenant_id, provider.to_string(), provider_user_id.to_string());
        inner
            .identities
            .get(&key)
            .and_then(|id| inner.users.get(id))
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn create_user_from_oauth(&self, identity: &OAuthIdentity) -> Result<User, RepoError> {
        let mut inner = self.lock()?;
        let tenant_id = *inner
            .tenants
            .get(&identity.tenant_slug)
            .ok_or(RepoError::NotFound)?;

        let key = (
            tenant_id,
            identity.provider.clone(),
            identity.provider_user_id.clone(),
        );
        if inner.identities.contains_key(&key) {
            return Err(RepoError::Conflict);
        }

        let user = inner.insert_user(NewUser {
            tenant_id,
            email: identity.email.clone(),
            username: identity.username.clone(),
            password_hash: String::new(),
            attrs: Some(identity.attrs.clone()),
        })?;
        inner.identities.insert(key, user.id);
        Ok(user)
    }
}

#[async_trait]
impl SessionLedger for MemoryStore {
    async fn create(&self, session: &Session) -> Result<(), RepoError> {
        let mut inner = self.lock()?;
        if inner.sessions.contains_key(&session.id) {
            return Err(RepoError::Conflict);
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, RepoError> {
        Ok(self.lock()?.sessions.get(&id).cloned())
    }

    async fn replaced_already(&self, id: Uuid) -> Result<bool, RepoError> {
        Ok(self
            .lock()?
            .sessions
            .get(&id)
            .is_some_and(|s| s.replaced_by.is_some()))
    }

    async fn mark_replaced(&self, old_id: Uuid, new_id: Uuid) -> Result<(), RepoError> {
        let mut inner = self.lock()?;
        let session = inner.sessions.get_mut(&old_id).ok_or(RepoError::NotFound)?;
        if session.replaced_by.is_some() {
            return Err(RepoError::Conflict);
        }

        session.replaced_by = Some(new_id);
        session.revoked_at = Some(self.clock.now());
        session.reason = Some(RevocationReason::Rotated);
        Ok(())
    }

    async fn revoke(&self, id: Uuid, reason: RevocationReason) -> Result<(), RepoError> {
        let mut inner = self.lock()?;
        if let Some(session) = inner.sessions.get_mut(&id).filter(|s| s.revoked_at.is_none()) {
            session.revoked_at = Some(self.clock.now());
            session.reason = Some(reason);
        }
        Ok(())
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
    ) -> Result<(), RepoError> {
        let now = self.clock.now();
        let mut inner = self.lock()?;
        inner
            .sessions
            .values_mut()
            .filter(|s| s.family_id == family_id && s.revoked_at.is_none())
            .for_each(|s| {
                s.revoked_at = Some(now);
                s.reason = Some(reason);
            });
        Ok(())
    }

    async fn update_last_used(&self, id: Uuid) -> Result<(), RepoError> {
        let mut inner = self.lock()?;
        if let Some(session) = inner.sessions.get_mut(&id) {
            session.last_used_at = self.clock.now();
        }
        Ok(())
    }
}

#[async_trait]
impl ClientRegistry for MemoryStore {
    async fn ensure_tenant(&self, slug: &str) -> Result<Uuid, RepoError> {
        let mut inner = self.lock()?;
        Ok(*inner
            .tenants
            .entry(slug.to_string())
            .or_insert_with(Uuid::new_v4))
    }

    async fn upsert_oauth_client(
        &self,
        tenant_id: Uuid,
        client_id: &str,
        name: &str,
        redirect_uris: &[String],
        providers: &HashMap<String, OAuthProviderConfig>,
    ) -> Result<(), RepoError> {
        let mut inner = self.lock()?;
        let client = inner
            .clients
            .entry((tenant_id, client_id.to_string()))
            .or_insert_with(|| OAuthClient {
                id: Uuid::new_v4(),
                tenant_id,
                client_id: client_id.to_string(),
                name: String::new(),
                redirect_uris: Vec::new(),
                providers: HashMap::new(),
            });

        client.name = name.to_string();
        client.redirect_uris = redirect_uris.to_vec();
        client
            .providers
            .extend(providers.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn session(user_id: Uuid) -> Session {
        Session::new_family(
            user_id,
            "hash".to_string(),
            "ua".to_string(),
            "127.0.0.1".to_string(),
            Utc::now(),
            Duration::days(30),
        )
    }

    #[tokio::test]
    async fn mark_replaced_succeeds_once() {
        let store = MemoryStore::new();
        let parent = session(Uuid::new_v4());
        store.create(&parent).await.unwrap();

        let first = Uuid::new_v4();
        store.mark_replaced(parent.id, first).await.unwrap();
        assert!(matches!(
            store.mark_replaced(parent.id, Uuid::new_v4()).await,
            Err(RepoError::Conflict)
        ));

        let stored = store.find_by_id(parent.id).await.unwrap().unwrap();
        assert_eq!(stored.replaced_by, Some(first));
        assert_eq!(stored.reason, Some(RevocationReason::Rotated));
        assert!(stored.revoked_at.is_some());
        assert!(store.replaced_already(parent.id).await.unwrap());
    }

    #[tokio::test]
    async fn mark_replaced_unknown_session_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.mark_replaced(Uuid::new_v4(), Uuid::new_v4()).await,
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_session_id_conflicts() {
        let store = MemoryStore::new();
        let s = session(Uuid::new_v4());
        store.create(&s).await.unwrap();
        assert!(matches!(store.create(&s).await, Err(RepoError::Conflict)));
    }

    #[tokio::test]
    async fn revoke_keeps_first_reason() {
        let store = MemoryStore::new();
        let s = session(Uuid::new_v4());
        store.create(&s).await.unwrap();

        store.revoke(s.id, RevocationReason::UserLogout).await.unwrap();
        store.revoke(s.id, RevocationReason::ReuseDetected).await.unwrap();

        let stored = store.find_by_id(s.id).await.unwrap().unwrap();
        assert_eq!(stored.reason, Some(RevocationReason::UserLogout));
    }

    struct FixedClock(chrono::DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            self.0
        }
    }

    #[tokio::test]
    async fn timestamps_come_from_the_store_clock() {
        let at = Utc::now() + Duration::days(3);
        let store = MemoryStore::with_clock(Arc::new(FixedClock(at)));
        let parent = session(Uuid::new_v4());
        let other = session(Uuid::new_v4());
        store.create(&parent).await.unwrap();
        store.create(&other).await.unwrap();

        store.update_last_used(parent.id).await.unwrap();
        store.mark_replaced(parent.id, Uuid::new_v4()).await.unwrap();
        store.revoke(other.id, RevocationReason::UserLogout).await.unwrap();

        let parent = store.find_by_id(parent.id).await.unwrap().unwrap();
        assert_eq!(parent.last_used_at, at);
        assert_eq!(parent.revoked_at, Some(at));
        let other = store.find_by_id(other.id).await.unwrap().unwrap();
        assert_eq!(other.revoked_at, Some(at));
    }

    #[tokio::test]
    async fn revoke_family_leaves_other_families_alone() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let a = session(user_id);
        let b = session(user_id);
        store.create(&a).await.unwrap();
        store.create(&b).await.unwrap();

        store
            .revoke_family(a.family_id, RevocationReason::UserLogoutAll)
            .await
            .unwrap();

        assert!(store.find_by_id(a.id).await.unwrap().unwrap().is_revoked());
        assert!(!store.find_by_id(b.id).await.unwrap().unwrap().is_revoked());
    }

    #[tokio::test]
    async fn users_are_unique_per_tenant() {
        let store = MemoryStore::new();
        let acme = store.ensure_tenant("acme").await.unwrap();
        let globex = store.ensure_tenant("globex").await.unwrap();

        let new_user = |tenant_id| NewUser {
            tenant_id,
            email: Some("alice@example.com".to_string()),
            username: None,
            password_hash: "h".to_string(),
            attrs: None,
        };

        store.create_user(new_user(acme)).await.unwrap();
        store.create_user(new_user(globex)).await.unwrap();
        assert!(matches!(
            store.create_user(new_user(acme)).await,
            Err(RepoError::Conflict)
        ));

        let found = store
            .get_user_by_identifier(acme, "ALICE@example.com")
            .await
            .unwrap();
        assert_eq!(found.tenant_id, acme);
    }

    #[tokio::test]
    async fn oauth_user_is_created_and_linked() {
        let store = MemoryStore::new();
        let tenant_id = store.ensure_tenant("acme").await.unwrap();
        let identity = OAuthIdentity {
            tenant_slug: "acme".to_string(),
            provider: "github".to_string(),
            provider_user_id: "42".to_string(),
            email: None,
            username: Some("octocat".to_string()),
            attrs: serde_json::json!({}),
        };

        let created = store.create_user_from_oauth(&identity).await.unwrap();
        let found = store.get_user_by_oauth(tenant_id, "github", "42").await.unwrap();

        assert_eq!(created.id, found.id);
        assert!(found.password_hash.is_empty());
        assert!(matches!(
            store.get_user_by_oauth(tenant_id, "google", "42").await,
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn upsert_client_replaces_uris_and_merges_providers() {
        let store = MemoryStore::new();
        let tenant_id = store.ensure_tenant("acme").await.unwrap();
        let google = HashMap::from([("google".to_string(), OAuthProviderConfig::default())]);
        let github = HashMap::from([("github".to_string(), OAuthProviderConfig::default())]);

        store
            .upsert_oauth_client(tenant_id, "portal", "Portal", &["https://a/cb".to_string()], &google)
            .await
            .unwrap();
        store
            .upsert_oauth_client(tenant_id, "portal", "Portal v2", &["https://b/cb".to_string()], &github)
            .await
            .unwrap();

        let client = store.get_oauth_client(tenant_id, "portal").await.unwrap();
        assert_eq!(client.name, "Portal v2");
        assert_eq!(client.redirect_uris, vec!["https://b/cb".to_string()]);
        assert!(client.providers.contains_key("google"));
        assert!(client.providers.contains_key("github"));
    }
}
