//! PostgreSQL adapter for the repository traits and the session ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{
    NewUser, OAuthClient, OAuthIdentity, OAuthProviderConfig, RevocationReason, Session, User,
};
use crate::ports::{
    ClientRegistry, OAuthClientRepository, OAuthUserRepository, RepoError, SessionLedger,
    TenantRepository, UserRepository,
};

fn map_sqlx(e: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RepoError::Conflict;
        }
    }
    if matches!(e, sqlx::Error::RowNotFound) {
        return RepoError::NotFound;
    }
    RepoError::Backend(anyhow::anyhow!(e))
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    tenant_id: Uuid,
    email: Option<String>,
    username: Option<String>,
    password_hash: String,
    attrs: serde_json::Value,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            tenant_id: row.tenant_id,
            email: row.email,
            username: row.username,
            password_hash: row.password_hash,
            attrs: row.attrs,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    client_id: Option<String>,
    family_id: Uuid,
    parent_id: Option<Uuid>,
    replaced_by: Option<Uuid>,
    refresh_hash: String,
    user_agent: String,
    ip: String,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    reason: Option<String>,
}

impl TryFrom<SessionRow> for Session {
    type Error = RepoError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let reason = row
            .reason
            .map(|r| r.parse::<RevocationReason>())
            .transpose()
            .map_err(|e| RepoError::Backend(anyhow::anyhow!(e)))?;

        Ok(Session {
            id: row.id,
            user_id: row.user_id,
            client_id: row.client_id,
            family_id: row.family_id,
            parent_id: row.parent_id,
            replaced_by: row.replaced_by,
            refresh_hash: row.refresh_hash,
            user_agent: row.user_agent,
            ip: row.ip,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OAuthClientRow {
    id: Uuid,
    tenant_id: Uuid,
    client_id: String,
    name: String,
    redirect_uris: Vec<String>,
    providers: Json<HashMap<String, OAuthProviderConfig>>,
}

impl From<OAuthClientRow> for OAuthClient {
    fn from(row: OAuthClientRow) -> Self {
        OAuthClient {
            id: row.id,
            tenant_id: row.tenant_id,
            client_id: row.client_id,
            name: row.name,
            redirect_uris: row.redirect_uris,
            providers: row.providers.0,
        }
    }
}

const USER_COLUMNS: &str = "id, tenant_id, email, username, password_hash, attrs";

/// PostgreSQL store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantRepository for PgStore {
    async fn resolve_tenant_id(&self, slug: &str) -> Result<Uuid, RepoError> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM tenants WHERE slug = $1")
            .bind(slug)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User, RepoError> {
        sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, tenant_id, email, username, password_hash, attrs)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.attrs.unwrap_or_else(|| serde_json::json!({})))
        .fetch_one(&self.pool)
        .await
        .map(User::from)
        .map_err(map_sqlx)
    }

    async fn get_user_by_identifier(
        &self,
        tenant_id: Uuid,
        identifier: &str,
    ) -> Result<User, RepoError> {
        sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE tenant_id = $1 AND (lower(email) = lower($2) OR username = $2)
            LIMIT 1
            "#
        ))
        .bind(tenant_id)
        .bind(identifier)
        .fetch_one(&self.pool)
        .await
        .map(User::from)
        .map_err(map_sqlx)
    }

    async fn get_user_by_id(&self, tenant_id: Uuid, user_id: Uuid) -> Result<User, RepoError> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(user_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map(User::from)
        .map_err(map_sqlx)
    }

    async fn update_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), RepoError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
                .bind(user_id)
                .bind(hash)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn get_tenant_id_by_user(&self, user_id: Uuid) -> Result<Uuid, RepoError> {
        sqlx::query_scalar::<_, Uuid>("SELECT tenant_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)
    }
}

#[async_trait]
impl OAuthClientRepository for PgStore {
    async fn get_oauth_client(
        &self,
        tenant_id: Uuid,
        client_id: &str,
    ) -> Result<OAuthClient, RepoError> {
        sqlx::query_as::<_, OAuthClientRow>(
            r#"
            SELECT id, tenant_id, client_id, name, redirect_uris, providers
            FROM oauth_clients
            WHERE tenant_id = $1 AND client_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
        .map(OAuthClient::from)
        .map_err(map_sqlx)
    }
}

#[async_trait]
impl OAuthUserRepository for PgStore {
    async fn get_user_by_oauth(
        &self,
        tenant_id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<User, RepoError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.tenant_id, u.email, u.username, u.password_hash, u.attrs
            FROM oauth_identities oi
            JOIN users u ON oi.user_id = u.id
            WHERE oi.tenant_id = $1 AND oi.provider = $2 AND oi.provider_user_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(provider_user_id)
        .fetch_one(&self.pool)
        .await
        .map(User::from)
        .map_err(map_sqlx)
    }

    async fn create_user_from_oauth(&self, identity: &OAuthIdentity) -> Result<User, RepoError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let tenant_id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM tenants WHERE slug = $1")
            .bind(&identity.tenant_slug)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let user = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, tenant_id, email, username, password_hash, attrs)
            VALUES ($1, $2, $3, $4, '', $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&identity.email)
        .bind(&identity.username)
        .bind(&identity.attrs)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO oauth_identities (user_id, tenant_id, provider, provider_user_id)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user.id)
        .bind(tenant_id)
        .bind(&identity.provider)
        .bind(&identity.provider_user_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        Ok(user.into())
    }
}

#[async_trait]
impl SessionLedger for PgStore {
    async fn create(&self, session: &Session) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, client_id, family_id, parent_id, replaced_by, refresh_hash,
                user_agent, ip, created_at, last_used_at, expires_at, revoked_at, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.client_id)
        .bind(session.family_id)
        .bind(session.parent_id)
        .bind(session.replaced_by)
        .bind(&session.refresh_hash)
        .bind(&session.user_agent)
        .bind(&session.ip)
        .bind(session.created_at)
        .bind(session.last_used_at)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .bind(session.reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, RepoError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, client_id, family_id, parent_id, replaced_by, refresh_hash,
                   user_agent, ip, created_at, last_used_at, expires_at, revoked_at, reason
            FROM sessions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(Session::try_from).transpose()
    }

    async fn replaced_already(&self, id: Uuid) -> Result<bool, RepoError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM sessions WHERE id = $1 AND replaced_by IS NOT NULL)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn mark_replaced(&self, old_id: Uuid, new_id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET replaced_by = $2, revoked_at = now(), reason = 'rotated'
            WHERE id = $1 AND replaced_by IS NULL
            "#,
        )
        .bind(old_id)
        .bind(new_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM sessions WHERE id = $1)")
            .bind(old_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;

        if exists {
            Err(RepoError::Conflict)
        } else {
            Err(RepoError::NotFound)
        }
    }

    async fn revoke(&self, id: Uuid, reason: RevocationReason) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE sessions SET revoked_at = now(), reason = $2 WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn revoke_family(
        &self,
        family_id: Uuid,
        reason: RevocationReason,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = now(), reason = $2 WHERE family_id = $1 AND revoked_at IS NULL",
        )
        .bind(family_id)
        .bind(reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        tracing::debug!(family_id = %family_id, revoked = result.rows_affected(), "Revoked session family");
        Ok(())
    }

    async fn update_last_used(&self, id: Uuid) -> Result<(), RepoError> {
        sqlx::query("UPDATE sessions SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl ClientRegistry for PgStore {
    async fn ensure_tenant(&self, slug: &str) -> Result<Uuid, RepoError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO tenants (id, slug) VALUES ($1, $2)
            ON CONFLICT (slug) DO UPDATE SET slug = EXCLUDED.slug
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn upsert_oauth_client(
        &self,
        tenant_id: Uuid,
        client_id: &str,
        name: &str,
        redirect_uris: &[String],
        providers: &HashMap<String, OAuthProviderConfig>,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO oauth_clients (id, tenant_id, client_id, name, redirect_uris, providers)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, client_id) DO UPDATE SET
                name = EXCLUDED.name,
                redirect_uris = EXCLUDED.redirect_uris,
                providers = oauth_clients.providers || EXCLUDED.providers,
                updated_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(client_id)
        .bind(name)
        .bind(redirect_uris)
        .bind(Json(providers))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }
}
