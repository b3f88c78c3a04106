use base64::{engine::general_purpose::STANDARD, Engine};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::collections::HashMap;
use std::env;

use crate::crypto::Argon2Params;
use crate::models::OAuthProviderConfig;
use crate::services::AuthSettings;

/// Development-only AES key for OAuth state, base64 of 32 bytes. Rejected in
/// production.
pub const DEV_STATE_KEY: &str = "YXV0aGQtZGV2LW9hdXRoLXN0YXRlLWtleS0wMDAwMDA=";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` selects the in-memory store (dev only).
    pub database: Option<DatabaseConfig>,
    pub jwt: JwtConfig,
    pub argon2: Argon2Params,
    pub oauth: OAuthConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    /// Base64 Ed25519 seed. A fresh key is generated when unset.
    pub signing_key: Option<Secret<String>>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_days: i64,
}

impl JwtConfig {
    /// Decodes the configured seed, if any.
    pub fn signing_seed(&self) -> Result<Option<[u8; 32]>, AppError> {
        let Some(key) = &self.signing_key else {
            return Ok(None);
        };

        let bytes = STANDARD
            .decode(key.expose_secret().trim())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("JWT_SIGNING_KEY is not base64: {}", e)))?;

        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("JWT_SIGNING_KEY must decode to 32 bytes"))
        })?;

        Ok(Some(seed))
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub state_key: Secret<String>,
    pub state_ttl_seconds: i64,
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub cookie_secure: bool,
    pub request_timeout_seconds: u64,
}

/// OAuth clients to upsert at startup, read from the layered configuration
/// (`configuration.*` file or `APP__CLIENTS__...` variables).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub clients: Vec<ClientSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSeed {
    pub tenant_slug: String,
    pub client_id: String,
    pub display_name: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub providers: HashMap<String, OAuthProviderConfig>,
}

impl SeedConfig {
    pub fn load() -> Result<Self, AppError> {
        core_config::load_layered()
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let database = match get_optional_env("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url: Secret::new(url),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                run_migrations: parse_env("DATABASE_RUN_MIGRATIONS", "true", is_prod)?,
            }),
            None if is_prod => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_URL is required in production but not set"
                )))
            }
            None => None,
        };

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("authd"), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            database,
            jwt: JwtConfig {
                issuer: get_env("JWT_ISSUER", Some("http://localhost:8080"), is_prod)?,
                audience: get_env("JWT_AUDIENCE", Some("authd"), is_prod)?,
                signing_key: if is_prod {
                    Some(Secret::new(get_env("JWT_SIGNING_KEY", None, is_prod)?))
                } else {
                    get_optional_env("JWT_SIGNING_KEY").map(Secret::new)
                },
                access_token_ttl_seconds: parse_env("ACCESS_TOKEN_TTL_SECONDS", "900", is_prod)?,
                refresh_token_ttl_days: parse_env("REFRESH_TOKEN_TTL_DAYS", "30", is_prod)?,
            },
            argon2: Argon2Params {
                time_cost: parse_env("ARGON2_TIME_COST", "3", is_prod)?,
                memory_cost_kib: parse_env("ARGON2_MEMORY_KIB", "65536", is_prod)?,
                parallelism: parse_env("ARGON2_PARALLELISM", "2", is_prod)?,
                salt_len: parse_env("ARGON2_SALT_LEN", "16", is_prod)?,
                output_len: parse_env("ARGON2_OUTPUT_LEN", "32", is_prod)?,
            },
            oauth: OAuthConfig {
                state_key: Secret::new(get_env("OAUTH_STATE_KEY", Some(DEV_STATE_KEY), is_prod)?),
                state_ttl_seconds: parse_env("OAUTH_STATE_TTL_SECONDS", "600", is_prod)?,
                http_timeout_seconds: parse_env("OAUTH_HTTP_TIMEOUT_SECONDS", "10", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:5173"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                cookie_secure: parse_env("COOKIE_SECURE", "true", is_prod)?,
                request_timeout_seconds: parse_env("REQUEST_TIMEOUT_SECONDS", "30", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            access_ttl: chrono::Duration::seconds(self.jwt.access_token_ttl_seconds),
            refresh_ttl: chrono::Duration::days(self.jwt.refresh_token_ttl_days),
            state_ttl: chrono::Duration::seconds(self.oauth.state_ttl_seconds),
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ACCESS_TOKEN_TTL_SECONDS must be positive"
            )));
        }

        if self.jwt.refresh_token_ttl_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "REFRESH_TOKEN_TTL_DAYS must be positive"
            )));
        }

        if self.oauth.state_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OAUTH_STATE_TTL_SECONDS must be positive"
            )));
        }

        crate::crypto::Argon2Hasher::new(self.argon2)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
        self.jwt.signing_seed()?;
        crate::crypto::StateCodec::new(self.oauth.state_key.expose_secret())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("OAUTH_STATE_KEY: {}", e)))?;

        if self.is_prod() {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.oauth.state_key.expose_secret() == DEV_STATE_KEY {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "OAUTH_STATE_KEY must be changed from the development default in production"
                )));
            }

            if !self.security.cookie_secure {
                tracing::error!("COOKIE_SECURE is disabled in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
