use authd::{
    build_router,
    config::{AuthConfig, SeedConfig},
    crypto::{Argon2Hasher, StateCodec, TokenSigner},
    db,
    oauth::FederationClient,
    ports::ClientRegistry,
    seed::seed_clients,
    services::{AuthService, Repositories},
    store::{MemoryStore, PgStore},
    AppState,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

async fn build_storage(
    config: &AuthConfig,
) -> Result<(Repositories, Arc<dyn ClientRegistry>, Option<PgPool>), AppError> {
    let Some(db_config) = &config.database else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on restart");
        let store = Arc::new(MemoryStore::new());
        let registry: Arc<dyn ClientRegistry> = store.clone();
        return Ok((Repositories::from_store(store), registry, None));
    };

    let pool = db::create_pool(db_config)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

    if db_config.run_migrations {
        db::run_migrations(&pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    }

    let store = Arc::new(PgStore::new(pool.clone()));
    let registry: Arc<dyn ClientRegistry> = store.clone();
    Ok((Repositories::from_store(store), registry, Some(pool)))
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let (repos, registry, pool) = build_storage(&config).await?;

    let seeds = SeedConfig::load()?;
    seed_clients(registry.as_ref(), &seeds.clients).await?;

    let hasher = Argon2Hasher::new(config.argon2)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

    let signer = match config.jwt.signing_seed()? {
        Some(seed) => TokenSigner::from_seed(&seed, &config.jwt.issuer, &config.jwt.audience),
        None => {
            tracing::warn!("JWT_SIGNING_KEY not set, generating an ephemeral signing key");
            TokenSigner::generate(&config.jwt.issuer, &config.jwt.audience)
        }
    }
    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

    let state_codec = StateCodec::new(config.oauth.state_key.expose_secret())
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("OAUTH_STATE_KEY: {}", e)))?;
    let federation = FederationClient::new(Duration::from_secs(config.oauth.http_timeout_seconds))
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

    let auth = AuthService::new(repos, hasher, Arc::new(signer), config.auth_settings())
        .with_oauth(state_codec, Arc::new(federation));

    let port = config.common.port;
    let state = AppState {
        config: Arc::new(config),
        auth,
        db: pool,
    };
    let app = build_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
