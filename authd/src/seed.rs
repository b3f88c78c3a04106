//! Startup upsert of tenants and OAuth clients from configuration.

use service_core::error::AppError;

use crate::config::ClientSeed;
use crate::oauth::Provider;
use crate::ports::ClientRegistry;

fn validate(seed: &ClientSeed) -> Result<(), AppError> {
    if seed.tenant_slug.trim().is_empty()
        || seed.client_id.trim().is_empty()
        || seed.display_name.trim().is_empty()
    {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "Invalid client seed: tenant_slug, client_id and display_name are required"
        )));
    }

    if seed.redirect_uris.is_empty() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "Client {}: at least one redirect_uri is required",
            seed.client_id
        )));
    }

    for uri in &seed.redirect_uris {
        url::Url::parse(uri).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "Client {}: invalid redirect_uri '{}': {}",
                seed.client_id,
                uri,
                e
            ))
        })?;
    }

    for name in seed.providers.keys() {
        name.parse::<Provider>().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Client {}: {}", seed.client_id, e))
        })?;
    }

    Ok(())
}

/// Validates every seed before writing any of them.
pub async fn seed_clients(
    registry: &dyn ClientRegistry,
    seeds: &[ClientSeed],
) -> Result<(), AppError> {
    for seed in seeds {
        validate(seed)?;
    }

    for seed in seeds {
        let tenant_id = registry
            .ensure_tenant(&seed.tenant_slug)
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!(
                    "Failed to ensure tenant '{}': {}",
                    seed.tenant_slug,
                    e
                ))
            })?;

        registry
            .upsert_oauth_client(
                tenant_id,
                &seed.client_id,
                &seed.display_name,
                &seed.redirect_uris,
                &seed.providers,
            )
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!(
                    "Failed to upsert OAuth client '{}': {}",
                    seed.client_id,
                    e
                ))
            })?;

        tracing::info!(
            tenant = %seed.tenant_slug,
            client_id = %seed.client_id,
            providers = seed.providers.len(),
            "Seeded OAuth client"
        );
    }

    Ok(())
}
