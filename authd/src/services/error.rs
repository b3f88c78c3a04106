use service_core::error::AppError;
use thiserror::Error;

use crate::ports::RepoError;

/// Engine errors. Credential failures are deliberately vague: none of them
/// says which part of a credential was wrong.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown tenant")]
    UnknownTenant,

    #[error("Account already exists")]
    AlreadyExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid refresh token")]
    InvalidRefresh,

    #[error("Refresh token reuse detected")]
    ReuseDetected,

    #[error("Invalid client")]
    InvalidClient,

    #[error("Invalid redirect URI")]
    InvalidRedirectUri,

    #[error("Unsupported provider")]
    UnsupportedProvider,

    #[error("Invalid state")]
    InvalidState,

    #[error("Not found")]
    NotFound,

    #[error("OAuth is not configured")]
    OAuthNotConfigured,

    #[error("Identity provider error: {0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RepoError> for AuthError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => AuthError::NotFound,
            RepoError::Conflict => AuthError::AlreadyExists,
            RepoError::Backend(e) => AuthError::Internal(e),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::InvalidInput(_)
            | AuthError::UnknownTenant
            | AuthError::InvalidClient
            | AuthError::InvalidRedirectUri
            | AuthError::UnsupportedProvider
            | AuthError::InvalidState => AppError::BadRequest(anyhow::anyhow!(message)),
            AuthError::InvalidCredentials | AuthError::InvalidRefresh => {
                AppError::Unauthorized(anyhow::anyhow!(message))
            }
            AuthError::ReuseDetected => AppError::Forbidden(anyhow::anyhow!(message)),
            AuthError::AlreadyExists => AppError::Conflict(anyhow::anyhow!(message)),
            AuthError::NotFound => AppError::NotFound(anyhow::anyhow!(message)),
            AuthError::OAuthNotConfigured => AppError::ServiceUnavailable,
            AuthError::Upstream(detail) => AppError::BadGateway(detail),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}
