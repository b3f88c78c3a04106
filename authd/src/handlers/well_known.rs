use axum::{extract::State, http::header, response::IntoResponse, Json};

use crate::AppState;

/// Public signing keys. Cacheable for an hour.
pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(state.auth.jwks()),
    )
}
