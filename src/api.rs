use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::link_service::{LinkService, ResolveError, ShortenError, ShortenedLink};

#[derive(Clone)]
pub struct AppState {
    pub link_service: Arc<dyn LinkService>,
    /// Prefix for returned short URLs, without a trailing slash
    pub base_url: Arc<str>,
}

#[derive(Deserialize)]
pub struct ShortenPayload {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ShortenResponse {
    pub code: String,
    pub short_url: String,
    pub original_url: String,
    /// Timestamp in RFC 3339 format
    pub created_at: String,
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub database: &'static str,
}

#[derive(Serialize)]
pub struct Error {
    error: String,
    error_id: String,
}

impl Error {
    fn body(error: impl Into<String>, error_id: Uuid) -> Json<Self> {
        Json(Self {
            error: error.into(),
            error_id: error_id.to_string(),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/shorten", routing::post(shorten))
        .route("/health", routing::get(health))
        .route("/stat/{code}", routing::get(stats))
        .route("/{code}", routing::get(redirect))
        .with_state(state)
}

#[instrument(skip(state))]
async fn shorten(
    State(state): State<AppState>,
    Json(ShortenPayload { url }): Json<ShortenPayload>,
) -> impl IntoResponse {
    state
        .link_service
        .shorten(&url)
        .await
        .map(
            |ShortenedLink {
                 code,
                 original_url,
                 created_at,
             }| {
                (
                    StatusCode::CREATED,
                    Json(ShortenResponse {
                        short_url: format!("{}/{code}", state.base_url),
                        code,
                        original_url,
                        created_at,
                    }),
                )
            },
        )
        .map_err(|error: ShortenError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ShortenError::InvalidUrl(_)
                | ShortenError::UnsupportedScheme(_)
                | ShortenError::UrlTooLong { .. }
                | ShortenError::UnsafeCharacters => {
                    info!(?err_uuid, ?error, "User submitted a bad request");
                    (StatusCode::BAD_REQUEST, Error::body(error.to_string(), err_uuid))
                }
                ShortenError::GenerationExhausted { .. } => {
                    error!(?err_uuid, ?error, "Could not find a free short code");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Error::body(error.to_string(), err_uuid),
                    )
                }
                ShortenError::Unavailable(_) => {
                    error!(?err_uuid, ?error, "Database unavailable during a request");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Error::body("Database is unavailable", err_uuid),
                    )
                }
                ShortenError::Internal(_) => {
                    error!(?err_uuid, ?error, "Encountered an error during a request");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Error::body("Internal server error", err_uuid),
                    )
                }
            }
        })
}

#[instrument(skip(state))]
async fn redirect(State(state): State<AppState>, Path(code): Path<String>) -> impl IntoResponse {
    state
        .link_service
        .resolve(&code)
        .await
        .map(|url| (StatusCode::FOUND, [(header::LOCATION, url)]))
        .map_err(resolve_error_response)
}

#[instrument(skip(state))]
async fn stats(State(state): State<AppState>, Path(code): Path<String>) -> impl IntoResponse {
    state
        .link_service
        .stats(&code)
        .await
        .map(Json)
        .map_err(resolve_error_response)
}

#[instrument(skip(state))]
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.link_service.check_health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthStatus {
                status: "ok",
                database: "connected",
            }),
        ),
        Err(err) => {
            error!(?err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    status: "unavailable",
                    database: "not connected",
                }),
            )
        }
    }
}

fn resolve_error_response(error: ResolveError) -> (StatusCode, Json<Error>) {
    let err_uuid = Uuid::new_v4();
    match error {
        ResolveError::NotFound => (StatusCode::NOT_FOUND, Error::body("Not found", err_uuid)),
        ResolveError::Unavailable(_) => {
            error!(?err_uuid, ?error, "Database unavailable during a request");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Error::body("Database is unavailable", err_uuid),
            )
        }
        ResolveError::Internal(_) => {
            error!(?err_uuid, ?error, "Encountered an error during a request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Error::body("Internal server error", err_uuid),
            )
        }
    }
}
