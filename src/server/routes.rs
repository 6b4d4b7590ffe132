//! HTTP routes of the sync server.
//!
//! - `GET /health`: health check (no auth)
//! - `GET /sync?last_pulled_at=..&schema_version=..`: pull (auth)
//! - `POST /sync`: push (auth)

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, error_response, ApiKeyStore, AuthUser};
use super::backend::{Backend, BackendError, PushSummary};
use crate::clock::Millis;
use crate::db::SCHEMA_VERSION;
use crate::sync::{PullResponse, PushRequest};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub backend: Arc<Backend>,
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let error = match &self {
            BackendError::Invalid(_) => "invalid_changes",
            BackendError::UnsupportedSchema { .. } => "unsupported_schema",
        };
        error_response(StatusCode::UNPROCESSABLE_ENTITY, error, self.to_string())
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
struct PullParams {
    last_pulled_at: Option<Millis>,
    schema_version: Option<i64>,
}

async fn pull(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<PullParams>,
) -> Result<Json<PullResponse>, BackendError> {
    if let Some(client) = params.schema_version {
        if client > SCHEMA_VERSION {
            return Err(BackendError::UnsupportedSchema {
                client,
                server: SCHEMA_VERSION,
            });
        }
    }

    let response = state.backend.pull(&user.owner_id, params.last_pulled_at);
    tracing::debug!(
        owner = %user.owner_id,
        rows = response.changes.len(),
        timestamp = response.timestamp,
        "Serving pull"
    );
    Ok(Json(response))
}

async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<PushRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_payload",
                rejection.body_text(),
            )
        }
    };

    match state.backend.push(&user.owner_id, request) {
        Ok(summary) => (StatusCode::OK, Json::<PushSummary>(summary)).into_response(),
        Err(e) => {
            tracing::warn!(owner = %user.owner_id, error = %e, "Rejected push");
            e.into_response()
        }
    }
}

/// Builds the sync server router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/sync", get(pull).post(push))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
