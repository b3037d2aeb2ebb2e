//! Health and status endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::group::GroupInfo;
use crate::router::RouterStatus;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Registry snapshot response
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub router: RouterStatus,
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Router registries, fetched from the router by message
async fn status(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let router = state
        .router
        .status()
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        router,
    }))
}

async fn groups(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<GroupInfo>>, (StatusCode, String)> {
    state
        .router
        .groups()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

/// Build health router
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build status router
pub fn status_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/groups", get(groups))
        .with_state(state)
}
