//! Health check endpoints.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use super::StatusState;
use crate::store::CoordinationStore;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the daemon running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    store: &'static str,
}

/// Readiness check (does the coordination store answer?)
pub async fn ready_check(
    State(state): State<StatusState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let store = state.registry.store();
    match store.ping().await {
        Ok(()) => Ok(Json(ReadyResponse {
            status: "ready",
            store: store.backend(),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            // Return 503 if not ready
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
