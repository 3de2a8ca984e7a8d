//! Built-in endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::http::server::AppState;

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub async fn root(State(state): State<AppState>) -> Json<ServiceIdentity> {
    let settings = &state.settings;
    Json(ServiceIdentity {
        name: settings.project_name.clone(),
        version: settings.version.clone(),
        description: settings.description.clone(),
    })
}

/// Process liveness only; downstream resources are not probed.
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "healthy" })
}
