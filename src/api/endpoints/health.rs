//! Liveness endpoints.

use axum::Json;

use crate::api::types::{EndpointList, HealthResponse, IndexResponse};
use crate::config::{APP_NAME, APP_VERSION};

/// `GET /health`: liveness check for the mobile client and load balancers.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Photo Restore API is running",
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
}

/// `GET /`: service description.
pub async fn describe() -> Json<IndexResponse> {
    Json(IndexResponse {
        name: APP_NAME,
        version: APP_VERSION,
        endpoints: EndpointList {
            restore: "POST /restore",
            health: "GET /health",
        },
    })
}
