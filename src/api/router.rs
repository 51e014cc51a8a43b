//! Restore API router.
//!
//! Routes:
//! - `GET /`: service description
//! - `GET /health`: liveness
//! - `POST /restore`: multipart restore request
//! - `GET /restored/<file>`: static serving of restored images
//!
//! Layers (outermost → innermost): CORS → access log → body limit → handler.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::api::endpoints;
use crate::api::endpoints::restore::RESTORED_PREFIX;
use crate::api::middleware;
use crate::api::types::ApiContext;

/// Room for multipart framing and the text fields on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Build the restore API router.
pub fn restore_api_router(ctx: ApiContext) -> Router {
    let restored_dir = ctx.storage.restored_dir.clone();
    let body_limit = ctx.upload_policy.max_file_size + MULTIPART_OVERHEAD;

    Router::new()
        .route("/", get(endpoints::health::describe))
        .route("/health", get(endpoints::health::check))
        .route("/restore", post(endpoints::restore::restore))
        .nest_service(RESTORED_PREFIX, ServeDir::new(restored_dir))
        .fallback(endpoints::not_found)
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(CorsLayer::permissive())
}
