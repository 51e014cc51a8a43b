//! API endpoint handlers.

pub mod health;
pub mod restore;

use crate::api::error::ApiError;

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
