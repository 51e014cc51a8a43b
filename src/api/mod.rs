//! Restore HTTP API.
//!
//! The router is composable: `restore_api_router()` returns a `Router` that
//! can be mounted on any axum server, and `start_server()` runs it on its own
//! listener with a shutdown handle.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::ApiError;
pub use router::restore_api_router;
pub use server::{start_server, RestoreServer, ServerSession};
pub use types::ApiContext;
