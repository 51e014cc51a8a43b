//! Restore API server lifecycle: bind, spawn the axum server in a background
//! task, hand back a handle with a shutdown channel.

use std::net::SocketAddr;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::router::restore_api_router;
use crate::api::types::ApiContext;

/// Where a running server is listening.
#[derive(Debug, Clone)]
pub struct ServerSession {
    pub server_addr: String,
    pub port: u16,
}

/// Handle to a running restore server.
pub struct RestoreServer {
    pub session: ServerSession,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RestoreServer {
    /// Ask the server to stop accepting connections and drain in-flight requests.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("Restore server shutdown signal sent");
        }
    }

    /// Wait until the server task has exited.
    pub async fn stopped(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Restore server task failed: {e}");
        }
    }

    pub fn local_addr(&self) -> &str {
        &self.session.server_addr
    }
}

/// Bind `addr` (port 0 picks an ephemeral port) and serve the restore API.
pub async fn start_server(ctx: ApiContext, addr: SocketAddr) -> Result<RestoreServer, String> {
    // 1. Bind
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind restore server on {addr}: {e}"))?;

    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get server address: {e}"))?;

    // 2. Build the router
    let app = restore_api_router(ctx);

    // 3. Bound address
    let session = ServerSession {
        server_addr: addr.to_string(),
        port: addr.port(),
    };

    // 4. Shutdown signal
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    // 5. Serve in the background
    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("Restore server received shutdown signal");
        };

        tracing::info!(%addr, "Restore server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("Restore server error: {e}");
        }

        tracing::info!("Restore server stopped");
    });

    Ok(RestoreServer {
        session,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    use axum::extract::{Multipart, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use crate::ad_token::AdToken;
    use crate::api::test_support::jpeg_bytes;
    use crate::client::{ClientError, RestoreClient, RestoreSubmission};
    use crate::config::ServerConfig;
    use crate::restoration::{EditedImage, MockImageEditClient, RestorationOptions};

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn mock_ctx(dir: &tempfile::TempDir) -> ApiContext {
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        ApiContext::new(
            config,
            Arc::new(MockImageEditClient::returning(EditedImage::Inline(vec![7]))),
        )
    }

    #[derive(Clone)]
    struct FakeUpstream {
        base: String,
        fail: bool,
    }

    async fn fake_edit(
        State(state): State<FakeUpstream>,
        mut multipart: Multipart,
    ) -> axum::response::Response {
        while let Some(field) = multipart.next_field().await.unwrap() {
            let _ = field.bytes().await.unwrap();
        }
        if state.fail {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": { "message": "Server overloaded" } })),
            )
                .into_response();
        }
        Json(json!({ "data": [{ "url": format!("{}/files/out.png", state.base) }] }))
            .into_response()
    }

    /// Fake OpenAI-compatible upstream that hosts its own result file.
    async fn spawn_fake_upstream(fail: bool) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/v1/images/edits", post(fake_edit))
            .route("/files/out.png", get(|| async { b"restored-from-upstream".to_vec() }))
            .with_state(FakeUpstream {
                base: base.clone(),
                fail,
            });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("{base}/v1")
    }

    async fn start_against_upstream(dir: &tempfile::TempDir, fail: bool) -> RestoreServer {
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            openai_api_key: Some("sk-test".into()),
            openai_base_url: spawn_fake_upstream(fail).await,
            ..ServerConfig::default()
        };
        let ctx = ApiContext::from_config(config).unwrap();
        ctx.storage.ensure_dirs().unwrap();
        start_server(ctx, localhost()).await.expect("server should start")
    }

    fn submission(token: &AdToken) -> RestoreSubmission {
        RestoreSubmission::new(
            jpeg_bytes(120, 80),
            "photo.jpg",
            RestorationOptions {
                repair_scratches: true,
                colorize_photo: true,
                improve_clarity: false,
            },
        )
        .with_token(token.as_str())
    }

    #[tokio::test]
    async fn start_and_stop_server() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = start_server(mock_ctx(&dir), localhost())
            .await
            .expect("server should start");

        assert!(server.session.port > 0);
        assert_eq!(
            server.local_addr(),
            format!("127.0.0.1:{}", server.session.port)
        );

        let url = format!("http://{}/health", server.local_addr());
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        server.shutdown();
        server.shutdown(); // Second call should be safe
        tokio::time::timeout(std::time::Duration::from_secs(5), server.stopped())
            .await
            .expect("server should stop");
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = start_server(mock_ctx(&dir), localhost()).await.unwrap();
        let taken: SocketAddr = first.local_addr().parse().unwrap();

        let second = start_server(mock_ctx(&dir), taken).await;
        assert!(second.is_err());

        first.shutdown();
    }

    #[tokio::test]
    async fn e2e_restore_fetch_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = start_against_upstream(&dir, false).await;
        let client = RestoreClient::new(&format!("http://{}", server.local_addr()));
        let token = AdToken::issue();

        let outcome = client.restore(submission(&token)).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.options.repair_scratches);
        assert!(outcome.options.colorize_photo);
        assert!(outcome.restored_image_url.contains("/restored/restored-"));

        let bytes = client.fetch_image(&outcome.restored_image_url).await.unwrap();
        assert_eq!(bytes, b"restored-from-upstream");

        match client.restore(submission(&token)).await {
            Err(ClientError::Rejected { status, error, .. }) => {
                assert_eq!(status, 403);
                assert_eq!(error, "Unauthorized: Token already used");
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        server.shutdown();
    }

    #[tokio::test]
    async fn e2e_upstream_error_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = start_against_upstream(&dir, true).await;
        let client = RestoreClient::new(&format!("http://{}", server.local_addr()));

        match client.restore(submission(&AdToken::issue())).await {
            Err(ClientError::Rejected {
                status,
                error,
                message,
                ..
            }) => {
                assert_eq!(status, 500);
                assert_eq!(error, "Failed to process image");
                assert_eq!(message.as_deref(), Some("Server overloaded"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        let restored = std::fs::read_dir(dir.path().join("restored")).unwrap().count();
        assert_eq!(restored, 0);
        server.shutdown();
    }
}
