pub mod ad_token; // Single-use ad token validation
pub mod api; // HTTP surface
pub mod client; // Submission client (mobile app contract)
pub mod config;
pub mod restoration; // Normalize → prompt → upstream edit → persist
pub mod sweeper; // Periodic consumed-token cleanup
pub mod uploads; // Upload filter, staging, file hygiene

use tracing_subscriber::EnvFilter;

use crate::api::{start_server, ApiContext};
use crate::config::ServerConfig;

/// Run the restore server until SIGINT/SIGTERM.
pub async fn run() -> Result<(), String> {
    // Before tracing init so RUST_LOG from .env applies
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Failed to read .env: {e}"),
    }

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = ServerConfig::from_env().map_err(|e| e.to_string())?;
    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; every restore request will fail upstream");
    }
    if config.force_grayscale {
        tracing::info!("Grayscale override enabled; colorize requests are ignored");
    }
    let listen_addr = config.listen_addr();

    let ctx = ApiContext::from_config(config).map_err(|e| e.to_string())?;
    ctx.storage
        .ensure_dirs()
        .map_err(|e| format!("Failed to create data directories: {e}"))?;

    // Clean uploads orphaned by a previous crash
    uploads::cleanup_orphaned_uploads(&ctx.storage.uploads_dir);

    let mut sweeper = sweeper::start_token_sweeper(ctx.tokens.clone(), sweeper::SWEEP_INTERVAL);
    let mut server = start_server(ctx, listen_addr).await?;
    tracing::info!(addr = %server.local_addr(), "Listening");

    shutdown_signal().await;

    server.shutdown();
    sweeper.shutdown();
    server.stopped().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
