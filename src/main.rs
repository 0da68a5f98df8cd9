use std::sync::Arc;

use anyhow::anyhow;
use tokio::net::TcpListener;
use tracing::info;

use cadenza::core::providers::http::{HttpChatModel, HttpSpeechSynth};
use cadenza::core::providers::{LoggingPersistence, PassThroughModeration};
use cadenza::core::session::SessionDeps;
use cadenza::{routes, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let config = ServerConfig::from_env();
    let addr = format!("{}:{}", config.host, config.port);

    let deps = SessionDeps {
        llm: Arc::new(HttpChatModel::new(
            config.llm.base_url.clone(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.system_prompt.clone(),
        )),
        tts: Arc::new(HttpSpeechSynth::new(
            config.tts.base_url.clone(),
            config.tts.api_key.clone(),
            config.tts.voice.clone(),
        )),
        moderation: Arc::new(PassThroughModeration),
        persistence: Arc::new(LoggingPersistence),
    };

    let state = AppState::new(config, deps);
    let registry = state.registry.clone();
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;
    Ok(())
}

/// Wait for SIGINT/SIGTERM, then ask every live session to finalize so
/// transcripts and usage are flushed before the process exits.
async fn shutdown_signal(registry: Arc<cadenza::state::SessionRegistry>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    registry.shutdown_all().await;
    // Let finalizers run their persistence calls.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
}
