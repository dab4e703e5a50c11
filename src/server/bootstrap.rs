use crate::config::AppConfig;
use crate::server::{self, SyncerState};
use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: PathBuf,
    pub listen: Option<String>,
}

/// Process lifecycle: load config → build state → register schedules →
/// serve the façade → wait for shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = AppConfig::load(&args.config_path)?;
    let listen = args.listen.clone().unwrap_or_else(|| config.listen.clone());

    let state = SyncerState::new(args.config_path.clone(), config).await?;
    state.reload().await?;
    tracing::info!("syncer: initial schedule registration completed");

    let facade_handle = tokio::spawn({
        let state = state.clone();
        let listen = listen.clone();
        async move { server::run_facade_server(&listen, state).await }
    });

    tracing::info!("server: façade starting, listen={}", listen);

    wait_for_shutdown().await;

    facade_handle.abort();
    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }
}
