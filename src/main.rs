use anyhow::Context;
use mimalloc::MiMalloc;
use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpListener, task};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cinema_booking::{
    app,
    config::{Config, LogFormat},
    services::cleanup::CleanupService,
    AppState,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.app.rust_log)
        .unwrap_or_else(|_| EnvFilter::new("cinema_booking=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.app.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config);

    info!(
        "Starting Cinema Booking API ({} environment)",
        config.app.environment
    );

    let app_state = AppState::new(config.clone()).await?;

    // --- Start background tasks ---

    let state_for_warmup = app_state.clone();
    task::spawn(async move {
        state_for_warmup.cache.warmup_cache().await;
    });

    let cleanup_interval = Duration::from_secs(config.booking.cleanup_interval_seconds.max(1));
    task::spawn(CleanupService::new(app_state.clone()).run_forever(cleanup_interval));

    // --- Start the web server ---

    let addr: SocketAddr = format!("{}:{}", config.app.host, config.app.port)
        .parse()
        .context("HOST/PORT do not form a socket address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {:?}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
