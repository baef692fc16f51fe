use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vestibule::auth::backend::SqliteAuthBackend;
use vestibule::config::Config;
use vestibule::AppState;

#[derive(Parser, Debug)]
#[command(name = "vestibule")]
#[command(author, version, about = "Multi-tenant authentication gateway and organization service", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "vestibule.toml")]
    config: PathBuf,

    /// Log level override (RUST_LOG wins when set)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    init_tracing(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    tracing::info!("Starting Vestibule v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db = vestibule::db::init(&config.server.data_dir).await?;

    let backend = Arc::new(SqliteAuthBackend::new(db.clone(), config.auth.clone()));
    let state = Arc::new(AppState::new(config.clone(), db, backend));
    let app = vestibule::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Public URL: {}", config.server.public_url);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Ctrl+C handler installation failed");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining");
}
