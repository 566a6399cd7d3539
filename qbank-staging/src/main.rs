//! qbank-staging - Question Staging & Review Service
//!
//! Accepts bulk question submissions, runs duplicate detection against the
//! production corpus, and drives the review/import lifecycle over HTTP.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use qbank_common::config::ServiceConfig;
use qbank_common::db::init_database;
use qbank_staging::{build_router, AppState};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "qbank-staging", version, about = "Question staging and review service")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "QBANK_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port (overrides config file and environment)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides config file and environment)
    #[arg(long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!(
        "Starting Question Staging Service (qbank-staging) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();
    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database = database;
    }

    info!("Database path: {}", config.database.display());
    let pool = init_database(&config.database).await?;
    info!("✓ Database initialized");
    info!(
        threshold = config.detection.threshold,
        same_topic_only = config.detection.same_topic_only,
        "Duplicate detection policy"
    );

    let state = AppState::new(pool, config.detection.clone());
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("qbank-staging listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
