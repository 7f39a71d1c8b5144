//! cardvault-scan - card photo scanning service
//!
//! Resolves card photos to catalog entries and keeps them in expiring
//! batches and durable collections. Default port: 5730.

use anyhow::{bail, Context, Result};
use cardvault_common::config::{load_toml_or_default, resolve_root_folder};
use cardvault_common::{SystemClock, UserId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cardvault_scan::auth::TokenVerifier;
use cardvault_scan::config::{self, ServiceConfig, ROOT_FOLDER_ENV};
use cardvault_scan::db;
use cardvault_scan::services::{ExpirySweeper, GoogleVisionClient, YgoProDeckClient};
use cardvault_scan::AppState;

#[derive(Debug, Parser)]
#[command(name = "cardvault-scan", version, about = "Card photo scanning service")]
struct Cli {
    /// TOML config file (default: ~/.config/cardvault/config.toml)
    #[arg(long, env = "CARDVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve {
        /// Listen address, overrides `bind` in the config file
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print a bearer token for a user id
    IssueToken { user_id: String },
    /// Store the Cloud Vision API key in the database
    SetVisionKey { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let mut service_config: ServiceConfig = load_toml_or_default(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                service_config.bind = bind;
            }
            serve(&cli.config, cli.root_folder, service_config).await
        }
        Command::IssueToken { user_id } => {
            let secret = config::resolve_token_secret(&service_config.auth).with_context(|| {
                format!(
                    "No token secret configured (set {} or auth.token_secret)",
                    config::TOKEN_SECRET_ENV
                )
            })?;
            println!("{}", TokenVerifier::new(secret).issue_token(&UserId::new(user_id)));
            Ok(())
        }
        Command::SetVisionKey { key } => {
            if !config::is_valid_key(&key) {
                bail!("Vision API key must not be empty");
            }
            let pool = open_database(&cli.config, cli.root_folder).await?;
            db::settings::set_vision_api_key(&pool, key).await?;
            info!("Vision API key stored in database");
            Ok(())
        }
    }
}

async fn open_database(
    config_path: &Option<PathBuf>,
    root_folder: Option<PathBuf>,
) -> Result<sqlx::SqlitePool> {
    // CLI → CARDVAULT_ROOT → config file → OS default
    let root_folder =
        resolve_root_folder(root_folder.as_deref(), ROOT_FOLDER_ENV, config_path.as_deref());

    let db_path = root_folder.join(db::DATABASE_FILE);
    info!("Database: {}", db_path.display());

    let pool = db::init_database_pool(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    Ok(pool)
}

async fn serve(
    config_path: &Option<PathBuf>,
    root_folder: Option<PathBuf>,
    service_config: ServiceConfig,
) -> Result<()> {
    info!("Starting cardvault-scan");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let pool = open_database(config_path, root_folder).await?;
    info!("Database connection established");

    let vision_key = config::resolve_vision_api_key(&pool, &service_config).await?;
    let detector = GoogleVisionClient::new(
        service_config.vision.endpoint.clone(),
        vision_key,
        service_config.vision.timeout(),
        service_config.vision.min_interval(),
    )?;
    let catalog = YgoProDeckClient::new(
        service_config.catalog.base_url.clone(),
        service_config.catalog.timeout(),
        service_config.catalog.min_interval(),
    )?;

    let token_secret = match config::resolve_token_secret(&service_config.auth) {
        Some(secret) => secret,
        None => {
            warn!(
                "No token secret configured (set {}); tokens will not survive a restart",
                config::TOKEN_SECRET_ENV
            );
            uuid::Uuid::new_v4().to_string()
        }
    };

    let state = AppState::new(
        pool,
        &service_config,
        Arc::new(detector),
        Arc::new(catalog),
        Arc::new(SystemClock),
        TokenVerifier::new(token_secret),
    );

    let sweeper = ExpirySweeper::new(
        state.batches.clone(),
        state.collections.clone(),
        service_config.sweeper.interval(),
    )
    .spawn();

    let app = cardvault_scan::build_router(state);

    let addr = service_config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
