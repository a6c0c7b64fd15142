use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tally::{
    AggregationService,
    api::{ApiConfig, ApiState, spawn_api_server},
    config::{ServerConfig, ServerOverrides, read_config_file},
    integrity::Signer,
    storage,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on (host:port)
    #[arg(short, long)]
    address: Option<String>,

    /// Key for HashSHA256 verification and signing
    #[arg(short, long)]
    key: Option<String>,

    /// Seconds between snapshot exports, 0 for write-through
    #[arg(short = 'i', long)]
    store_interval: Option<u64>,

    /// Snapshot file
    #[arg(short = 'f', long)]
    file_storage_path: Option<PathBuf>,

    /// Load the snapshot file on startup
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true")]
    restore: Option<bool>,

    /// SQLite database, selects relational storage
    #[arg(short = 'd', long)]
    database_dsn: Option<String>,
}

impl From<Args> for ServerOverrides {
    fn from(args: Args) -> Self {
        ServerOverrides {
            address: args.address,
            key: args.key,
            store_interval: args.store_interval,
            file_storage_path: args.file_storage_path,
            restore: args.restore,
            database_dsn: args.database_dsn,
        }
    }
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("tally", LevelFilter::DEBUG),
        ("tally_server", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(args: Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => ServerConfig::default(),
    };

    config.apply(args.into());
    config.apply(ServerOverrides::from_env()?);

    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = load_config(args)?;
    info!("storage: {:?}", config.storage);

    let backend = storage::open(&config.storage)
        .await
        .context("failed to open storage")?;
    let service = Arc::new(AggregationService::new(backend));
    let signer = Signer::from_key(config.key.as_deref());

    let api_config = ApiConfig {
        bind_addr: config.address.clone(),
    };
    let (_, server) = spawn_api_server(
        api_config,
        ApiState::new(service.clone(), signer),
        shutdown_signal(),
    )
    .await?;

    server.await.context("API server task failed")?;

    info!("shutting down");
    service.close().await?;

    Ok(())
}
