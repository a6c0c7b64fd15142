use clap::Parser;
use tally::{
    agent::{AgentHandle, SystemSampler},
    config::{AgentConfig, AgentOverrides, read_config_file},
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<String>,

    /// Server address (host:port)
    #[arg(short, long)]
    address: Option<String>,

    /// Key for signing batches
    #[arg(short, long)]
    key: Option<String>,

    /// Seconds between captures
    #[arg(short, long)]
    poll_interval: Option<u64>,

    /// Seconds between flushes
    #[arg(short, long)]
    report_interval: Option<u64>,

    /// Concurrent delivery workers
    #[arg(short = 'l', long)]
    rate_limit: Option<usize>,
}

impl From<Args> for AgentOverrides {
    fn from(args: Args) -> Self {
        AgentOverrides {
            address: args.address,
            key: args.key,
            poll_interval: args.poll_interval,
            report_interval: args.report_interval,
            rate_limit: args.rate_limit,
        }
    }
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("tally", LevelFilter::DEBUG),
        ("tally_agent", LevelFilter::TRACE),
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

fn load_config(args: Args) -> anyhow::Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => AgentConfig::default(),
    };

    config.apply(args.into());
    config.apply(AgentOverrides::from_env()?);
    config.validate()?;

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = load_config(args)?;
    info!(
        "reporting to {} (poll {}s, report {}s, {} workers)",
        config.address, config.poll_interval, config.report_interval, config.rate_limit
    );

    let handle = AgentHandle::spawn(&config, SystemSampler::new())?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutting down");
    handle.shutdown().await?;

    Ok(())
}
