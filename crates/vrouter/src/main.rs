//! # vrouter - overlay network coordination
//!
//! Hosts claim a renewable liveness lease and receive a disjoint subnet
//! carved out of the cell network. All exclusivity comes from the
//! coordination store's conditional writes.
//!
//! ## Architecture
//! ```text
//! init ──▶ subnet allocator ──▶ overlay registry ──┐
//!                                                 ▼
//! daemon ──▶ lease manager ──────────────▶ coordination store (Redis)
//!    └──▶ bind host net / status endpoint ────────┘
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod config;
mod context;
mod lease;
mod registry;
mod routes;
mod store;
mod subnet;

use commands::{daemon::DaemonArgs, init::InitArgs, service::ServiceArgs, show::ShowArgs};
use config::AppConfig;
use context::AppContext;

/// vrouter - routing for distributed containers
#[derive(Parser, Debug)]
#[command(name = "vrouter")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config/vrouter.toml", global = true)]
    config: String,

    /// Coordination store URL (overrides config)
    #[arg(long, env = "VROUTER_STORE_URL", global = true)]
    store_url: Option<String>,

    /// Registry key prefix (overrides config)
    #[arg(long, env = "VROUTER_PREFIX", global = true)]
    prefix: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Init the machine registry with per-host subnets
    Init(InitArgs),
    /// Hold this host's liveness lease and bind its subnet
    #[command(long_flag = "daemon", short_flag = 'd')]
    Daemon(DaemonArgs),
    /// Manage service descriptors
    Service(ServiceArgs),
    /// Show the registry contents for the overlay and a host
    Show(ShowArgs),
}

#[tokio::main]
async fn main() {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs);

    if let Err(e) = run(args).await {
        error!(error = ?e, "Fatal error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    info!("🔥 Starting vrouter v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!(
        store = %config.store_url,
        prefix = %config.registry_prefix,
        "📋 Configuration loaded from {}", args.config
    );

    let ctx = AppContext::new(config).await?;
    ctx.ping().await?;

    match args.command {
        Command::Init(a) => commands::init::run(&ctx, a).await,
        Command::Daemon(a) => commands::daemon::run(&ctx, a).await,
        Command::Service(a) => commands::service::run(&ctx, a).await,
        Command::Show(a) => commands::show::run(&ctx, a).await,
    }
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}
