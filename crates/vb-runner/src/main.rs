//! # vb-runner
//!
//! Main entry point for the volatility-breakout trading engine.
//!
//! Loads a JSON configuration file, connects to Upbit (or a simulated
//! exchange with `--paper`), starts the configured users and runs the
//! scheduler until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! vb-runner config.json --log-level info
//! vb-runner config.json --paper
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use vb_core::QUOTE_CURRENCY;
use vb_core::logging::LogFormat;
use vb_core::time_util::offset_from_hours;
use vb_core::trading::available;
use vb_engine::clock::SystemClock;
use vb_engine::engine::Engine;
use vb_exchange::paper::PaperExchange;
use vb_exchange::upbit::UpbitClient;
use vb_exchange::{ExchangeGateway, MarketDataSource};

/// Volatility-Breakout Trading Runner.
#[derive(Parser)]
#[command(name = "vb-runner", about = "Volatility-Breakout Trading Runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log directory for file output (overrides `app.log_path`).
    #[arg(long)]
    log_dir: Option<String>,

    /// Log file encoding (text, json).
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Fill orders against a simulated account instead of the real exchange.
    #[arg(long)]
    paper: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = vb_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let module_name = config.module_name("vb-runner");
    let log_dir = config.log_dir(cli.log_dir.as_deref());
    vb_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &module_name, cli.log_format)?;

    info!(
        "{module_name} starting — config={}, log_level={}, log_dir={}, paper={}",
        cli.config.display(),
        cli.log_level,
        log_dir.as_deref().unwrap_or("-"),
        cli.paper
    );
    info!(
        "config loaded — {} asset(s), {} user(s)",
        config.strategy.assets.len(),
        config.users.len()
    );

    // 3. Exchange collaborators
    let upbit = Arc::new(UpbitClient::new(&config.exchange)?);
    let market: Arc<dyn MarketDataSource> = upbit.clone();
    let gateway: Arc<dyn ExchangeGateway> = if cli.paper {
        Arc::new(PaperExchange::new(Arc::clone(&market), &config.paper))
    } else {
        upbit
    };

    // 4. Build, prime and start the engine
    let clock = Arc::new(SystemClock::new(offset_from_hours(config.schedule.utc_offset_hours)));
    let mut engine = Engine::new(&config, market, gateway, clock)?;
    engine.prime().await;
    engine.start();

    let api = engine.api();
    for user in config.users.iter().filter(|u| u.autostart) {
        if let Err(e) = api.start(&user.user_id, user.asset.currency(), user.credential()) {
            error!("user '{}' failed to start: {e}", user.user_id);
            continue;
        }
        match api.accounts(&user.user_id).await {
            Ok(balances) => info!(
                "user '{}' trading {} with {:.0} {QUOTE_CURRENCY} available",
                user.user_id,
                user.asset,
                available(&balances, QUOTE_CURRENCY)
            ),
            Err(e) => warn!("user '{}' trading {}, account check failed: {e}", user.user_id, user.asset),
        }
    }

    info!("engine running — press Ctrl+C to stop");

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // 6. Stop users, then the engine
    for user in engine.service().running_users() {
        api.stop(&user).ok();
    }
    engine.stop();

    info!("engine stopped — goodbye");
    Ok(())
}
