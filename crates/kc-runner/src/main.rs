//! # kc-runner
//!
//! Runs the KuCoin public market-data session from a JSON config file and
//! logs session events until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! kc-runner config/kucoin.json --log-level info
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use kc_md::MdModule;
use kc_md::event::{SessionEvent, SessionEventReceiver};
use kc_md::kucoin::{KucoinMd, SessionConfig};

/// KuCoin public market data runner.
#[derive(Parser)]
#[command(name = "kc-runner", about = "KuCoin public market data runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = kc_core::config::load_config(&cli.config)?;
    let module_name = config.module_name();

    // 2. Initialize logging (CLI directory wins over the config's)
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    kc_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &module_name);
    info!("kc-runner starting, config={}, log_level={}", cli.config.display(), cli.log_level);

    // 3. Build the module
    let session_config = SessionConfig::from_feed(&config.feed)?;
    info!(
        "feed: {} ticker(s), {} candle(s), retry {:?}",
        session_config.tickers.len(),
        session_config.candles.len(),
        session_config.retry_timeout
    );
    let mut module = KucoinMd::new(module_name, session_config);
    let printer = tokio::spawn(log_events(module.session().events()));

    // 4. Start
    module.start().await?;
    info!("module '{}' started, press Ctrl+C to stop", module.name());

    // 5. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    if let Err(e) = module.stop().await {
        error!("error stopping '{}': {e}", module.name());
    }
    printer.abort();
    info!("stopped");
    Ok(())
}

async fn log_events(mut rx: SessionEventReceiver) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::Ticker(t)) => {
                info!(
                    "ticker {} price={} bid={} ask={} seq={}",
                    t.symbol, t.price, t.best_bid, t.best_ask, t.sequence
                )
            }
            Ok(SessionEvent::Candle(c)) => info!(
                "candle {} {} start={} o={} h={} l={} c={} v={} closed={}",
                c.symbol,
                c.interval,
                c.start_time,
                c.open,
                c.high,
                c.low,
                c.close,
                c.volume,
                c.closed
            ),
            Ok(SessionEvent::Subscriptions(keys)) => {
                let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
                debug!("subscriptions: [{}]", keys.join(", "));
            }
            Ok(SessionEvent::Reconnect { subscriptions }) => {
                warn!("reconnecting with {subscriptions} subscription(s)")
            }
            Ok(SessionEvent::SocketNotReady(msg)) => warn!("socket not ready: {msg}"),
            Ok(SessionEvent::Error(msg)) => error!("session error: {msg}"),
            Err(RecvError::Lagged(n)) => warn!("event printer lagged, {n} event(s) skipped"),
            Err(RecvError::Closed) => break,
        }
    }
}
