mod analysis;
mod candles;
mod coingecko;
mod config;
mod error;
mod indicators;
mod logging;
mod report;
mod scoring;
mod storage_utils;
mod table_view;
mod telegram;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coingecko::CoinGeckoClient;
use config::AppConfig;
use logging::LogTarget;
use report::Session;
use std::path::PathBuf;
use std::time::Duration;
use storage_utils::AsyncStorageManager;
use telegram::{Notifier, TelegramNotifier};
use tracing::info;

#[derive(Parser)]
#[command(name = "bullish-screener")]
#[command(about = "Crypto bullish-signal dashboard with RSI, EMA and Telegram alerts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory holding config.json (default: storage/ next to the binary)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Log level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of assets taken from the market-cap listing
    #[arg(long)]
    top_n: Option<u32>,

    /// Days of candles fetched per asset
    #[arg(long)]
    days: Option<u32>,

    /// Quote currency, e.g. usd or eur
    #[arg(long)]
    vs_currency: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive dashboard (default)
    Tui,

    /// Run one pass and print the tables
    Scan {
        /// Print the pass as JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Run passes repeatedly in one session
    Watch {
        /// Seconds between passes
        #[arg(short, long, default_value = "300")]
        interval_secs: u64,
    },

    /// Show the indicators of one asset
    Inspect {
        /// Asset id as used by the price API, e.g. bitcoin
        asset_id: String,
    },
}

async fn load_config(cli: &Cli, storage: &AsyncStorageManager) -> Result<AppConfig> {
    let mut config: AppConfig = storage
        .load_or_init("config", AppConfig::default())
        .await
        .with_context(|| format!("cannot load config from {}", storage.base_dir.display()))?;
    config.apply_env_overrides();

    if let Some(top_n) = cli.top_n {
        config.market.top_n = top_n;
    }
    if let Some(days) = cli.days {
        config.market.lookback_days = days;
    }
    if let Some(vs_currency) = &cli.vs_currency {
        config.market.vs_currency = vs_currency.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let command = cli.command.take().unwrap_or(Commands::Tui);

    let storage = match &cli.storage_dir {
        Some(dir) => AsyncStorageManager::new_at(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };

    let log_target = match command {
        Commands::Tui => LogTarget::File(storage.path_for("dashboard.log")),
        _ => LogTarget::Stderr,
    };
    logging::init_logging(&cli.log_level, log_target)?;

    let config = load_config(&cli, &storage).await?;
    let feed = CoinGeckoClient::new(&config.market)?;
    let telegram = TelegramNotifier::from_config(&config.telegram)?;
    let notifier = telegram.as_ref().map(|n| n as &dyn Notifier);
    if notifier.is_none() {
        info!("telegram credentials not set, alerts disabled");
    }

    match command {
        Commands::Tui => tui::run_tui(&feed, notifier, &config).await,
        Commands::Scan { json } => {
            let mut session = Session::new();
            if let Some(notifier) = notifier {
                if let Some(outcome) = session.announce(notifier).await {
                    eprintln!("{outcome}");
                }
            }
            let snapshot = analysis::run_pass(&feed, notifier, &mut session, &config).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", table_view::render_snapshot(&snapshot, &config.indicators));
            }
            Ok(())
        }
        Commands::Watch { interval_secs } => {
            let mut session = Session::new();
            let interval = Duration::from_secs(interval_secs.max(1));
            loop {
                let mut announcement = None;
                if let Some(notifier) = notifier {
                    announcement = session.announce(notifier).await;
                }
                let snapshot = analysis::run_pass(&feed, notifier, &mut session, &config).await;

                clearscreen::clear()?;
                if let Some(outcome) = announcement {
                    println!("{outcome}");
                }
                println!("{}", table_view::render_snapshot(&snapshot, &config.indicators));
                println!(
                    "\nNext pass in {}s ({} asset(s) alerted this session). Ctrl+C to stop.",
                    interval.as_secs(),
                    session.notified_count()
                );

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!(alerts_sent = session.notified_count(), "session closed");
                        return Ok(());
                    }
                }
            }
        }
        Commands::Inspect { asset_id } => {
            let detail = analysis::inspect_asset(&feed, &asset_id, &config.indicators).await?;
            println!("{}", table_view::render_detail(&detail, &config.indicators));
            Ok(())
        }
    }
}
