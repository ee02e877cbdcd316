use anyhow::Result;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub enum LogTarget {
    Stderr,
    /// Appends to a file; used while the TUI owns the terminal.
    File(PathBuf),
}

/// `RUST_LOG` wins over `log_level` when set.
pub fn init_logging(log_level: &str, target: LogTarget) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match target {
        LogTarget::Stderr => registry.with(fmt::layer().with_writer(std::io::stderr)).try_init()?,
        LogTarget::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()?
        }
    }

    tracing::debug!("Logging initialized at level: {}", log_level);
    Ok(())
}
