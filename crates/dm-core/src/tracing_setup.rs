use std::fs::OpenOptions;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber for binaries embedding the store.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `info`). When
/// `DM_LOG_FILE` is set, a debug-level file layer is added as well.
pub fn init_tracing() -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let registry = tracing_subscriber::registry().with(stderr_layer);

    match std::env::var("DM_LOG_FILE").ok() {
        Some(log_path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("failed to open log file {}", log_path))?;

            let file_layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(tracing_subscriber::filter::LevelFilter::DEBUG);

            registry
                .with(file_layer)
                .try_init()
                .context("tracing subscriber already installed")?;
        }
        None => {
            registry
                .try_init()
                .context("tracing subscriber already installed")?;
        }
    }

    Ok(())
}
