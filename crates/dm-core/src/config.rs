use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::DEFAULT_FLUSH_DEBOUNCE;

/// Directory name used under the platform data dir when no override is given.
const DEFAULT_DIR_NAME: &str = "dm_data";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    /// How long a dirty conversation waits before being written through.
    pub flush_debounce: Duration,
    /// When false the store runs purely in memory (no SQLite file is opened).
    pub persist: bool,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            flush_debounce: DEFAULT_FLUSH_DEBOUNCE,
            persist: true,
        }
    }

    /// In-memory configuration, used by tests and tooling that must not touch disk.
    pub fn in_memory() -> Self {
        Self {
            persist: false,
            ..Self::default()
        }
    }

    /// Default config with `DM_DATA_DIR` and `DM_FLUSH_DEBOUNCE_MS` overrides applied.
    pub fn from_env() -> Self {
        let mut config = match std::env::var("DM_DATA_DIR") {
            Ok(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::default(),
        };

        if let Some(ms) = std::env::var("DM_FLUSH_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.flush_debounce = Duration::from_millis(ms);
        }

        config
    }

    pub fn with_flush_debounce(mut self, debounce: Duration) -> Self {
        self.flush_debounce = debounce;
        self
    }

    /// Path of the SQLite file holding persisted conversations.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("messages.db")
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(DEFAULT_DIR_NAME))
    }
}
