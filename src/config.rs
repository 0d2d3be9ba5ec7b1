//! Repository configuration.
//!
//! Settings are layered: built-in defaults, then an optional file (any
//! format the `config` crate understands, TOML being the usual one), then
//! environment variables prefixed `METAREPO__`, with `__` separating
//! sections, e.g. `METAREPO__CACHE__MAX_SIZE=5000`.
//!
//! ```toml
//! [database]
//! path = "metarepo.db"
//! deadlock_max_retries = 100
//! busy_timeout_ms = 0
//!
//! [cache]
//! max_size = 1000
//! idle_check_interval = 60
//! ```
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// No path means a private in-memory database.
    pub path: Option<String>,
    pub deadlock_max_retries: u32,
    pub deadlock_backoff_ms: u64,
    /// How long SQLite itself waits on a busy database before reporting it.
    /// Zero reports at once and leaves waiting to the retry loop.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            deadlock_max_retries: 100,
            deadlock_backoff_ms: 200,
            busy_timeout_ms: 0,
        }
    }
}

impl DatabaseConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.deadlock_backoff_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    /// Seconds between background sweeps, zero disables the sweeper.
    pub idle_check_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            idle_check_interval: 60,
        }
    }
}

impl CacheConfig {
    pub fn idle_interval(&self) -> Option<Duration> {
        match self.idle_check_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub dispose_batch_size: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            dispose_batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub repository: RepositoryConfig,
}

impl Configuration {
    /// Loads configuration from `path` (if it exists) overlaid by the
    /// environment. Missing keys fall back to the defaults.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.as_ref()).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("METAREPO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize::<Configuration>()?)
    }

    /// In-memory database, default cache settings, no background sweeper.
    pub fn in_memory() -> Self {
        let mut configuration = Self::default();
        configuration.cache.idle_check_interval = 0;
        configuration
    }
}
