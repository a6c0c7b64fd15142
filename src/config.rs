use std::path::PathBuf;

use anyhow::{Context, bail};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::util::{
    ADDRESS, DATABASE_DSN, FILE_STORAGE_PATH, KEY, POLL_INTERVAL, RATE_LIMIT, REPORT_INTERVAL,
    RESTORE, STORE_INTERVAL, get_default_address, parse_setting,
};

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    Memory,

    /// In-memory storage snapshotted to a JSON file
    File {
        #[serde(default = "default_file_path")]
        path: PathBuf,

        /// Seconds between exports; 0 exports after every write
        #[serde(default = "default_store_interval")]
        store_interval: u64,

        /// Seed the store from an existing file on startup
        #[serde(default)]
        restore: bool,
    },

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::File {
            path: default_file_path(),
            store_interval: default_store_interval(),
            restore: false,
        }
    }
}

fn default_file_path() -> PathBuf {
    PathBuf::from("/tmp/metrics-db.json")
}

fn default_store_interval() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

/// Accept both a plain path and a `sqlite:` URL
fn dsn_to_path(dsn: &str) -> PathBuf {
    let path = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn);
    PathBuf::from(path)
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` to listen on
    pub address: String,

    pub storage: StorageConfig,

    /// Shared key for `HashSHA256` request verification and response signing
    pub key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: get_default_address(),
            storage: StorageConfig::default(),
            key: None,
        }
    }
}

/// Server settings supplied by flags or the environment
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    pub address: Option<String>,
    pub key: Option<String>,
    pub store_interval: Option<u64>,
    pub file_storage_path: Option<PathBuf>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
}

impl ServerOverrides {
    /// Collect overrides from environment-style lookups
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            address: lookup(ADDRESS),
            key: lookup(KEY),
            store_interval: lookup(STORE_INTERVAL)
                .map(|raw| parse_setting(STORE_INTERVAL, &raw))
                .transpose()?,
            file_storage_path: lookup(FILE_STORAGE_PATH).map(PathBuf::from),
            restore: lookup(RESTORE)
                .map(|raw| parse_setting(RESTORE, &raw))
                .transpose()?,
            database_dsn: lookup(DATABASE_DSN),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(crate::util::get_env)
    }
}

impl ServerConfig {
    /// Layer `overrides` on top of the current values
    ///
    /// A database DSN always selects SQLite. File settings switch a memory
    /// configuration to file storage and are ignored once SQLite is selected.
    pub fn apply(&mut self, overrides: ServerOverrides) {
        let ServerOverrides {
            address,
            key,
            store_interval,
            file_storage_path,
            restore,
            database_dsn,
        } = overrides;

        if let Some(address) = address {
            self.address = address;
        }
        if let Some(key) = key {
            self.key = Some(key);
        }

        if let Some(dsn) = database_dsn {
            self.storage = StorageConfig::Sqlite {
                path: dsn_to_path(&dsn),
            };
            return;
        }

        if file_storage_path.is_none() && store_interval.is_none() && restore.is_none() {
            return;
        }

        let (mut path, mut interval, mut restore_on_start) = match &self.storage {
            StorageConfig::File {
                path,
                store_interval,
                restore,
            } => (path.clone(), *store_interval, *restore),
            StorageConfig::Memory => (default_file_path(), default_store_interval(), false),
            StorageConfig::Sqlite { .. } => {
                debug!("ignoring file storage settings, SQLite is configured");
                return;
            }
        };

        if let Some(file_storage_path) = file_storage_path {
            path = file_storage_path;
        }
        if let Some(store_interval) = store_interval {
            interval = store_interval;
        }
        if let Some(restore) = restore {
            restore_on_start = restore;
        }

        self.storage = StorageConfig::File {
            path,
            store_interval: interval,
            restore: restore_on_start,
        };
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `host:port` of the server
    pub address: String,

    /// Seconds between captures
    pub poll_interval: u64,

    /// Seconds between flushes
    pub report_interval: u64,

    /// Number of concurrent delivery workers
    pub rate_limit: usize,

    /// Shared key for signing request bodies
    pub key: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: get_default_address(),
            poll_interval: default_poll_interval(),
            report_interval: default_report_interval(),
            rate_limit: default_rate_limit(),
            key: None,
        }
    }
}

/// Agent settings supplied by flags or the environment
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    pub address: Option<String>,
    pub key: Option<String>,
    pub poll_interval: Option<u64>,
    pub report_interval: Option<u64>,
    pub rate_limit: Option<usize>,
}

impl AgentOverrides {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            address: lookup(ADDRESS),
            key: lookup(KEY),
            poll_interval: lookup(POLL_INTERVAL)
                .map(|raw| parse_setting(POLL_INTERVAL, &raw))
                .transpose()?,
            report_interval: lookup(REPORT_INTERVAL)
                .map(|raw| parse_setting(REPORT_INTERVAL, &raw))
                .transpose()?,
            rate_limit: lookup(RATE_LIMIT)
                .map(|raw| parse_setting(RATE_LIMIT, &raw))
                .transpose()?,
        })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(crate::util::get_env)
    }
}

impl AgentConfig {
    pub fn apply(&mut self, overrides: AgentOverrides) {
        if let Some(address) = overrides.address {
            self.address = address;
        }
        if let Some(key) = overrides.key {
            self.key = Some(key);
        }
        if let Some(poll_interval) = overrides.poll_interval {
            self.poll_interval = poll_interval;
        }
        if let Some(report_interval) = overrides.report_interval {
            self.report_interval = report_interval;
        }
        if let Some(rate_limit) = overrides.rate_limit {
            self.rate_limit = rate_limit;
        }
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval == 0 {
            bail!("poll interval must be at least 1 second");
        }
        if self.report_interval == 0 {
            bail!("report interval must be at least 1 second");
        }
        if self.rate_limit == 0 {
            bail!("rate limit must be at least 1");
        }
        Ok(())
    }
}

pub fn read_config_file<T>(path: &str) -> anyhow::Result<T>
where
    T: DeserializeOwned + std::fmt::Debug,
{
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
