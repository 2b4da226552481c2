use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use zid_correlation::CorrelationConfig;

/// A statically configured authentication mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMount {
    pub accessor: String,
    pub path: String,
    pub mount_type: String,
}

/// Admin tool configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to RocksDB database
    pub database_path: PathBuf,

    /// Mounts seeded into the registry
    pub mounts: Vec<StaticMount>,

    /// Lock stripes per lock class
    pub lock_slots: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_path = std::env::var("DATABASE_PATH")
            .unwrap_or_else(|_| "./data/zid-identity.db".to_string())
            .into();

        let mounts = match std::env::var("ZID_MOUNTS") {
            Ok(raw) => parse_mounts(&raw)?,
            Err(_) => Vec::new(),
        };

        let lock_slots = std::env::var("ZID_LOCK_SLOTS")
            .unwrap_or_else(|_| "256".to_string())
            .parse()
            .context("ZID_LOCK_SLOTS must be a positive integer")?;
        if lock_slots == 0 {
            bail!("ZID_LOCK_SLOTS must be a positive integer");
        }

        Ok(Config {
            database_path,
            mounts,
            lock_slots,
        })
    }

    pub fn correlation(&self) -> CorrelationConfig {
        CorrelationConfig {
            lock_slots: self.lock_slots,
        }
    }
}

/// Parse `accessor=path:type` entries separated by commas
pub fn parse_mounts(raw: &str) -> Result<Vec<StaticMount>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (accessor, rest) = entry
                .split_once('=')
                .with_context(|| format!("mount entry '{entry}' is missing '='"))?;
            let (path, mount_type) = rest
                .rsplit_once(':')
                .with_context(|| format!("mount entry '{entry}' is missing ':type'"))?;
            if accessor.is_empty() || path.is_empty() || mount_type.is_empty() {
                bail!("mount entry '{entry}' has an empty field");
            }
            Ok(StaticMount {
                accessor: accessor.to_string(),
                path: path.to_string(),
                mount_type: mount_type.to_string(),
            })
        })
        .collect()
}
