//! Configuration loaded at startup (§6).
//!
//! Deserialized from TOML with `serde`, the way `wkmp-common::config`
//! loads its own settings files. The shape matches the spec's
//! configuration map exactly: a `database_type` selector, a nested
//! `database` table passed through to the chosen backend, and an
//! optional `fingerprint_limit`.

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur while loading configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The config file was not valid TOML, or did not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Which store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// MySQL / MariaDB backend.
    Mysql,
    /// PostgreSQL backend.
    #[serde(alias = "postgres")]
    Postgresql,
}

/// Connection parameters for the selected backend.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,
    /// Database port. Defaults to the backend's standard port when absent.
    pub port: Option<u16>,
    /// Username.
    pub user: String,
    /// Password.
    pub password: String,
    /// Database name.
    pub database: String,
    /// Connection timeout, in seconds. Defaults to 10.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Selects the store backend.
    pub database_type: DatabaseType,
    /// Connection parameters passed through to the chosen backend.
    pub database: DatabaseConfig,
    /// Seconds of audio to fingerprint per file. `-1` or absent means
    /// "no limit", applied by the decoder.
    #[serde(default)]
    pub fingerprint_limit: Option<i64>,
}

impl Config {
    /// Loads configuration from a TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Resolves `fingerprint_limit` to the decoder's convention: `None`
    /// means "no limit", collapsing both an absent value and `-1`.
    pub fn fingerprint_limit_seconds(&self) -> Option<f64> {
        match self.fingerprint_limit {
            None => None,
            Some(limit) if limit <= 0 => None,
            Some(limit) => Some(limit as f64),
        }
    }
}

impl DatabaseConfig {
    /// Resolves the port, falling back to the backend's standard port.
    pub fn resolved_port(&self, database_type: DatabaseType) -> u16 {
        self.port.unwrap_or(match database_type {
            DatabaseType::Mysql => 3306,
            DatabaseType::Postgresql => 5432,
        })
    }
}
