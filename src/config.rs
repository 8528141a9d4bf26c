//! Configuration for the ingestion pipeline.
//!
//! Settings load from a TOML file (`kbingest.toml` by default) with every
//! field optional, then environment overrides for the service endpoint
//! and credentials. Defaults match the documented configuration surface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parse_service::{ParseOptions, ParseServiceConfig};
use crate::retry::{BackoffStrategy, RetryPolicy};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "kbingest.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid retry strategy `{0}`, expected fixed, linear, or exponential")]
    InvalidRetryStrategy(String),
}

/// Parse service connection and task options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseServiceSettings {
    /// Base URL of the parse service.
    pub endpoint: String,
    /// Bearer token; `KBINGEST_API_KEY` overrides.
    pub api_key: Option<String>,
    /// Service backend, `pipeline` or `ocr`.
    pub backend: String,
    pub lang: String,
    pub method: String,
    pub formula_enable: bool,
    pub table_enable: bool,
    pub priority: i32,
    /// Timeout for each individual HTTP call, seconds.
    pub http_timeout_secs: u64,
    /// Interval between status polls, seconds.
    pub poll_interval_secs: u64,
    /// Overall deadline for one parse task, seconds.
    pub overall_timeout_secs: u64,
}

impl Default for ParseServiceSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:18000".to_string(),
            api_key: None,
            backend: "pipeline".to_string(),
            lang: "ch".to_string(),
            method: "auto".to_string(),
            formula_enable: true,
            table_enable: true,
            priority: 0,
            http_timeout_secs: 30,
            poll_interval_secs: 1,
            overall_timeout_secs: 600,
        }
    }
}

impl ParseServiceSettings {
    pub fn to_client_config(&self) -> ParseServiceConfig {
        ParseServiceConfig {
            endpoint: self.endpoint.trim_end_matches('/').to_string(),
            api_key: self.api_key.clone(),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            overall_timeout: Duration::from_secs(self.overall_timeout_secs),
            options: ParseOptions {
                backend: self.backend.clone(),
                lang: self.lang.clone(),
                method: self.method.clone(),
                formula_enable: self.formula_enable,
                table_enable: self.table_enable,
                priority: self.priority,
            },
        }
    }
}

/// Partitioning and concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    /// Pages per service call.
    pub batch_size: u32,
    /// Parallel range workers per document.
    pub max_concurrency: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            batch_size: 4,
            max_concurrency: 5,
        }
    }
}

/// Retry behavior for retryable service errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    /// `fixed`, `linear`, or `exponential`.
    pub strategy: String,
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    /// Optional per-attempt timeout, seconds.
    pub attempt_timeout_secs: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: "exponential".to_string(),
            base_delay_ms: 500,
            max_delay_secs: 60,
            attempt_timeout_secs: None,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let strategy = BackoffStrategy::from_str(&self.strategy)
            .ok_or_else(|| ConfigError::InvalidRetryStrategy(self.strategy.clone()))?;
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            strategy,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            attempt_timeout: self.attempt_timeout_secs.map(Duration::from_secs),
        })
    }
}

/// Store locations and the auto-DDL gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite file backing `element_meta_info`.
    pub meta_database: PathBuf,
    /// SQLite file backing `element_data`.
    pub content_database: PathBuf,
    /// When false (production default) a missing table is a startup
    /// failure pointing to the manual migration.
    pub auto_create_tables: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            meta_database: PathBuf::from("kbingest-meta.db"),
            content_database: PathBuf::from("kbingest-content.db"),
            auto_create_tables: false,
        }
    }
}

/// Optional image upload target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStoreSettings {
    pub enabled: bool,
    /// Bucket name recorded on metadata rows.
    pub bucket: String,
    /// Local directory backing the object store.
    pub root: PathBuf,
    /// Key prefix inside the bucket.
    pub prefix: String,
}

impl Default for ImageStoreSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket: "knowledge".to_string(),
            root: PathBuf::from("images"),
            prefix: "elements".to_string(),
        }
    }
}

/// Complete application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub parse_service: ParseServiceSettings,
    pub ingestion: IngestionSettings,
    pub retry: RetrySettings,
    pub stores: StoreSettings,
    pub image_store: ImageStoreSettings,
}

impl Settings {
    /// Load settings from an explicit path, or from `kbingest.toml` in
    /// the working directory when present, or defaults otherwise.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("KBINGEST_ENDPOINT") {
            if !endpoint.is_empty() {
                self.parse_service.endpoint = endpoint;
            }
        }
        if let Ok(api_key) = std::env::var("KBINGEST_API_KEY") {
            if !api_key.is_empty() {
                self.parse_service.api_key = Some(api_key);
            }
        }
    }

    /// Render the resolved settings as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
