use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::construct::DEFAULT_VARIATION;
use crate::error::{DEFAULT_ERROR_CAPACITY, Result};
use crate::interface::CallOptions;

/// Session settings, read from an optional file and `CCDB_*` environment
/// variables (`CCDB_CONNECTION=sqlite://calib.db`, `CCDB_TIMEOUT_MS=500`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `memory`, `sqlite::memory:` or `sqlite://<path>`.
    pub connection: String,
    pub default_variation: String,
    pub error_capacity: usize,
    /// Entities of each kind the session cache keeps.
    pub cache_capacity: usize,
    pub timeout_ms: Option<u64>,
    pub user_name: String,
    /// Used by the binary when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection: String::from("memory"),
            default_variation: DEFAULT_VARIATION.to_string(),
            error_capacity: DEFAULT_ERROR_CAPACITY,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            timeout_ms: None,
            user_name: std::env::var("USER").unwrap_or_else(|_| String::from("anonymous")),
            log_filter: String::from("info"),
        }
    }
}

impl Settings {
    /// Defaults, then the file (when given and present), then the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("CCDB").try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    /// Reads settings from TOML text, without consulting the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    pub fn call_options(&self) -> CallOptions {
        let options = CallOptions::default();
        match self.timeout_ms {
            Some(ms) => options.with_timeout(Duration::from_millis(ms)),
            None => options,
        }
    }
}
