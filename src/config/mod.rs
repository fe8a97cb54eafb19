//! Typed configuration.
//!
//! [`Config`] is the application-level configuration read from environment
//! variables; [`GateConfig`] is the per-gate behaviour, usually loaded from
//! a TOML file named by `ACTGATE_CONFIG`.

pub mod gate;

pub use gate::{DedupeConfig, DedupeMode, GateConfig};

use crate::error::Result;
use std::path::PathBuf;

#[derive(Debug)]
pub struct Config {
    pub gate_config_path: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Self {
        Self {
            gate_config_path: std::env::var("ACTGATE_CONFIG").ok().map(PathBuf::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Resolve the gate configuration: the file at `gate_config_path` when
    /// set, defaults otherwise.
    pub fn gate(&self) -> Result<GateConfig> {
        match &self.gate_config_path {
            Some(path) => GateConfig::load(path),
            None => Ok(GateConfig::default()),
        }
    }
}
