//! Persistent application configuration
//!
//! Stores the benchmark configuration, the service name and the simulated
//! peer's behaviour in a JSON file at `<data_dir>/isobench/config.json`.

use isobench_core::{BenchConfig, SimSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_service_name() -> String {
    isobench_core::DEFAULT_SERVICE_NAME.to_string()
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// QoS and stream count for initiator passes
    #[serde(default)]
    pub bench: BenchConfig,
    /// Name the responder advertises and the initiator looks for
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Simulated peer behaviour
    #[serde(default)]
    pub sim: SimSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bench: BenchConfig::default(),
            service_name: default_service_name(),
            sim: SimSettings::default(),
        }
    }
}

impl AppConfig {
    /// Config file path: `<data_dir>/isobench/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("isobench")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load from `path` when given, otherwise from the default location
    ///
    /// # Returns
    /// The config and the path it is saved back to
    pub fn load_with_override(path: Option<PathBuf>) -> (Self, PathBuf) {
        match path {
            Some(path) => (Self::load_from(&path), path),
            None => (Self::load(), Self::path()),
        }
    }

    /// Load config from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}
