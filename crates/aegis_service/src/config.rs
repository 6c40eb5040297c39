//! Service-level configuration: the decision-engine config (`aegis_core::AegisConfig`)
//! plus the ambient knobs around it (API port, persistence backend, detector
//! endpoints). Loaded once at startup from `~/.aegis/config.toml`, following
//! `qres_daemon::config::qres_data_dir`'s dirs-based fallback-to-local-dir routine.

use aegis_core::AegisConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Returns the `~/.aegis` directory, creating it if needed. Falls back to a
/// local `.aegis` directory if the home directory cannot be determined.
pub fn aegis_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(mut path) => {
            path.push(".aegis");
            if let Err(e) = fs::create_dir_all(&path) {
                warn!(error = %e, "could not create ~/.aegis, falling back to local .aegis");
                let fallback = PathBuf::from(".aegis");
                let _ = fs::create_dir_all(&fallback);
                return fallback;
            }
            path
        }
        None => {
            warn!("could not determine home directory, falling back to local .aegis");
            let fallback = PathBuf::from(".aegis");
            let _ = fs::create_dir_all(&fallback);
            fallback
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8090
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Detector/vision endpoints consumed by `detectors::HttpDetectorClient` (§6).
/// Left `None` by default so the CLI's demo path uses `MockDetectorClient`
/// without requiring real services to be reachable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub object_detector_url: Option<String>,
    pub vision_labeler_url: Option<String>,
    pub segmentation_url: Option<String>,
    pub vlm_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path to a SQLite database file. When absent, the CLI/API falls back
    /// to the in-memory repository.
    pub sqlite_path: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { sqlite_path: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub engine: AegisConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl ServiceConfig {
    pub fn config_path() -> PathBuf {
        aegis_data_dir().join("config.toml")
    }

    /// Loads the config from `~/.aegis/config.toml`, writing a default file
    /// the first time it is called (mirroring `qres_daemon::config::Config::load`).
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }
        let content = fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)?;
        config
            .engine
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid engine config: {e}"))?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        let toml = toml::to_string_pretty(self)?;
        fs::write(path, toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_config_has_valid_engine_config() {
        let config = ServiceConfig::default();
        assert!(config.engine.validate().is_ok());
    }
}
