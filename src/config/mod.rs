pub mod device_config;
pub mod link_config;
pub mod mapping_config;

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::device_config::{ScanConfig, SupervisorConfig, VirtualDeviceConfig};
use crate::config::link_config::{LinkConfig, PipelineConfig};
use crate::config::mapping_config::MappingConfig;
use crate::utils::ensure_directory_exists;

const CONFIG_DIR_NAME: &str = "steamlink-bridge";
const CONFIG_FILE_NAME: &str = "bridge_config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub pipeline: PipelineConfig,
    pub mapping: MappingConfig,
    pub scan: ScanConfig,
    pub virtual_device: VirtualDeviceConfig,
    pub supervisor: SupervisorConfig,
}

impl AppConfig {
    /// Default location: `<config dir>/steamlink-bridge/bridge_config.json`.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("No configuration directory on this platform"))?;
        Ok(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads the config from a file, falling back to defaults when it does not exist.
    pub async fn load_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config, creating the parent directory when needed.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(parent) = file_path.parent() {
            ensure_directory_exists(parent).await?;
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize bridge config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;
        info!("Bridge config saved to {:?}.", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("steamlink-bridge-test-{}-{}", tag, std::process::id()))
            .join(CONFIG_FILE_NAME)
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let path = temp_config_path("missing");
        let config = AppConfig::load_config(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.link.max_retries, 3);
        assert_eq!(config.pipeline.queue_capacity, 128);
    }

    #[tokio::test]
    async fn save_then_load_keeps_changes() {
        let path = temp_config_path("save");
        let mut config = AppConfig::default();
        config.mapping.swap_face_buttons = true;
        config.link.retry_backoff_ms = 250;
        config.save_config(&path).await.unwrap();

        let loaded = AppConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "link": { "max_retries": 5 } }"#).unwrap();
        assert_eq!(config.link.max_retries, 5);
        assert_eq!(config.link.retry_backoff_ms, 500);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }
}
