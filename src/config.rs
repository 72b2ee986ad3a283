use std::path::Path;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::ScanFilter;
use crate::utils::ensure_directory_exists;

/// Default capacity of the live event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scan filter applied while discovering devices.
    pub scan: ScanFilter,

    /// Capacity of the live event broadcast channel. Slow subscribers
    /// that fall further behind than this start missing events.
    pub event_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            scan: ScanFilter::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Loads the config from a configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using defaults.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_directory_exists(parent).await?;
        }

        let config_json = serde_json::to_string_pretty(self)?;
        fs::write(path, config_json).await?;

        info!("Config saved to {:?}.", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("gattscope-test-no-such-config.json");
        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert!(config.scan.name_prefix.is_none());
        assert!(!config.scan.named_only);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "gattscope-test-config-{}.json",
            std::process::id()
        ));
        let config = AppConfig {
            scan: ScanFilter {
                name_prefix: Some("Gear".into()),
                named_only: true,
                min_rssi: Some(-70),
            },
            event_capacity: 64,
        };
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.event_capacity, 64);
        assert_eq!(loaded.scan.name_prefix.as_deref(), Some("Gear"));
        assert!(loaded.scan.named_only);
        assert_eq!(loaded.scan.min_rssi, Some(-70));

        let _ = fs::remove_file(&path).await;
    }

    #[test]
    fn partial_json_fills_missing_fields() {
        let config: AppConfig = serde_json::from_str(r#"{"scan":{"named_only":true}}"#).unwrap();
        assert!(config.scan.named_only);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }
}
