// Configuration management for the pbgatt CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/pbgatt/config.json
// - Linux: ~/.config/pbgatt/config.json
// - Windows: %APPDATA%\pbgatt\config.json

use anyhow::{Context, Result};
use pbgatt_core::{BearerConfig, MAX_PROV_PDU_LEN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bearer settings
    pub bearer: BearerConfig,

    /// Receive buffer size handed out by the simulated proxy
    pub rx_buf_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bearer: BearerConfig::default(),
            rx_buf_size: MAX_PROV_PDU_LEN,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("pbgatt");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the default config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from `path`, or create it with defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<()> {
        self.bearer.validate().context("Invalid bearer config")?;
        if self.rx_buf_size == 0 {
            anyhow::bail!("rx_buf_size must be non-zero");
        }
        Ok(())
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "protocol_timeout_secs" => {
                updated.bearer.protocol_timeout_secs =
                    value.parse().context("Invalid number")?;
            }
            "min_pdu_len" => {
                updated.bearer.min_pdu_len = value.parse().context("Invalid number")?;
            }
            "rx_buf_size" => {
                updated.rx_buf_size = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "protocol_timeout_secs" => Some(self.bearer.protocol_timeout_secs.to_string()),
            "min_pdu_len" => Some(self.bearer.min_pdu_len.to_string()),
            "rx_buf_size" => Some(self.rx_buf_size.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "protocol_timeout_secs",
                self.bearer.protocol_timeout_secs.to_string(),
            ),
            ("min_pdu_len", self.bearer.min_pdu_len.to_string()),
            ("rx_buf_size", self.rx_buf_size.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().expect("Temp dir");
        let path = dir.path().join("config.json");

        let config = Config::load_from(&path).expect("Load");
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_set_persists_roundtrip() {
        let dir = tempfile::tempdir().expect("Temp dir");
        let path = dir.path().join("config.json");

        let mut config = Config::load_from(&path).expect("Load");
        config.set("protocol_timeout_secs", "5").expect("Set");
        config.save_to(&path).expect("Save");

        let reloaded = Config::load_from(&path).expect("Reload");
        assert_eq!(reloaded.bearer.protocol_timeout_secs, 5);
        assert_eq!(reloaded.get("protocol_timeout_secs"), Some("5".to_string()));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();

        assert!(config.set("protocol_timeout_secs", "0").is_err());
        assert!(config
            .set("protocol_timeout_secs", "18446744073709551615")
            .is_err());
        assert!(config.set("min_pdu_len", "abc").is_err());
        assert!(config.set("no_such_key", "1").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().expect("Temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"bearer": {"protocol_timeout_secs": 0}}"#).expect("Write");

        assert!(Config::load_from(&path).is_err());
    }
}
