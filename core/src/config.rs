//! Configuration loading
//!
//! Loads configuration from `~/.config/dispatchlog/config.toml` (or the
//! `DISPATCHLOG_CONFIG` env override). Every field has a default, so a
//! missing file yields a fully usable configuration.

use crate::errors::{DispatchError, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for the dispatch logbook
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Path to the SQLite logbook database
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Spreadsheet sync settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Label scanning settings
    #[serde(default)]
    pub ocr: OcrConfig,
}

fn default_db_path() -> String {
    dirs::home_dir()
        .map(|h| {
            h.join(".config")
                .join("dispatchlog")
                .join("dispatch.db")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "dispatch.db".to_string())
}

/// Spreadsheet sync configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Master switch for webhook uploads
    #[serde(default = "default_sync_enabled")]
    pub enabled: bool,

    /// Webhook endpoint that appends summary rows
    #[serde(default)]
    pub webhook_url: String,

    /// Human-facing spreadsheet URL, shown after a successful sync
    #[serde(default)]
    pub spreadsheet_url: String,

    /// Upload deadline in seconds
    #[serde(default = "default_sync_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sync_enabled() -> bool {
    true
}
fn default_sync_timeout_secs() -> u64 {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_sync_enabled(),
            webhook_url: String::new(),
            spreadsheet_url: String::new(),
            timeout_secs: default_sync_timeout_secs(),
        }
    }
}

/// Label scanning configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// Per-frame recognition deadline in seconds
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ocr_timeout_secs() -> u64 {
    5
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            sync: SyncConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

impl AppConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "DISPATCHLOG_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "config.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `DISPATCHLOG_CONFIG` environment variable
    /// 2. `~/.config/dispatchlog/config.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)
            .map_err(|e| DispatchError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve the configuration file path
    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("dispatchlog")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.sync.enabled && self.sync.webhook_url.is_empty() {
            tracing::warn!("Sync enabled but webhook_url is empty; uploads will fail at runtime");
        }

        if self.sync.timeout_secs == 0 {
            return Err(DispatchError::config(
                "sync.timeout_secs must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Get the resolved database path (expanding ~ if needed)
    pub fn resolved_db_path(&self) -> PathBuf {
        let path = &self.db_path;
        if let Some(stripped) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(stripped);
        }
        PathBuf::from(path)
    }

    /// Upload deadline as a `Duration`
    pub fn sync_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = AppConfig::default();
        assert!(cfg.sync.enabled);
        assert_eq!(cfg.sync.timeout_secs, 10);
        assert_eq!(cfg.ocr.timeout_secs, 5);
        assert!(cfg.sync.webhook_url.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            db_path = "/tmp/dispatch.db"
        "#;

        let cfg = AppConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.db_path, "/tmp/dispatch.db");
        // Defaults should be applied
        assert!(cfg.sync.enabled);
        assert_eq!(cfg.sync.timeout_secs, 10);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            db_path = "~/.config/dispatchlog/dispatch.db"

            [sync]
            enabled = false
            webhook_url = "https://script.example.com/exec"
            spreadsheet_url = "https://sheets.example.com/d/abc"
            timeout_secs = 30

            [ocr]
            timeout_secs = 8
        "#;

        let cfg = AppConfig::parse(toml).expect("should parse");
        assert!(!cfg.sync.enabled);
        assert_eq!(cfg.sync.webhook_url, "https://script.example.com/exec");
        assert_eq!(cfg.sync.timeout_secs, 30);
        assert_eq!(cfg.ocr.timeout_secs, 8);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let toml = r#"
            [sync]
            timeout_secs = 0
        "#;

        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_resolved_db_path_expands_home() {
        let cfg = AppConfig {
            db_path: "~/data/dispatch.db".to_string(),
            ..AppConfig::default()
        };
        let resolved = cfg.resolved_db_path();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolved, home.join("data/dispatch.db"));
        }
    }
}
