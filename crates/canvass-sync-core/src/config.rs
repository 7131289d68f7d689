//! Application configuration management.
//!
//! Configuration is stored at `~/.config/canvass-sync/config.json`. Every
//! field has a default, so a missing file or a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "canvass-sync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

/// Longest dedup window or location age honoured; larger values are clamped.
const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub campaign_id: Option<String>,
    pub sync: SyncSettings,
    pub dedup: DedupSettings,
    pub cache: CacheSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            campaign_id: None,
            sync: SyncSettings::default(),
            dedup: DedupSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

/// What happens to an outbox item once it runs out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryExhaustion {
    /// Move the item to the dead-letter collection for manual recovery.
    #[default]
    DeadLetter,
    /// Delete the item outright.
    Discard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Failed attempts an outbox item may accumulate before it is abandoned.
    pub max_retries: u32,
    pub on_retry_exhausted: RetryExhaustion,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            on_retry_exhausted: RetryExhaustion::DeadLetter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub window_secs: u64,
    pub location_timeout_ms: u64,
    pub location_max_age_secs: u64,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            window_secs: 300,
            location_timeout_ms: 10_000,
            location_max_age_secs: 300,
        }
    }
}

impl DedupSettings {
    pub fn window(&self) -> chrono::Duration {
        clamped_seconds(self.window_secs)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location_timeout_ms)
    }

    pub fn location_max_age(&self) -> chrono::Duration {
        clamped_seconds(self.location_max_age_secs)
    }
}

fn clamped_seconds(secs: u64) -> chrono::Duration {
    // Fits i64 once clamped.
    chrono::Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// Settings for the request-intercepting cache controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Version token appended to every named cache. Changing it retires
    /// all caches created under the previous token on the next activation.
    pub version: String,
    pub prefix: String,
    /// Origin the shell assets are fetched from during install.
    pub origin: String,
    pub shell_assets: Vec<String>,
    /// Path+query regexes for API listings served network-first from cache.
    pub api_patterns: Vec<String>,
    pub static_prefixes: Vec<String>,
    pub image_extensions: Vec<String>,
    pub dashboard_path: String,
    pub offline_message: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            prefix: "canvass".to_string(),
            origin: "http://localhost:3000".to_string(),
            shell_assets: vec![
                "/".to_string(),
                "/dashboard".to_string(),
                "/offline".to_string(),
                "/manifest.json".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
            ],
            api_patterns: vec![
                r"^/api/campaigns/[^/]+/voters(\?.*)?$".to_string(),
                r"^/api/voters(\?.*)?$".to_string(),
                r"^/api/contacts(\?.*)?$".to_string(),
                r"^/api/districts(\?.*)?$".to_string(),
                r"^/api/plans(\?.*)?$".to_string(),
            ],
            static_prefixes: vec!["/_next/static/".to_string()],
            image_extensions: ["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            dashboard_path: "/dashboard".to_string(),
            offline_message: "You are offline. Please check your connection.".to_string(),
        }
    }
}

impl CacheSettings {
    pub fn static_cache_name(&self) -> String {
        format!("{}-static-{}", self.prefix, self.version)
    }

    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-dynamic-{}", self.prefix, self.version)
    }

    pub fn api_cache_name(&self) -> String {
        format!("{}-api-{}", self.prefix, self.version)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `CANVASS_API_URL` and `CANVASS_CAMPAIGN` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("CANVASS_API_URL") {
            if !url.is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(campaign) = std::env::var("CANVASS_CAMPAIGN") {
            if !campaign.is_empty() {
                self.campaign_id = Some(campaign);
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"api_base_url": "https://crm.example.org/api", "sync": {"max_retries": 5}}"#;
        let config: Config = serde_json::from_str(json).expect("valid config");
        assert_eq!(config.api_base_url, "https://crm.example.org/api");
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.on_retry_exhausted, RetryExhaustion::DeadLetter);
        assert_eq!(config.dedup.window_secs, 300);
        assert_eq!(config.cache.version, "v1");
    }

    #[test]
    fn test_cache_names_carry_version() {
        let settings = CacheSettings {
            version: "v7".to_string(),
            ..CacheSettings::default()
        };
        assert_eq!(settings.static_cache_name(), "canvass-static-v7");
        assert_eq!(settings.dynamic_cache_name(), "canvass-dynamic-v7");
        assert_eq!(settings.api_cache_name(), "canvass-api-v7");
    }

    #[test]
    fn test_oversized_durations_are_clamped() {
        let json = format!(
            r#"{{"window_secs": {}, "location_max_age_secs": {}}}"#,
            u64::MAX,
            i64::MAX as u64 + 1
        );
        let settings: DedupSettings = serde_json::from_str(&json).expect("valid settings");
        let cap = chrono::Duration::seconds(MAX_WINDOW_SECS as i64);
        assert_eq!(settings.window(), cap);
        assert_eq!(settings.location_max_age(), cap);
        assert!(settings.window() > chrono::Duration::zero());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load_from(&dir.path().join("nope.json")).expect("default config");
        assert_eq!(config.sync.max_retries, 3);
    }

    #[test]
    fn test_retry_exhaustion_wire_names() {
        let discard: RetryExhaustion = serde_json::from_str(r#""discard""#).expect("parse");
        assert_eq!(discard, RetryExhaustion::Discard);
    }
}
