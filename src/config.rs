//! Alarm configuration and server settings.
//!
//! The alarm configuration is persisted as JSON next to the binary (or
//! wherever `ALARM_CONFIG_PATH` points). Missing fields fall back to the
//! defaults, so a partial or older file still loads.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// User-tunable alarm parameters.
///
/// Values are taken as-is; range checks belong to whoever edits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub sound_enabled: bool,
    pub vibration_enabled: bool,
    /// 0.0 to 1.0
    pub volume: f64,
    /// Lead time before a midday closing.
    pub midday_minutes: i64,
    /// Lead time before a final closing.
    pub final_minutes: i64,
    pub midday_alarm_enabled: bool,
    pub final_alarm_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            vibration_enabled: true,
            volume: 0.5,
            midday_minutes: 20,
            final_minutes: 20,
            midday_alarm_enabled: true,
            final_alarm_enabled: true,
        }
    }
}

/// A partial update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfigPatch {
    pub sound_enabled: Option<bool>,
    pub vibration_enabled: Option<bool>,
    pub volume: Option<f64>,
    pub midday_minutes: Option<i64>,
    pub final_minutes: Option<i64>,
    pub midday_alarm_enabled: Option<bool>,
    pub final_alarm_enabled: Option<bool>,
}

impl AppConfig {
    pub fn apply(&mut self, patch: AppConfigPatch) {
        if let Some(v) = patch.sound_enabled {
            self.sound_enabled = v;
        }
        if let Some(v) = patch.vibration_enabled {
            self.vibration_enabled = v;
        }
        if let Some(v) = patch.volume {
            self.volume = v;
        }
        if let Some(v) = patch.midday_minutes {
            self.midday_minutes = v;
        }
        if let Some(v) = patch.final_minutes {
            self.final_minutes = v;
        }
        if let Some(v) = patch.midday_alarm_enabled {
            self.midday_alarm_enabled = v;
        }
        if let Some(v) = patch.final_alarm_enabled {
            self.final_alarm_enabled = v;
        }
    }
}

/// File-backed store for the single [`AppConfig`].
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<AppConfig>,
}

impl ConfigStore {
    /// Load the config from `path`.
    ///
    /// A missing, unreadable or corrupt file yields the defaults; the next
    /// successful [`update`](Self::update) overwrites it.
    pub fn load(path: &Path) -> Self {
        let config = if path.exists() {
            match read_config(path) {
                Ok(config) => {
                    info!("Loaded alarm config from {:?}", path);
                    config
                }
                Err(e) => {
                    error!("{:#}, using defaults", e);
                    AppConfig::default()
                }
            }
        } else {
            warn!("No alarm config at {:?}, using defaults", path);
            AppConfig::default()
        };

        Self {
            path: path.to_path_buf(),
            current: RwLock::new(config),
        }
    }

    /// Current config (returns clone).
    pub fn get(&self) -> AppConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `patch` into the current config and write it to disk.
    pub fn update(&self, patch: AppConfigPatch) -> Result<AppConfig> {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = current.clone();
        next.apply(patch);
        self.save(&next)?;
        *current = next.clone();
        Ok(next)
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write config: {:?}", self.path))?;
        info!("Saved alarm config to {:?}", self.path);
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse config: {:?}", path))
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub config_path: PathBuf,
    pub ocr_url: String,
    pub ocr_lang: String,
    pub poll_interval: Duration,
    pub notify_webhook_url: Option<String>,
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let poll_secs = std::env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(30);

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            config_path: std::env::var("ALARM_CONFIG_PATH")
                .unwrap_or_else(|_| "alarm_config.json".to_string())
                .into(),
            ocr_url: std::env::var("OCR_URL").unwrap_or_else(|_| "http://localhost:3001".to_string()),
            ocr_lang: std::env::var("OCR_LANG").unwrap_or_else(|_| "spa".to_string()),
            poll_interval: Duration::from_secs(poll_secs),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.is_empty()),
        }
    }
}
