// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User configuration, stored as JSON in `~/.dlnotify/config.json`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::notify::DirectorSettings;

const CONFIG_FILE: &str = "config.json";
const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Directory holding `state.json`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,
    /// Resumption attempts restored by a budget clear
    #[serde(default = "default_resumption_attempts")]
    pub resumption_attempts: u32,
    #[serde(default = "default_resumption_delay_secs")]
    pub resumption_delay_secs: u64,
    /// Whether the notification surface keeps detached notifications visible
    /// after the background context re-anchors
    #[serde(default)]
    pub surface_preserves_detached: bool,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    config_dir().unwrap_or_else(|_| PathBuf::from(".dlnotify"))
}

fn default_throttle_interval_ms() -> u64 {
    220
}

fn default_resumption_attempts() -> u32 {
    5
}

fn default_resumption_delay_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            throttle_interval_ms: default_throttle_interval_ms(),
            resumption_attempts: default_resumption_attempts(),
            resumption_delay_secs: default_resumption_delay_secs(),
            surface_preserves_detached: false,
            log_level: default_log_level(),
        }
    }
}

/// `~/.dlnotify`
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".dlnotify"))
}

impl NotifyConfig {
    /// Load from the default location, or defaults if there is no file yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// `~/.dlnotify/config.json`
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_dir()?.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(STATE_FILE)
    }

    pub fn director_settings(&self) -> DirectorSettings {
        DirectorSettings {
            throttle_interval: Duration::from_millis(self.throttle_interval_ms),
            resumption_attempts: self.resumption_attempts,
            resumption_delay: Duration::from_secs(self.resumption_delay_secs),
        }
    }
}
