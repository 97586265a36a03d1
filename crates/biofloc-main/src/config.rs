// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Biofloc Monitor.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Monitor configuration (`monitor.toml`)

use anyhow::{Context, Result};
use biofloc_core::{AliasCollisionPolicy, LocalOffset};
use biofloc_store::{RetryPolicy, StoreTimeouts};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

fn default_true() -> bool {
    true
}

fn default_60() -> u64 {
    60
}

fn default_30() -> u64 {
    30
}

fn default_20000() -> u64 {
    20_000
}

fn default_window() -> usize {
    biofloc_store::DEFAULT_LATEST_WINDOW
}

fn default_offset() -> i32 {
    -180
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_config_collection() -> String {
    biofloc_store::config_store::DEFAULT_CONFIG_COLLECTION.to_owned()
}

fn default_devices_collection() -> String {
    biofloc_store::config_store::DEFAULT_DEVICES_COLLECTION.to_owned()
}

/// One telemetry source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,

    /// Data API base URL
    pub endpoint: String,

    /// Name of the environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Cluster name, for data APIs that require one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,

    pub database: String,
    pub collection: String,

    /// Group by device on the server instead of scanning the newest documents
    #[serde(default = "default_true")]
    pub server_grouping: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_60")]
    pub offline_timeout_secs: u64,

    /// Site wall-clock offset from UTC; naive timestamps are read in it
    #[serde(default = "default_offset")]
    pub utc_offset_minutes: i32,

    #[serde(default = "default_30")]
    pub refresh_interval_secs: u64,

    /// Budget for one multi-source fetch
    #[serde(default = "default_30")]
    pub fetch_deadline_secs: u64,

    #[serde(default = "default_window")]
    pub latest_window: usize,

    #[serde(default)]
    pub alias_collision: AliasCollisionPolicy,

    /// JSON file replacing the built-in sensor defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_defaults: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            offline_timeout_secs: 60,
            utc_offset_minutes: default_offset(),
            refresh_interval_secs: 30,
            fetch_deadline_secs: 30,
            latest_window: default_window(),
            alias_collision: AliasCollisionPolicy::default(),
            sensor_defaults: None,
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_20000")]
    pub connect_ms: u64,
    #[serde(default = "default_20000")]
    pub socket_ms: u64,
    #[serde(default = "default_20000")]
    pub server_selection_ms: u64,
    #[serde(default = "default_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_base_delay_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: 20_000,
            socket_ms: 20_000,
            server_selection_ms: 20_000,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl TimeoutsConfig {
    pub fn store_timeouts(&self) -> StoreTimeouts {
        StoreTimeouts {
            connect: Duration::from_millis(self.connect_ms),
            socket: Duration::from_millis(self.socket_ms),
            server_selection: Duration::from_millis(self.server_selection_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

/// Where thresholds and device metadata live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStoreConfig {
    /// Source whose database holds the config collections; the first source
    /// when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default = "default_config_collection")]
    pub config_collection: String,
    #[serde(default = "default_devices_collection")]
    pub devices_collection: String,
}

impl Default for ConfigStoreConfig {
    fn default() -> Self {
        Self {
            source: None,
            config_collection: default_config_collection(),
            devices_collection: default_devices_collection(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// In priority order: the first source wins when a device reports to several
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub config_store: ConfigStoreConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        info!("✅ Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            anyhow::bail!("Configuration must include at least one source");
        }

        let mut names = HashSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            if source.name.trim().is_empty() {
                anyhow::bail!("Source {} has empty name", idx);
            }
            if !names.insert(source.name.as_str()) {
                anyhow::bail!("Duplicate source name '{}'", source.name);
            }
            if !source.endpoint.starts_with("http://") && !source.endpoint.starts_with("https://")
            {
                anyhow::bail!(
                    "Source '{}' endpoint must be an http(s) URL, got '{}'",
                    source.name,
                    source.endpoint
                );
            }
            if source.database.is_empty() || source.collection.is_empty() {
                anyhow::bail!("Source '{}' needs both database and collection", source.name);
            }
        }

        if self.monitor.offline_timeout_secs == 0 {
            anyhow::bail!("offline_timeout_secs must be positive");
        }
        if self.monitor.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be positive");
        }
        if self.monitor.fetch_deadline_secs == 0 {
            anyhow::bail!("fetch_deadline_secs must be positive");
        }
        if self.monitor.latest_window == 0 {
            anyhow::bail!("latest_window must be positive");
        }
        LocalOffset::from_minutes(self.monitor.utc_offset_minutes)?;

        if self.timeouts.retry_attempts == 0 {
            anyhow::bail!("retry_attempts must be at least 1");
        }
        if self.timeouts.connect_ms == 0
            || self.timeouts.socket_ms == 0
            || self.timeouts.server_selection_ms == 0
        {
            anyhow::bail!("Network timeouts must be positive");
        }

        if let Some(name) = &self.config_store.source
            && !names.contains(name.as_str())
        {
            anyhow::bail!("config_store.source '{}' is not a configured source", name);
        }
        Ok(())
    }

    /// Source holding the config collections
    pub fn config_store_source(&self) -> Option<&SourceConfig> {
        match &self.config_store.source {
            Some(name) => self.sources.iter().find(|s| &s.name == name),
            None => self.sources.first(),
        }
    }

    pub fn offline_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor.offline_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.refresh_interval_secs)
    }

    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_secs(self.monitor.fetch_deadline_secs)
    }
}
