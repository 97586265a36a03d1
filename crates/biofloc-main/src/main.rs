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

//! Biofloc Monitor - periodic device health evaluation
//!
//! Each pass fetches the newest reading of every device from the configured
//! sources, evaluates it against the stored thresholds and prints one JSON line
//! per device.

mod config;

use anyhow::{Context, Result};
use biofloc_core::{
    Clock, ConfigManager, DeviceHealthEvaluator, DeviceManager, LocalOffset, SensorAliases,
    SensorRegistry, SystemClock, ThresholdResolver, discover_sensors,
};
use biofloc_store::{DataApiClient, DocumentConfigStore, DocumentStore, Normalizer, Source, SourceAdapter};
use clap::Parser;
use config::AppConfig;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "biofloc-monitor", version, about = "Aquaculture tank health monitor")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "monitor.toml")]
    config: PathBuf,

    /// Run a single refresh pass and exit
    #[arg(long)]
    once: bool,

    /// Log filter when RUST_LOG is unset (overrides the configured level)
    #[arg(long)]
    log_level: Option<String>,
}

struct Monitor {
    adapter: SourceAdapter,
    config: ConfigManager,
    devices: DeviceManager,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let app_config = AppConfig::load(&args.config)?;

    // Respects RUST_LOG, falls back to the configured level
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| app_config.monitor.log_level.clone());
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    info!("🚀 Starting Biofloc Monitor");
    info!("📋 Configuration Summary:");
    info!("   Sources: {}", app_config.sources.len());
    for source in &app_config.sources {
        info!(
            "   - {} ({}.{})",
            source.name, source.database, source.collection
        );
    }
    info!(
        "   Offline timeout: {}s, refresh every {}s, UTC offset {} min",
        app_config.monitor.offline_timeout_secs,
        app_config.monitor.refresh_interval_secs,
        app_config.monitor.utc_offset_minutes
    );

    let monitor = build_monitor(&app_config)?;

    let mut interval = tokio::time::interval(app_config.refresh_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = monitor.refresh().await {
                    error!("❌ Refresh pass failed: {e:#}");
                }
                if args.once {
                    break;
                }
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

fn build_monitor(app_config: &AppConfig) -> Result<Monitor> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let offset = LocalOffset::from_minutes(app_config.monitor.utc_offset_minutes)?;
    let retry = app_config.timeouts.retry_policy();

    let registry = match &app_config.monitor.sensor_defaults {
        Some(path) => SensorRegistry::from_file(path)
            .with_context(|| format!("Failed to load sensor defaults from {}", path.display()))?,
        None => SensorRegistry::builtin(),
    };

    let mut stores: HashMap<String, Arc<dyn DocumentStore>> = HashMap::new();
    let mut sources = Vec::with_capacity(app_config.sources.len());
    for source in &app_config.sources {
        let api_key = match &source.api_key_env {
            Some(var) => std::env::var(var)
                .with_context(|| format!("Source '{}': environment variable {var} is not set", source.name))?,
            None => String::new(),
        };
        let mut client = DataApiClient::new(
            &source.endpoint,
            api_key,
            &source.database,
            app_config.timeouts.store_timeouts(),
        )?;
        if let Some(data_source) = &source.data_source {
            client = client.with_data_source(data_source);
        }

        let store: Arc<dyn DocumentStore> = Arc::new(client);
        stores.insert(source.name.clone(), Arc::clone(&store));
        sources.push(
            Source::new(&source.name, &source.collection, store)
                .with_server_grouping(source.server_grouping),
        );
    }

    let normalizer = Normalizer::new(
        SensorAliases::builtin(),
        offset,
        app_config.monitor.alias_collision,
    );
    let adapter = SourceAdapter::new(sources, normalizer)
        .with_retry(retry)
        .with_deadline(app_config.fetch_deadline())
        .with_latest_window(app_config.monitor.latest_window);

    let config_source = app_config
        .config_store_source()
        .context("No source available for the config store")?;
    let config_db = stores
        .get(&config_source.name)
        .cloned()
        .context("Config store source was not initialised")?;
    let config_store = DocumentConfigStore::new(config_db, Arc::clone(&clock))
        .with_collections(
            &app_config.config_store.config_collection,
            &app_config.config_store.devices_collection,
        )
        .with_retry(retry);

    let config = ConfigManager::new(Arc::new(config_store), Arc::new(registry));
    let devices = DeviceManager::new(
        DeviceHealthEvaluator::new(clock).with_offline_timeout(app_config.offline_timeout()),
    );

    Ok(Monitor {
        adapter,
        config,
        devices,
    })
}

impl Monitor {
    async fn refresh(&self) -> Result<()> {
        let report = self.adapter.fetch_latest_per_device().await;
        if report.is_partial() {
            warn!(
                "⚠️ [MONITOR] Partial data, unavailable sources: {:?}",
                report.failed_sources
            );
        }
        if report.records.is_empty() {
            warn!("⚠️ [MONITOR] No devices available");
            return Ok(());
        }

        if let Err(e) = self
            .config
            .sync_with_detected_sensors(&discover_sensors(&report.records))
            .await
        {
            warn!("⚠️ [MONITOR] Could not register new sensors: {}", e);
        }

        let resolver = match self.config.build_resolver().await {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!("⚠️ [MONITOR] Threshold config unavailable, using defaults: {}", e);
                ThresholdResolver::new(Arc::clone(self.config.registry()))
            }
        };
        let metadata = self.config.get_device_metadata().await.unwrap_or_default();

        let devices = self.devices.get_all_devices_info(&report.records, &resolver);
        let summary = self.devices.calculate_summary_metrics(&devices);
        info!(
            "📊 [MONITOR] {} devices: {} online, {} offline | {} ok, {} warning, {} critical",
            summary.total,
            summary.online,
            summary.offline,
            summary.ok,
            summary.warning,
            summary.critical
        );

        for device in &devices {
            let alias = metadata
                .get(&device.device_id)
                .map_or(device.device_id.as_str(), |m| m.alias.as_str());
            let line = json!({ "alias": alias, "device": device });
            println!("{}", serde_json::to_string(&line)?);
        }
        Ok(())
    }
}
