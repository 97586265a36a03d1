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

//! Telemetry sources through normalization, threshold resolution and health
//! evaluation, with in-process stores standing in for the databases.

use biofloc_core::{
    AliasCollisionPolicy, ConfigManager, DeviceHealthEvaluator, DeviceManager, LocalOffset,
    ManualClock, SensorAliases, SensorRegistry, discover_sensors,
};
use biofloc_store::{
    DocumentConfigStore, MemoryStore, Normalizer, RetryPolicy, Source, SourceAdapter,
};
use biofloc_types::{ConnectionStatus, HealthStatus};
use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const READINGS: &str = "readings";

struct Harness {
    clock: Arc<ManualClock>,
    primary: Arc<MemoryStore>,
    secondary: Arc<MemoryStore>,
    adapter: SourceAdapter,
    config: ConfigManager,
    devices: DeviceManager,
}

fn harness() -> Harness {
    // Site clock is UTC-3; readings below are written in local wall-clock time
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap(),
    ));
    let offset = LocalOffset::from_minutes(-180).unwrap();

    let primary = Arc::new(MemoryStore::new().with_documents(
        READINGS,
        [
            json!({"_id": "p1", "device_id": "tank-a", "timestamp": "2024-06-01 11:59:30",
                   "location": "Greenhouse 1", "sensors": {"temp": 28.0, "pH": {"value": 7.6}}}),
            json!({"_id": "p2", "device_id": "tank-b", "timestamp": "2024-06-01 11:59:45",
                   "sensors": {"oxigeno": 3.5, "ph": 7.4}}),
            json!({"_id": "p3", "device_id": "tank-c", "timestamp": "2024-06-01 11:40:00",
                   "sensors": {"ph": 7.0}}),
        ],
    ));
    let secondary = Arc::new(MemoryStore::new().with_documents(
        READINGS,
        [
            // Loses to the primary source
            json!({"_id": "s1", "device_id": "tank-a", "timestamp": 1_717_254_000,
                   "sensors": {"temp": 40.0}}),
            json!({"_id": "s2", "dispositivo_id": "tank-d", "timestamp": {"$date": "2024-06-01T14:59:50Z"},
                   "datos": {"ph": 7.2}, "alerts": ["aerator stopped"]}),
            json!({"_id": "s3", "dispositivo_id": "tank-e", "timestamp": 1_717_253_990_000_i64,
                   "datos": {"turbidity": 250.0}}),
        ],
    ));

    let normalizer = Normalizer::new(
        SensorAliases::builtin(),
        offset,
        AliasCollisionPolicy::FirstWins,
    );
    let adapter = SourceAdapter::new(
        vec![
            Source::new("primary", READINGS, primary.clone()),
            Source::new("secondary", READINGS, secondary.clone()),
        ],
        normalizer,
    )
    .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
    .with_deadline(Duration::from_secs(5));

    let config_store = DocumentConfigStore::new(primary.clone(), clock.clone())
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
    let config = ConfigManager::new(Arc::new(config_store), Arc::new(SensorRegistry::builtin()));
    let devices = DeviceManager::new(DeviceHealthEvaluator::new(clock.clone()));

    Harness {
        clock,
        primary,
        secondary,
        adapter,
        config,
        devices,
    }
}

#[tokio::test]
async fn test_refresh_pass_end_to_end() {
    let h = harness();

    let report = h.adapter.fetch_latest_per_device().await;
    assert!(!report.is_partial());
    assert_eq!(report.records.len(), 5);

    h.config
        .sync_with_detected_sensors(&discover_sensors(&report.records))
        .await
        .unwrap();
    let resolver = h.config.build_resolver().await.unwrap();
    let devices = h.devices.get_all_devices_info(&report.records, &resolver);
    let by_id = |id: &str| devices.iter().find(|d| d.device_id == id).unwrap();

    // Primary source wins for tank-a; 28 °C and pH 7.6 are optimal
    let a = by_id("tank-a");
    assert_eq!(a.location, "Greenhouse 1");
    assert_eq!(a.sensor_values["temperature"], 28.0);
    assert_eq!(a.connection, ConnectionStatus::Online);
    assert_eq!(a.health, HealthStatus::Ok);

    // Oxygen 3.5 is between critical 2.5 and optimal 4.5
    assert_eq!(by_id("tank-b").health, HealthStatus::Warning);

    // Twenty minutes old
    let c = by_id("tank-c");
    assert_eq!(c.connection, ConnectionStatus::Offline);
    assert_eq!(c.health, HealthStatus::Unknown);

    // Alert short-circuits an in-range pH
    assert_eq!(by_id("tank-d").health, HealthStatus::Critical);

    // Turbidity got generic defaults from the sync step
    assert_eq!(by_id("tank-e").health, HealthStatus::Critical);

    let summary = h.devices.calculate_summary_metrics(&devices);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.online, 4);
    assert_eq!(summary.offline, 1);
    assert_eq!(summary.ok, 1);
    assert_eq!(summary.warning, 1);
    assert_eq!(summary.critical, 2);
}

#[tokio::test]
async fn test_device_override_changes_classification() {
    let h = harness();
    // Operator widens tank-b's oxygen range so 3.5 mg/L is optimal
    h.config
        .set_device_safe_range("tank-b", "OD", 2.0, 7.0)
        .await
        .unwrap();

    let report = h.adapter.fetch_latest_per_device().await;
    let resolver = h.config.build_resolver().await.unwrap();
    let devices = h.devices.get_all_devices_info(&report.records, &resolver);
    let b = devices.iter().find(|d| d.device_id == "tank-b").unwrap();
    assert_eq!(b.health, HealthStatus::Ok);
}

#[tokio::test]
async fn test_offline_device_keeps_previous_health() {
    let h = harness();
    let resolver = h.config.build_resolver().await.unwrap();

    let report = h.adapter.fetch_latest_per_device().await;
    h.devices.get_all_devices_info(&report.records, &resolver);
    assert_eq!(h.devices.get_health_states()["tank-b"], HealthStatus::Warning);

    // Everything goes stale
    h.clock.advance(TimeDelta::minutes(10));
    let devices = h.devices.get_all_devices_info(&report.records, &resolver);
    assert!(devices.iter().all(|d| d.connection == ConnectionStatus::Offline));
    assert_eq!(h.devices.get_health_states()["tank-b"], HealthStatus::Warning);
}

#[tokio::test]
async fn test_partial_source_failure() {
    let h = harness();
    h.secondary.set_unavailable(true);

    let report = h.adapter.fetch_latest_per_device().await;
    assert_eq!(report.failed_sources, ["secondary"]);
    let mut ids: Vec<_> = report.records.iter().map(|r| r.device_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["tank-a", "tank-b", "tank-c"]);

    h.primary.set_unavailable(true);
    let report = h.adapter.fetch_latest_per_device().await;
    assert!(report.records.is_empty());
    assert_eq!(report.failed_sources.len(), 2);
}
