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

//! Threshold and device configuration, persisted through a [`ConfigStore`].

use crate::aliases::SensorAliases;
use crate::error::{CoreError, Result};
use crate::registry::SensorRegistry;
use crate::resolver::{
    SensorOverride, ThresholdResolver, decode_device_overrides, derive_from_safe_range,
};
use async_trait::async_trait;
use biofloc_types::{DeviceMetadata, SensorMetadata, ThresholdSpec, UNASSIGNED_LOCATION};
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Id of the config document holding global sensor thresholds
pub const SENSOR_THRESHOLDS_CONFIG_ID: &str = "sensor_thresholds";

/// Device document fields that may hold threshold overrides, newest name first
const DEVICE_THRESHOLD_FIELDS: &[&str] = &["thresholds", "umbrales"];
const DEVICE_ALIAS_FIELDS: &[&str] = &["alias", "nombre"];
const DEVICE_LOCATION_FIELDS: &[&str] = &["location", "ubicacion"];

/// Persistence of config documents and device metadata
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, id: &str) -> Result<Option<Value>>;

    /// Replace (or create) a config document
    async fn save_config(&self, id: &str, document: Value) -> Result<bool>;

    async fn delete_config(&self, id: &str) -> Result<bool>;

    async fn get_device_metadata(&self, device_id: &str) -> Result<Option<Value>>;

    async fn get_all_devices_metadata(&self) -> Result<BTreeMap<String, Value>>;

    /// Merge `fields` into the device document. Keys may be dotted paths
    /// (`thresholds.ph`) addressing nested members.
    async fn update_device_fields(&self, device_id: &str, fields: Map<String, Value>)
    -> Result<bool>;
}

/// Reads and writes thresholds and device identity on top of a [`ConfigStore`],
/// caching the global threshold table between calls.
pub struct ConfigManager {
    store: Arc<dyn ConfigStore>,
    registry: Arc<SensorRegistry>,
    aliases: SensorAliases,
    cache: RwLock<Option<BTreeMap<String, SensorMetadata>>>,
    /// Held across every read/modify/save of the stored global table
    table_writer: Mutex<()>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("registry", &self.registry.len())
            .field("cached", &self.cache.read().is_some())
            .finish_non_exhaustive()
    }
}

impl ConfigManager {
    pub fn new(store: Arc<dyn ConfigStore>, registry: Arc<SensorRegistry>) -> Self {
        Self {
            store,
            registry,
            aliases: SensorAliases::builtin(),
            cache: RwLock::new(None),
            table_writer: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: SensorAliases) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    fn invalidate(&self) {
        *self.cache.write() = None;
    }

    /// Global sensor configuration. Seeds the store with registry defaults the
    /// first time it finds no configuration.
    pub async fn get_sensor_config(
        &self,
        force_refresh: bool,
    ) -> Result<BTreeMap<String, SensorMetadata>> {
        if !force_refresh && let Some(cached) = self.cache.read().as_ref() {
            return Ok(cached.clone());
        }

        let _writer = self.table_writer.lock().await;
        self.load_sensor_table().await
    }

    /// Read the stored table, seeding it when empty. Callers hold `table_writer`.
    async fn load_sensor_table(&self) -> Result<BTreeMap<String, SensorMetadata>> {
        let stored = self
            .store
            .get_config(SENSOR_THRESHOLDS_CONFIG_ID)
            .await?
            .map(|doc| parse_sensor_table(&doc))
            .unwrap_or_default();

        let sensors = if stored.is_empty() {
            info!(
                "📋 [CONFIG] No sensor thresholds stored, seeding {} registry defaults",
                self.registry.len()
            );
            let defaults = self.registry.defaults().clone();
            self.save_sensor_table(&defaults).await?;
            defaults
        } else {
            stored
        };

        *self.cache.write() = Some(sensors.clone());
        Ok(sensors)
    }

    async fn save_sensor_table(&self, sensors: &BTreeMap<String, SensorMetadata>) -> Result<bool> {
        let document = json!({ "sensors": serde_json::to_value(sensors)? });
        let saved = self
            .store
            .save_config(SENSOR_THRESHOLDS_CONFIG_ID, document)
            .await?;
        if saved {
            self.invalidate();
        } else {
            warn!("⚠️ [CONFIG] Store did not acknowledge sensor threshold save");
        }
        Ok(saved)
    }

    pub async fn get_threshold_for_sensor(&self, sensor: &str) -> Result<Option<SensorMetadata>> {
        Ok(self.get_sensor_config(false).await?.get(sensor).cloned())
    }

    /// Global spec of every configured sensor
    pub async fn get_all_configured_sensors(&self) -> Result<BTreeMap<String, ThresholdSpec>> {
        Ok(self
            .get_sensor_config(false)
            .await?
            .into_iter()
            .map(|(name, meta)| (name, meta.thresholds()))
            .collect())
    }

    pub async fn update_sensor_threshold(&self, sensor: &str, meta: SensorMetadata) -> Result<bool> {
        self.update_multiple_thresholds(BTreeMap::from([(sensor.to_owned(), meta)]))
            .await
    }

    /// Validate every entry first; nothing is written if any entry is invalid
    pub async fn update_multiple_thresholds(
        &self,
        thresholds: BTreeMap<String, SensorMetadata>,
    ) -> Result<bool> {
        for (sensor, meta) in &thresholds {
            meta.thresholds()
                .validate()
                .map_err(|violation| CoreError::invalid_threshold(sensor, violation))?;
        }

        let _writer = self.table_writer.lock().await;
        let mut sensors = self.load_sensor_table().await?;
        info!("💾 [CONFIG] Updating thresholds for {} sensor(s)", thresholds.len());
        sensors.extend(thresholds);
        self.save_sensor_table(&sensors).await
    }

    pub async fn delete_sensor_threshold(&self, sensor: &str) -> Result<bool> {
        let _writer = self.table_writer.lock().await;
        let mut sensors = self.load_sensor_table().await?;
        if sensors.remove(sensor).is_none() {
            return Ok(false);
        }
        self.save_sensor_table(&sensors).await
    }

    /// Replace the global table with defaults for the detected sensors
    pub async fn reset_to_defaults(&self, detected: &BTreeSet<String>) -> Result<bool> {
        let sensors = self.registry.create_default_config(detected);
        info!("♻️ [CONFIG] Resetting thresholds to defaults for {} sensors", sensors.len());
        let _writer = self.table_writer.lock().await;
        self.save_sensor_table(&sensors).await
    }

    /// Add defaults for detected sensors that have no configuration yet
    pub async fn sync_with_detected_sensors(&self, detected: &BTreeSet<String>) -> Result<bool> {
        let cached = self.get_sensor_config(false).await?;
        if detected.iter().all(|name| cached.contains_key(name)) {
            return Ok(true);
        }

        let _writer = self.table_writer.lock().await;
        let mut sensors = self.load_sensor_table().await?;
        let missing: Vec<&String> = detected
            .iter()
            .filter(|name| !sensors.contains_key(name.as_str()))
            .collect();
        if missing.is_empty() {
            return Ok(true);
        }

        info!("🆕 [CONFIG] Adding defaults for new sensors: {:?}", missing);
        for name in missing {
            sensors.insert(name.clone(), self.registry.metadata_or_default(name));
        }
        self.save_sensor_table(&sensors).await
    }

    /// Alias and location of every device with stored metadata
    pub async fn get_device_metadata(&self) -> Result<BTreeMap<String, DeviceMetadata>> {
        Ok(self
            .store
            .get_all_devices_metadata()
            .await?
            .into_iter()
            .map(|(device_id, doc)| {
                let meta = device_metadata_from(&device_id, &doc);
                (device_id, meta)
            })
            .collect())
    }

    pub async fn update_device_metadata(
        &self,
        device_id: &str,
        alias: &str,
        location: &str,
    ) -> Result<bool> {
        let mut fields = Map::new();
        fields.insert("alias".to_owned(), Value::from(alias));
        fields.insert("location".to_owned(), Value::from(location));
        self.store.update_device_fields(device_id, fields).await
    }

    /// Stored identity of a device, or one derived from its id
    pub async fn get_device_info(&self, device_id: &str) -> Result<DeviceMetadata> {
        Ok(match self.store.get_device_metadata(device_id).await? {
            Some(doc) => device_metadata_from(device_id, &doc),
            None => DeviceMetadata {
                alias: device_id.to_owned(),
                location: UNASSIGNED_LOCATION.to_owned(),
            },
        })
    }

    /// Decoded per-device overrides, whatever encoding they were stored in
    pub async fn get_device_overrides(
        &self,
        device_id: &str,
    ) -> Result<BTreeMap<String, SensorOverride>> {
        Ok(match self.store.get_device_metadata(device_id).await? {
            Some(doc) => self.overrides_from(&doc),
            None => BTreeMap::new(),
        })
    }

    /// Effective spec of every sensor on one device
    pub async fn get_device_thresholds(
        &self,
        device_id: &str,
    ) -> Result<BTreeMap<String, ThresholdSpec>> {
        let overrides = self.get_device_overrides(device_id).await?;
        let mut resolver = ThresholdResolver::new(Arc::clone(&self.registry))
            .with_global(self.get_all_configured_sensors().await?);
        resolver.set_device_overrides(device_id, overrides);
        Ok(resolver.device_thresholds(device_id))
    }

    /// Store a full spec as a per-device override
    pub async fn update_device_threshold(
        &self,
        device_id: &str,
        sensor: &str,
        spec: ThresholdSpec,
    ) -> Result<bool> {
        let sensor = self.aliases.canonicalize(sensor);
        spec.validate()
            .map_err(|violation| CoreError::invalid_threshold(&sensor, violation))?;

        let mut fields = Map::new();
        fields.insert(
            format!("{}.{sensor}", DEVICE_THRESHOLD_FIELDS[0]),
            json!({
                "min": spec.critical_min,
                "optimal_min": spec.optimal_min,
                "optimal_max": spec.optimal_max,
                "max": spec.critical_max,
            }),
        );
        info!("💾 [CONFIG] Saving {} thresholds for device {}", sensor, device_id);
        self.store.update_device_fields(device_id, fields).await
    }

    /// Store an operator's two-number safe range, deriving the warning band
    pub async fn set_device_safe_range(
        &self,
        device_id: &str,
        sensor: &str,
        min: f64,
        max: f64,
    ) -> Result<bool> {
        let spec = derive_from_safe_range(min, max)
            .map_err(|violation| CoreError::invalid_threshold(sensor, violation))?;
        self.update_device_threshold(device_id, sensor, spec).await
    }

    /// Snapshot of all threshold layers for an evaluation pass
    pub async fn build_resolver(&self) -> Result<ThresholdResolver> {
        let mut resolver = ThresholdResolver::new(Arc::clone(&self.registry))
            .with_global(self.get_all_configured_sensors().await?);

        for (device_id, doc) in self.store.get_all_devices_metadata().await? {
            let overrides = self.overrides_from(&doc);
            if !overrides.is_empty() {
                debug!(
                    "[CONFIG] {} has overrides for {} sensor(s)",
                    device_id,
                    overrides.len()
                );
                resolver.set_device_overrides(device_id, overrides);
            }
        }
        Ok(resolver)
    }

    fn overrides_from(&self, doc: &Value) -> BTreeMap<String, SensorOverride> {
        let mut merged: BTreeMap<String, SensorOverride> = BTreeMap::new();
        for field in DEVICE_THRESHOLD_FIELDS {
            if let Some(section) = doc.get(field) {
                for (sensor, entry) in decode_device_overrides(section, &self.aliases) {
                    merged.entry(sensor).or_default().fill_missing(&entry);
                }
            }
        }
        merged
    }
}

fn parse_sensor_table(doc: &Value) -> BTreeMap<String, SensorMetadata> {
    let Some(sensors) = doc.get("sensors").and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    sensors
        .iter()
        .filter_map(|(name, entry)| {
            match serde_json::from_value::<SensorMetadata>(entry.clone()) {
                Ok(meta) => Some((name.clone(), meta)),
                Err(e) => {
                    warn!("⚠️ [CONFIG] Ignoring malformed threshold entry '{}': {}", name, e);
                    None
                }
            }
        })
        .collect()
}

fn first_string(doc: &Value, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| doc.get(field).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_owned)
}

fn device_metadata_from(device_id: &str, doc: &Value) -> DeviceMetadata {
    DeviceMetadata {
        alias: first_string(doc, DEVICE_ALIAS_FIELDS).unwrap_or_else(|| device_id.to_owned()),
        location: first_string(doc, DEVICE_LOCATION_FIELDS)
            .unwrap_or_else(|| UNASSIGNED_LOCATION.to_owned()),
    }
}
