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

//! Default sensor metadata.
//!
//! The registry is an immutable table built once at startup and handed to the
//! resolver and config manager. Sensors it does not know get a generic entry so
//! there is always something to evaluate against.

use crate::error::{CoreError, Result};
use biofloc_types::{CanonicalRecord, SensorMetadata, ThresholdSpec};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// (name, label, unit, critical_min, optimal_min, optimal_max, critical_max)
type BuiltinEntry = (&'static str, &'static str, &'static str, f64, f64, f64, f64);

const BUILTIN_DEFAULTS: &[BuiltinEntry] = &[
    ("temperature", "Temperature", "°C", 18.0, 24.0, 32.0, 35.0),
    ("ph", "pH", "", 6.0, 6.8, 8.4, 9.5),
    ("oxygen", "Dissolved Oxygen", "mg/L", 2.5, 4.5, 9.0, 12.0),
    ("humidity", "Humidity", "%", 20.0, 40.0, 80.0, 95.0),
    ("ammonia", "Ammonia", "mg/L", 0.0, 0.0, 0.4, 1.0),
    ("nitrite", "Nitrite", "mg/L", 0.0, 0.0, 0.2, 0.5),
    ("nitrate", "Nitrate", "mg/L", 0.0, 0.0, 45.0, 100.0),
    ("salinity", "Salinity", "ppt", 25.0, 30.0, 38.0, 45.0),
];

const GENERIC_CRITICAL_MIN: f64 = 0.0;
const GENERIC_OPTIMAL_MIN: f64 = 20.0;
const GENERIC_OPTIMAL_MAX: f64 = 80.0;
const GENERIC_CRITICAL_MAX: f64 = 100.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorRegistry {
    defaults: BTreeMap<String, SensorMetadata>,
}

impl SensorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Defaults for the sensors found on biofloc tanks
    pub fn builtin() -> Self {
        let defaults = BUILTIN_DEFAULTS
            .iter()
            .map(|&(name, label, unit, c_min, o_min, o_max, c_max)| {
                (
                    name.to_owned(),
                    SensorMetadata::new(label, unit, ThresholdSpec::new(c_min, o_min, o_max, c_max)),
                )
            })
            .collect();
        Self { defaults }
    }

    /// Build a registry from explicit entries; every entry must satisfy the
    /// threshold ordering invariant.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, SensorMetadata)>,
    ) -> Result<Self> {
        let mut defaults = BTreeMap::new();
        for (name, meta) in entries {
            meta.thresholds()
                .validate()
                .map_err(|violation| CoreError::invalid_threshold(&name, violation))?;
            defaults.insert(name, meta);
        }
        Ok(Self { defaults })
    }

    /// Parse `{name: {label, unit, min, max, optimal_min, optimal_max}}`
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, SensorMetadata> = serde_json::from_str(json)?;
        let entries = raw.into_iter().map(|(name, mut meta)| {
            if meta.label.is_empty() {
                meta.label = title_case(&name);
            }
            (name, meta)
        });
        Self::from_entries(entries)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_json_str(&content).map_err(|e| {
            CoreError::Registry(format!("Failed to load {}: {e}", path.display()))
        })?;
        info!(
            "📋 [REGISTRY] Loaded {} sensor defaults from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn get(&self, sensor: &str) -> Option<&SensorMetadata> {
        self.defaults.get(sensor)
    }

    pub fn contains(&self, sensor: &str) -> bool {
        self.defaults.contains_key(sensor)
    }

    pub fn len(&self) -> usize {
        self.defaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty()
    }

    pub fn defaults(&self) -> &BTreeMap<String, SensorMetadata> {
        &self.defaults
    }

    /// Registry entry for the sensor, or a synthesized generic one
    pub fn metadata_or_default(&self, sensor: &str) -> SensorMetadata {
        match self.defaults.get(sensor) {
            Some(meta) => meta.clone(),
            None => {
                debug!("[REGISTRY] No defaults for '{}', using generic range", sensor);
                generic_metadata(sensor)
            }
        }
    }

    /// Default configuration covering every detected sensor
    pub fn create_default_config(
        &self,
        detected: &BTreeSet<String>,
    ) -> BTreeMap<String, SensorMetadata> {
        detected
            .iter()
            .map(|name| (name.clone(), self.metadata_or_default(name)))
            .collect()
    }
}

/// Generic metadata for sensors nobody configured: critical [0,100], optimal [20,80]
pub fn generic_metadata(sensor: &str) -> SensorMetadata {
    SensorMetadata::new(
        title_case(sensor),
        "",
        ThresholdSpec::new(
            GENERIC_CRITICAL_MIN,
            GENERIC_OPTIMAL_MIN,
            GENERIC_OPTIMAL_MAX,
            GENERIC_CRITICAL_MAX,
        ),
    )
}

/// Every sensor name present in a batch of records
pub fn discover_sensors(records: &[CanonicalRecord]) -> BTreeSet<String> {
    records
        .iter()
        .flat_map(|record| record.sensors.keys().cloned())
        .collect()
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_entries_are_valid() {
        let registry = SensorRegistry::builtin();
        assert!(registry.contains("temperature"));
        assert!(registry.contains("oxygen"));
        for (name, meta) in registry.defaults() {
            assert!(meta.thresholds().validate().is_ok(), "{name} is invalid");
        }
    }

    #[test]
    fn test_unknown_sensor_gets_generic_default() {
        let registry = SensorRegistry::builtin();
        let meta = registry.metadata_or_default("total_dissolved_solids");
        assert_eq!(meta.label, "Total Dissolved Solids");
        assert_eq!(meta.thresholds(), ThresholdSpec::new(0.0, 20.0, 80.0, 100.0));
    }

    #[test]
    fn test_from_json_rejects_unordered_entries() {
        let json = r#"{"ph": {"label": "pH", "min": 9.0, "max": 6.0, "optimal_min": 7.0, "optimal_max": 8.0}}"#;
        assert!(matches!(
            SensorRegistry::from_json_str(json),
            Err(CoreError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"turbidity": {{"unit": "NTU", "min": 0, "max": 100, "optimal_min": 5, "optimal_max": 30}}}}"#
        )
        .unwrap();

        let registry = SensorRegistry::from_file(file.path()).unwrap();
        let meta = registry.get("turbidity").unwrap();
        assert_eq!(meta.label, "Turbidity");
        assert_eq!(meta.unit, "NTU");
        assert_eq!(meta.thresholds(), ThresholdSpec::new(0.0, 5.0, 30.0, 100.0));
    }

    #[test]
    fn test_create_default_config_and_discovery() {
        let records = vec![
            CanonicalRecord::new("a").with_sensor("ph", 7.0),
            CanonicalRecord::new("b")
                .with_sensor("ph", 7.1)
                .with_sensor("chlorophyll", 8.0),
        ];
        let detected = discover_sensors(&records);
        assert_eq!(detected.len(), 2);

        let config = SensorRegistry::builtin().create_default_config(&detected);
        assert_eq!(config["ph"].label, "pH");
        assert_eq!(config["chlorophyll"].optimal_max, 80.0);
    }
}
