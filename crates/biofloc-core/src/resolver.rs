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

//! Threshold resolution.
//!
//! Layers, lowest priority first: registry defaults, globally configured
//! thresholds, per-device overrides. Per-device overrides have been stored in
//! several shapes over time; [`ThresholdEncoding`] decodes each stored entry into
//! a [`SensorOverride`] so callers never need to know which shape is stored.

use crate::aliases::SensorAliases;
use crate::registry::{SensorRegistry, generic_metadata};
use biofloc_types::{ThresholdSpec, ThresholdViolation};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Share of the safe range carved from each end as the warning band
pub const WARNING_MARGIN: f64 = 0.20;

/// Which end of a range a flat key addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Min,
    Max,
}

/// One stored per-device threshold entry, in whichever shape it was written
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdEncoding {
    /// `"ph_min": 6.5` - a single optimal bound
    Flat {
        sensor: String,
        bound: Bound,
        value: f64,
    },
    /// `"ph": {"min_value": 6.5, "max_value": 8.0}` - optimal bounds
    Structured {
        sensor: String,
        min_value: Option<f64>,
        max_value: Option<f64>,
    },
    /// `"ph": {"min": 6, "optimal_min": 6.5, "optimal_max": 8, "max": 9}` - registry form
    Full {
        sensor: String,
        bounds: SensorOverride,
    },
}

impl ThresholdEncoding {
    /// Decode one `key: value` entry of a device threshold document.
    /// Returns `None` for entries that match no known shape.
    pub fn decode(key: &str, value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                let value = n.as_f64().filter(|v| v.is_finite())?;
                let (sensor, suffix) = key.rsplit_once('_')?;
                let bound = match suffix.to_lowercase().as_str() {
                    "min" => Bound::Min,
                    "max" => Bound::Max,
                    _ => return None,
                };
                if sensor.trim().is_empty() {
                    return None;
                }
                Some(Self::Flat {
                    sensor: sensor.to_owned(),
                    bound,
                    value,
                })
            }
            Value::Object(obj) => {
                if obj.contains_key("min_value") || obj.contains_key("max_value") {
                    return Some(Self::Structured {
                        sensor: key.to_owned(),
                        min_value: number(obj.get("min_value")),
                        max_value: number(obj.get("max_value")),
                    });
                }
                let bounds = SensorOverride {
                    critical_min: number(obj.get("min")).or(number(obj.get("critical_min"))),
                    critical_max: number(obj.get("max")).or(number(obj.get("critical_max"))),
                    optimal_min: number(obj.get("optimal_min")),
                    optimal_max: number(obj.get("optimal_max")),
                };
                if bounds.is_empty() {
                    return None;
                }
                Some(Self::Full {
                    sensor: key.to_owned(),
                    bounds,
                })
            }
            _ => None,
        }
    }

    /// Lower ranks win over higher ones for the same bound
    fn precedence(&self) -> u8 {
        match self {
            Self::Full { .. } => 0,
            Self::Structured { .. } => 1,
            Self::Flat { .. } => 2,
        }
    }

    pub fn sensor(&self) -> &str {
        match self {
            Self::Flat { sensor, .. }
            | Self::Structured { sensor, .. }
            | Self::Full { sensor, .. } => sensor,
        }
    }

    /// Canonical internal representation of this entry
    pub fn to_override(&self) -> SensorOverride {
        match *self {
            Self::Flat {
                bound: Bound::Min,
                value,
                ..
            } => SensorOverride {
                optimal_min: Some(value),
                ..SensorOverride::default()
            },
            Self::Flat {
                bound: Bound::Max,
                value,
                ..
            } => SensorOverride {
                optimal_max: Some(value),
                ..SensorOverride::default()
            },
            Self::Structured {
                min_value,
                max_value,
                ..
            } => SensorOverride {
                optimal_min: min_value,
                optimal_max: max_value,
                ..SensorOverride::default()
            },
            Self::Full { bounds, .. } => bounds,
        }
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|v| v.is_finite())
}

/// Per-device replacement for some or all bounds of a sensor's spec
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorOverride {
    pub critical_min: Option<f64>,
    pub critical_max: Option<f64>,
    pub optimal_min: Option<f64>,
    pub optimal_max: Option<f64>,
}

impl SensorOverride {
    pub fn is_empty(&self) -> bool {
        self.critical_min.is_none()
            && self.critical_max.is_none()
            && self.optimal_min.is_none()
            && self.optimal_max.is_none()
    }

    /// Fill bounds this override does not set yet from `other`
    pub fn fill_missing(&mut self, other: &Self) {
        self.critical_min = self.critical_min.or(other.critical_min);
        self.critical_max = self.critical_max.or(other.critical_max);
        self.optimal_min = self.optimal_min.or(other.optimal_min);
        self.optimal_max = self.optimal_max.or(other.optimal_max);
    }

    /// Apply on top of `base`.
    ///
    /// Stored data was validated when written against the layers of that moment,
    /// so the result is repaired rather than rejected: a bound left over from
    /// `base` yields to the overridden one, and the critical band widens to
    /// contain the optimal band.
    pub fn apply(&self, base: ThresholdSpec) -> ThresholdSpec {
        let mut spec = base;
        if let Some(v) = self.critical_min {
            spec.critical_min = v;
        }
        if let Some(v) = self.critical_max {
            spec.critical_max = v;
        }
        if let Some(v) = self.optimal_min {
            spec.optimal_min = v;
        }
        if let Some(v) = self.optimal_max {
            spec.optimal_max = v;
        }

        if spec.optimal_min > spec.optimal_max {
            match (self.optimal_min.is_some(), self.optimal_max.is_some()) {
                (true, false) => spec.optimal_max = spec.optimal_min,
                (false, true) => spec.optimal_min = spec.optimal_max,
                _ => std::mem::swap(&mut spec.optimal_min, &mut spec.optimal_max),
            }
        }
        if spec.critical_min > spec.critical_max {
            std::mem::swap(&mut spec.critical_min, &mut spec.critical_max);
        }
        spec.critical_min = spec.critical_min.min(spec.optimal_min);
        spec.critical_max = spec.critical_max.max(spec.optimal_max);
        spec
    }
}

/// Decode a whole per-device threshold document into overrides keyed by
/// canonical sensor name.
///
/// When two entries address the same bound of the same sensor, the full form
/// beats the structured form, which beats flat keys; an entry keyed by the
/// canonical name beats an alias spelling; remaining ties go to document order.
pub fn decode_device_overrides(
    document: &Value,
    aliases: &SensorAliases,
) -> BTreeMap<String, SensorOverride> {
    let mut overrides: BTreeMap<String, SensorOverride> = BTreeMap::new();
    let Some(entries) = document.as_object() else {
        return overrides;
    };

    let mut decoded: Vec<(String, ThresholdEncoding)> = entries
        .iter()
        .filter_map(|(key, value)| {
            let entry = ThresholdEncoding::decode(key, value);
            if entry.is_none() {
                debug!("[RESOLVER] Skipping undecodable threshold entry '{}'", key);
            }
            let entry = entry?;
            Some((aliases.canonicalize(entry.sensor()), entry))
        })
        .collect();
    // Stable sort keeps document order within a rank
    decoded.sort_by_key(|(sensor, entry)| {
        (entry.precedence(), entry.sensor() != sensor.as_str())
    });

    for (sensor, entry) in decoded {
        overrides
            .entry(sensor)
            .or_default()
            .fill_missing(&entry.to_override());
    }
    overrides
}

/// Check the ordering invariant of a spec about to be written
pub fn validate(spec: &ThresholdSpec) -> Result<(), ThresholdViolation> {
    spec.validate()
}

/// Turn an operator's safe range into a three-tier spec.
///
/// The safe range becomes the critical band; [`WARNING_MARGIN`] of its width is
/// carved from each end to form the optimal band.
pub fn derive_from_safe_range(min: f64, max: f64) -> Result<ThresholdSpec, ThresholdViolation> {
    if !min.is_finite() || !max.is_finite() {
        return Err(ThresholdViolation::NonFinite);
    }
    if min >= max {
        return Err(ThresholdViolation::EmptySafeRange { min, max });
    }
    let margin = (max - min) * WARNING_MARGIN;
    let spec = ThresholdSpec::new(min, min + margin, max - margin, max);
    spec.validate()?;
    Ok(spec)
}

/// Immutable snapshot of all threshold layers
#[derive(Debug, Clone)]
pub struct ThresholdResolver {
    registry: Arc<SensorRegistry>,
    global: BTreeMap<String, ThresholdSpec>,
    devices: HashMap<String, BTreeMap<String, SensorOverride>>,
}

impl ThresholdResolver {
    pub fn new(registry: Arc<SensorRegistry>) -> Self {
        Self {
            registry,
            global: BTreeMap::new(),
            devices: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_global(mut self, global: BTreeMap<String, ThresholdSpec>) -> Self {
        self.global = global;
        self
    }

    pub fn set_global(&mut self, sensor: impl Into<String>, spec: ThresholdSpec) {
        self.global.insert(sensor.into(), spec);
    }

    pub fn set_device_overrides(
        &mut self,
        device_id: impl Into<String>,
        overrides: BTreeMap<String, SensorOverride>,
    ) {
        self.devices.insert(device_id.into(), overrides);
    }

    /// Decode and install a stored per-device threshold document
    pub fn set_device_document(
        &mut self,
        device_id: impl Into<String>,
        document: &Value,
        aliases: &SensorAliases,
    ) {
        self.set_device_overrides(device_id, decode_device_overrides(document, aliases));
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    /// Global layer: configured spec, else registry default
    pub fn global_spec(&self, sensor: &str) -> Option<ThresholdSpec> {
        self.global
            .get(sensor)
            .copied()
            .or_else(|| self.registry.get(sensor).map(|meta| meta.thresholds()))
    }

    fn device_override(&self, device_id: &str, sensor: &str) -> Option<&SensorOverride> {
        self.devices
            .get(device_id)
            .and_then(|overrides| overrides.get(sensor))
    }

    /// Spec for a (device, sensor) pair, or `None` when no layer mentions the sensor
    pub fn resolve(&self, device_id: &str, sensor: &str) -> Option<ThresholdSpec> {
        let global = self.global_spec(sensor);
        match (self.device_override(device_id, sensor), global) {
            (Some(device), Some(base)) => Some(device.apply(base)),
            (Some(device), None) => Some(device.apply(generic_metadata(sensor).thresholds())),
            (None, global) => global,
        }
    }

    /// Like [`resolve`](Self::resolve) but falls back to the generic default
    pub fn resolve_or_default(&self, device_id: &str, sensor: &str) -> ThresholdSpec {
        self.resolve(device_id, sensor)
            .unwrap_or_else(|| generic_metadata(sensor).thresholds())
    }

    /// Global layer for every sensor known to the registry or configuration
    pub fn all_global(&self) -> BTreeMap<String, ThresholdSpec> {
        self.registry
            .defaults()
            .keys()
            .chain(self.global.keys())
            .filter_map(|sensor| Some((sensor.clone(), self.global_spec(sensor)?)))
            .collect()
    }

    /// Effective spec of every sensor that applies to one device
    pub fn device_thresholds(&self, device_id: &str) -> BTreeMap<String, ThresholdSpec> {
        let mut specs = self.all_global();
        if let Some(overrides) = self.devices.get(device_id) {
            for sensor in overrides.keys() {
                if let Some(spec) = self.resolve(device_id, sensor) {
                    specs.insert(sensor.clone(), spec);
                }
            }
        }
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver() -> ThresholdResolver {
        ThresholdResolver::new(Arc::new(SensorRegistry::builtin()))
    }

    #[test]
    fn test_layers_override_in_order() {
        let mut resolver = resolver();
        let registry_ph = resolver.resolve("tank-1", "ph").unwrap();
        assert_eq!(registry_ph, ThresholdSpec::new(6.0, 6.8, 8.4, 9.5));

        resolver.set_global("ph", ThresholdSpec::new(5.5, 6.5, 8.5, 10.0));
        assert_eq!(
            resolver.resolve("tank-1", "ph").unwrap(),
            ThresholdSpec::new(5.5, 6.5, 8.5, 10.0)
        );

        resolver.set_device_document(
            "tank-1",
            &json!({"ph": {"min_value": 7.0, "max_value": 8.0}}),
            &SensorAliases::builtin(),
        );
        assert_eq!(
            resolver.resolve("tank-1", "ph").unwrap(),
            ThresholdSpec::new(5.5, 7.0, 8.0, 10.0)
        );
        // Other devices keep the global layer
        assert_eq!(
            resolver.resolve("tank-2", "ph").unwrap(),
            ThresholdSpec::new(5.5, 6.5, 8.5, 10.0)
        );
    }

    #[test]
    fn test_flat_and_structured_encodings_resolve_equally() {
        let aliases = SensorAliases::builtin();
        let mut flat = resolver();
        flat.set_device_document("tank", &json!({"temp_min": 25.0, "temp_max": 30.0}), &aliases);
        let mut structured = resolver();
        structured.set_device_document(
            "tank",
            &json!({"temperature": {"min_value": 25.0, "max_value": 30.0}}),
            &aliases,
        );

        let a = flat.resolve("tank", "temperature").unwrap();
        let b = structured.resolve("tank", "temperature").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, ThresholdSpec::new(18.0, 25.0, 30.0, 35.0));
    }

    #[test]
    fn test_partial_flat_override() {
        let mut resolver = resolver();
        resolver.set_device_document(
            "tank",
            &json!({"ph_max": 8.0}),
            &SensorAliases::builtin(),
        );
        assert_eq!(
            resolver.resolve("tank", "ph").unwrap(),
            ThresholdSpec::new(6.0, 6.8, 8.0, 9.5)
        );
    }

    #[test]
    fn test_override_outside_critical_band_widens_it() {
        let mut resolver = resolver();
        resolver.set_device_document(
            "tank",
            &json!({"temperature": {"min_value": 15.0, "max_value": 38.0}}),
            &SensorAliases::builtin(),
        );
        let spec = resolver.resolve("tank", "temperature").unwrap();
        assert!(spec.validate().is_ok());
        assert_eq!(spec, ThresholdSpec::new(15.0, 15.0, 38.0, 38.0));
    }

    #[test]
    fn test_full_encoding_sets_critical_bounds() {
        let mut resolver = resolver();
        resolver.set_device_document(
            "tank",
            &json!({"oxygen": {"min": 3.0, "optimal_min": 5.0, "optimal_max": 8.0, "max": 10.0}}),
            &SensorAliases::builtin(),
        );
        assert_eq!(
            resolver.resolve("tank", "oxygen").unwrap(),
            ThresholdSpec::new(3.0, 5.0, 8.0, 10.0)
        );
    }

    #[test]
    fn test_unknown_sensor_is_unresolvable_without_override() {
        let mut resolver = resolver();
        assert!(resolver.resolve("tank", "chlorophyll").is_none());
        assert_eq!(
            resolver.resolve_or_default("tank", "chlorophyll"),
            ThresholdSpec::new(0.0, 20.0, 80.0, 100.0)
        );

        resolver.set_device_document(
            "tank",
            &json!({"chlorophyll_max": 50.0}),
            &SensorAliases::builtin(),
        );
        assert_eq!(
            resolver.resolve("tank", "chlorophyll").unwrap(),
            ThresholdSpec::new(0.0, 20.0, 50.0, 100.0)
        );
    }

    #[test]
    fn test_decode_ignores_unrelated_entries() {
        let overrides = decode_device_overrides(
            &json!({"ph_min": 6.5, "note": "calibrated", "ph_offset": 0.1, "ph": {"min_value": 6.0}}),
            &SensorAliases::builtin(),
        );
        assert_eq!(overrides.len(), 1);
        // Structured entry outranks the flat key for the same bound
        assert_eq!(overrides["ph"].optimal_min, Some(6.0));
    }

    #[test]
    fn test_full_entry_outranks_stale_flat_keys() {
        let overrides = decode_device_overrides(
            &json!({
                "ph_min": 7.9,
                "temp_max": 40.0,
                "ph": {"min": 6.0, "optimal_min": 6.5, "optimal_max": 8.5, "max": 9.0},
                "temperature": {"min_value": 22.0, "max_value": 30.0},
            }),
            &SensorAliases::builtin(),
        );
        let ph = overrides["ph"];
        assert_eq!(ph.optimal_min, Some(6.5));
        assert_eq!(ph.critical_max, Some(9.0));
        assert_eq!(overrides["temperature"].optimal_max, Some(30.0));
    }

    #[test]
    fn test_canonical_key_outranks_alias_spelling() {
        let overrides = decode_device_overrides(
            &json!({
                "temp": {"min_value": 20.0, "max_value": 26.0},
                "temperature": {"min_value": 24.0, "max_value": 31.0},
            }),
            &SensorAliases::builtin(),
        );
        assert_eq!(overrides["temperature"].optimal_min, Some(24.0));
        assert_eq!(overrides["temperature"].optimal_max, Some(31.0));
    }

    #[test]
    fn test_derive_from_safe_range() {
        let spec = derive_from_safe_range(4.0, 8.0).unwrap();
        assert!((spec.optimal_min - 4.8).abs() < 1e-9);
        assert!((spec.optimal_max - 7.2).abs() < 1e-9);
        assert_eq!(spec.critical_min, 4.0);
        assert_eq!(spec.critical_max, 8.0);

        assert!(matches!(
            derive_from_safe_range(8.0, 8.0),
            Err(ThresholdViolation::EmptySafeRange { .. })
        ));
        assert!(derive_from_safe_range(f64::INFINITY, 8.0).is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_spec() {
        assert!(validate(&ThresholdSpec::new(0.0, 50.0, 40.0, 100.0)).is_err());
        assert!(validate(&ThresholdSpec::new(0.0, 40.0, 50.0, 100.0)).is_ok());
    }

    #[test]
    fn test_device_thresholds_merges_layers() {
        let mut resolver = resolver();
        resolver.set_device_document(
            "tank",
            &json!({"turbidity_max": 40.0}),
            &SensorAliases::builtin(),
        );
        let specs = resolver.device_thresholds("tank");
        assert!(specs.contains_key("ph"));
        assert_eq!(specs["turbidity"].optimal_max, 40.0);
        assert!(!resolver.device_thresholds("other").contains_key("turbidity"));
    }
}
