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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device id assigned when no id field could be found. Records carrying it are
/// rejected before evaluation.
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// Location assigned when the source document has none.
pub const UNASSIGNED_LOCATION: &str = "unassigned";

/// One telemetry reading from one device at one instant, independent of the
/// schema of the source it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub device_id: String,

    /// Storage instant in UTC. `None` when the source timestamp was missing or
    /// could not be parsed.
    pub timestamp: Option<DateTime<Utc>>,

    pub location: String,

    /// Canonical sensor name -> finite reading
    pub sensors: BTreeMap<String, f64>,

    /// Device-reported alerts, in document order
    pub alerts: Vec<String>,

    /// Opaque identifier of the origin document (dedup/debug only)
    pub source_id: String,
}

impl CanonicalRecord {
    /// Create an empty record for a device
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: None,
            location: UNASSIGNED_LOCATION.to_owned(),
            sensors: BTreeMap::new(),
            alerts: Vec::new(),
            source_id: String::new(),
        }
    }

    /// True when the record has no usable device id and must not reach the evaluator
    pub fn is_rejected(&self) -> bool {
        self.device_id.is_empty() || self.device_id == UNKNOWN_DEVICE_ID
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    #[must_use]
    pub fn with_sensor(mut self, name: impl Into<String>, value: f64) -> Self {
        self.sensors.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_alert(mut self, alert: impl Into<String>) -> Self {
        self.alerts.push(alert.into());
        self
    }

    #[must_use]
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let record = CanonicalRecord::new("tank-a1");
        assert_eq!(record.location, UNASSIGNED_LOCATION);
        assert!(record.timestamp.is_none());
        assert!(record.sensors.is_empty());
        assert!(!record.is_rejected());
    }

    #[test]
    fn test_unknown_and_empty_ids_are_rejected() {
        assert!(CanonicalRecord::new(UNKNOWN_DEVICE_ID).is_rejected());
        assert!(CanonicalRecord::new("").is_rejected());
    }
}
