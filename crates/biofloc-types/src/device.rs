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
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl HealthStatus {
    /// Rank used when combining sensor classifications (higher is worse).
    /// `Unknown` never takes part in a combination.
    fn severity(self) -> u8 {
        match self {
            Self::Unknown | Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
        }
    }

    /// The worse of two classifications, with Critical > Warning > Ok
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}

/// Evaluation output for one device in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub location: String,
    pub last_update: Option<DateTime<Utc>>,
    pub connection: ConnectionStatus,
    pub health: HealthStatus,
    pub sensor_values: BTreeMap<String, f64>,
    pub alerts: Vec<String>,
}

/// Operator-assigned identity of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub alias: String,
    pub location: String,
}

/// Counts over a list of devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub ok: usize,
    pub warning: usize,
    pub critical: usize,
}

impl SummaryMetrics {
    pub fn from_devices(devices: &[DeviceInfo]) -> Self {
        devices.iter().fold(Self::default(), |mut acc, device| {
            acc.total += 1;
            match device.connection {
                ConnectionStatus::Online => acc.online += 1,
                ConnectionStatus::Offline => acc.offline += 1,
            }
            match device.health {
                HealthStatus::Ok => acc.ok += 1,
                HealthStatus::Warning => acc.warning += 1,
                HealthStatus::Critical => acc.critical += 1,
                HealthStatus::Unknown => {}
            }
            acc
        })
    }

    pub fn as_map(&self) -> BTreeMap<String, usize> {
        BTreeMap::from([
            ("total".to_owned(), self.total),
            ("online".to_owned(), self.online),
            ("offline".to_owned(), self.offline),
            ("ok".to_owned(), self.ok),
            ("warning".to_owned(), self.warning),
            ("critical".to_owned(), self.critical),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(connection: ConnectionStatus, health: HealthStatus) -> DeviceInfo {
        DeviceInfo {
            device_id: "dev".to_owned(),
            location: "lab".to_owned(),
            last_update: None,
            connection,
            health,
            sensor_values: BTreeMap::new(),
            alerts: Vec::new(),
        }
    }

    #[test]
    fn test_worst_priority() {
        use HealthStatus::{Critical, Ok, Warning};
        assert_eq!(Ok.worst(Warning), Warning);
        assert_eq!(Warning.worst(Ok), Warning);
        assert_eq!(Warning.worst(Critical), Critical);
        assert_eq!(Critical.worst(Warning), Critical);
        assert_eq!(Ok.worst(Ok), Ok);
    }

    #[test]
    fn test_summary_counts() {
        let devices = vec![
            device(ConnectionStatus::Online, HealthStatus::Ok),
            device(ConnectionStatus::Online, HealthStatus::Critical),
            device(ConnectionStatus::Online, HealthStatus::Warning),
            device(ConnectionStatus::Offline, HealthStatus::Unknown),
        ];
        let summary = SummaryMetrics::from_devices(&devices);
        assert_eq!(
            summary,
            SummaryMetrics {
                total: 4,
                online: 3,
                offline: 1,
                ok: 1,
                warning: 1,
                critical: 1,
            }
        );
        assert_eq!(summary.as_map()["offline"], 1);
        assert_eq!(SummaryMetrics::from_devices(&[]).total, 0);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Offline).unwrap(),
            "\"offline\""
        );
    }
}
