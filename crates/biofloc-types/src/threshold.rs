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

use crate::device::HealthStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Safe-range definition for one sensor, globally or on one device.
///
/// Readings outside `[critical_min, critical_max]` are critical, readings inside
/// the critical band but outside `[optimal_min, optimal_max]` are a warning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub critical_min: f64,
    pub critical_max: f64,
    pub optimal_min: f64,
    pub optimal_max: f64,
}

/// Reason a threshold spec was refused at write time
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ThresholdViolation {
    #[error("threshold bounds must be finite numbers")]
    NonFinite,

    #[error("critical_min ({critical_min}) must not exceed optimal_min ({optimal_min})")]
    CriticalMinAboveOptimalMin { critical_min: f64, optimal_min: f64 },

    #[error("optimal_min ({optimal_min}) must not exceed optimal_max ({optimal_max})")]
    OptimalMinAboveOptimalMax { optimal_min: f64, optimal_max: f64 },

    #[error("optimal_max ({optimal_max}) must not exceed critical_max ({critical_max})")]
    OptimalMaxAboveCriticalMax { optimal_max: f64, critical_max: f64 },

    #[error("safe range minimum ({min}) must be lower than its maximum ({max})")]
    EmptySafeRange { min: f64, max: f64 },
}

impl ThresholdSpec {
    pub fn new(critical_min: f64, optimal_min: f64, optimal_max: f64, critical_max: f64) -> Self {
        Self {
            critical_min,
            critical_max,
            optimal_min,
            optimal_max,
        }
    }

    /// Check `critical_min <= optimal_min <= optimal_max <= critical_max`
    pub fn validate(&self) -> Result<(), ThresholdViolation> {
        let bounds = [
            self.critical_min,
            self.optimal_min,
            self.optimal_max,
            self.critical_max,
        ];
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(ThresholdViolation::NonFinite);
        }
        if self.critical_min > self.optimal_min {
            return Err(ThresholdViolation::CriticalMinAboveOptimalMin {
                critical_min: self.critical_min,
                optimal_min: self.optimal_min,
            });
        }
        if self.optimal_min > self.optimal_max {
            return Err(ThresholdViolation::OptimalMinAboveOptimalMax {
                optimal_min: self.optimal_min,
                optimal_max: self.optimal_max,
            });
        }
        if self.optimal_max > self.critical_max {
            return Err(ThresholdViolation::OptimalMaxAboveCriticalMax {
                optimal_max: self.optimal_max,
                critical_max: self.critical_max,
            });
        }
        Ok(())
    }

    /// Classify a single reading against this spec
    pub fn classify(&self, value: f64) -> HealthStatus {
        if value < self.critical_min || value > self.critical_max {
            HealthStatus::Critical
        } else if value < self.optimal_min || value > self.optimal_max {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        }
    }
}

/// Display metadata and default thresholds for one sensor, in the stored
/// `{label, unit, min, max, optimal_min, optimal_max}` form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMetadata {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub unit: String,
    #[serde(rename = "min", default)]
    pub critical_min: f64,
    #[serde(rename = "max", default = "default_critical_max")]
    pub critical_max: f64,
    #[serde(default)]
    pub optimal_min: f64,
    #[serde(default = "default_critical_max")]
    pub optimal_max: f64,
}

fn default_critical_max() -> f64 {
    100.0
}

impl SensorMetadata {
    pub fn new(label: impl Into<String>, unit: impl Into<String>, spec: ThresholdSpec) -> Self {
        Self {
            label: label.into(),
            unit: unit.into(),
            critical_min: spec.critical_min,
            critical_max: spec.critical_max,
            optimal_min: spec.optimal_min,
            optimal_max: spec.optimal_max,
        }
    }

    pub fn thresholds(&self) -> ThresholdSpec {
        ThresholdSpec::new(
            self.critical_min,
            self.optimal_min,
            self.optimal_max,
            self.critical_max,
        )
    }

    /// Replace the threshold part, keeping label and unit
    pub fn set_thresholds(&mut self, spec: ThresholdSpec) {
        self.critical_min = spec.critical_min;
        self.critical_max = spec.critical_max;
        self.optimal_min = spec.optimal_min;
        self.optimal_max = spec.optimal_max;
    }
}
