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

//! Domain logic of Biofloc Monitor: sensor defaults, threshold resolution and
//! device health evaluation. Storage is reached only through [`ConfigStore`].

pub mod aliases;
pub mod clock;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod registry;
pub mod resolver;

pub use aliases::{AliasCollisionPolicy, SensorAliases};
pub use clock::{Clock, LocalOffset, ManualClock, SystemClock};
pub use config::{ConfigManager, ConfigStore, SENSOR_THRESHOLDS_CONFIG_ID};
pub use error::{CoreError, Result};
pub use evaluator::{
    DEFAULT_OFFLINE_TIMEOUT, DeviceHealthEvaluator, DeviceManager, EvaluationPass, EvaluatorState,
    calculate_summary_metrics,
};
pub use registry::{SensorRegistry, discover_sensors, generic_metadata};
pub use resolver::{
    SensorOverride, ThresholdEncoding, ThresholdResolver, WARNING_MARGIN, decode_device_overrides,
    derive_from_safe_range, validate,
};
