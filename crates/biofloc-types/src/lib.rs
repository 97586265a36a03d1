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

//! Shared data model for Biofloc Monitor.
//!
//! Everything in this crate is plain data: canonical telemetry records, threshold
//! specifications and the per-device evaluation output. Behaviour lives in
//! `biofloc-core` (evaluation) and `biofloc-store` (ingestion).

pub mod device;
pub mod record;
pub mod threshold;

pub use device::{ConnectionStatus, DeviceInfo, DeviceMetadata, HealthStatus, SummaryMetrics};
pub use record::{CanonicalRecord, UNASSIGNED_LOCATION, UNKNOWN_DEVICE_ID};
pub use threshold::{SensorMetadata, ThresholdSpec, ThresholdViolation};
