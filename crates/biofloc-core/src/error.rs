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

//! Error types for the core crate

use biofloc_types::ThresholdViolation;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid threshold for sensor '{sensor}': {violation}")]
    InvalidThreshold {
        sensor: String,
        #[source]
        violation: ThresholdViolation,
    },

    #[error("sensor registry error: {0}")]
    Registry(String),

    #[error("invalid UTC offset: {minutes} minutes")]
    InvalidOffset { minutes: i32 },

    #[error("config store error: {0}")]
    ConfigStore(String),

    #[error("registry file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn invalid_threshold(sensor: impl Into<String>, violation: ThresholdViolation) -> Self {
        Self::InvalidThreshold {
            sensor: sensor.into(),
            violation,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
