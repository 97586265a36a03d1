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

use biofloc_core::CoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("query rejected: {0}")]
    Query(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Connectivity failures worth retrying. Query and decoding errors are not:
    /// repeating them yields the same answer.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::Api { status, .. } => *status >= 500,
            Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Query(_) | Self::MalformedResponse(_) | Self::Config(_) | Self::Json(_) => false,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        Self::ConfigStore(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            StoreError::Api {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !StoreError::Api {
                status: 400,
                message: "bad filter".into()
            }
            .is_transient()
        );
        assert!(!StoreError::Query("unknown operator $foo".into()).is_transient());
        assert!(!StoreError::MalformedResponse("no documents".into()).is_transient());
    }
}
