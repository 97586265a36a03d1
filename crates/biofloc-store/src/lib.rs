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

//! Document-store plumbing: the store query boundary, an HTTP data-API client,
//! an in-process store, document normalization and the multi-source adapter.

pub mod config_store;
pub mod error;
pub mod http;
pub mod memory;
pub mod normalize;
pub mod retry;
pub mod source;
pub mod store;

pub use config_store::DocumentConfigStore;
pub use error::{Result, StoreError};
pub use http::{DataApiClient, StoreTimeouts};
pub use memory::MemoryStore;
pub use normalize::{Normalizer, parse_number, parse_timestamp};
pub use retry::RetryPolicy;
pub use source::{
    DEFAULT_LATEST_WINDOW, FetchReport, RangeQuery, Source, SourceAdapter, plausibility_floor,
};
pub use store::{DocumentStore, FindQuery};
