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

//! Multi-source fetch.
//!
//! One task per source, joined under a deadline. A source that fails, or is
//! still running when the deadline passes, contributes nothing; the others are
//! returned as-is together with the names of the sources that were lost.

use crate::error::{Result, StoreError};
use crate::normalize::Normalizer;
use crate::retry::RetryPolicy;
use crate::store::{DocumentStore, FindQuery};
use biofloc_types::CanonicalRecord;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Newest documents scanned per source when server-side grouping is unavailable
pub const DEFAULT_LATEST_WINDOW: usize = 2000;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
const DEFAULT_RANGE_LIMIT: usize = 5000;

/// Readings dated before this are treated as clock garbage
pub fn plausibility_floor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// One configured telemetry source
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub collection: String,
    /// Ask the server to group by device; otherwise scan the newest window
    pub server_grouping: bool,
    pub store: Arc<dyn DocumentStore>,
}

impl Source {
    pub fn new(
        name: impl Into<String>,
        collection: impl Into<String>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            server_grouping: true,
            store,
        }
    }

    #[must_use]
    pub fn with_server_grouping(mut self, enabled: bool) -> Self {
        self.server_grouping = enabled;
        self
    }
}

/// Records of one fetch plus the sources that contributed nothing because
/// they failed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchReport {
    pub records: Vec<CanonicalRecord>,
    pub failed_sources: Vec<String>,
}

impl FetchReport {
    /// Some, but not all, sources failed
    pub fn is_partial(&self) -> bool {
        !self.failed_sources.is_empty()
    }
}

/// Bounded history query
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub devices: Option<Vec<String>>,
    /// Per source
    pub limit: usize,
}

impl Default for RangeQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            devices: None,
            limit: DEFAULT_RANGE_LIMIT,
        }
    }
}

impl RangeQuery {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_devices(mut self, devices: Vec<String>) -> Self {
        self.devices = Some(devices);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn accepts(&self, record: &CanonicalRecord, floor: DateTime<Utc>) -> bool {
        if let Some(devices) = &self.devices
            && !devices.contains(&record.device_id)
        {
            return false;
        }
        match record.timestamp {
            Some(ts) => {
                ts >= floor
                    && self.start.is_none_or(|start| ts >= start)
                    && self.end.is_none_or(|end| ts <= end)
            }
            None => self.start.is_none() && self.end.is_none(),
        }
    }
}

/// Fetches and normalizes telemetry from every configured source, in priority
/// order (first source wins on duplicate device ids).
#[derive(Debug, Clone)]
pub struct SourceAdapter {
    sources: Vec<Source>,
    normalizer: Arc<Normalizer>,
    retry: RetryPolicy,
    deadline: Duration,
    latest_window: usize,
    floor: DateTime<Utc>,
}

impl SourceAdapter {
    pub fn new(sources: Vec<Source>, normalizer: Normalizer) -> Self {
        Self {
            sources,
            normalizer: Arc::new(normalizer),
            retry: RetryPolicy::default(),
            deadline: DEFAULT_DEADLINE,
            latest_window: DEFAULT_LATEST_WINDOW,
            floor: plausibility_floor(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_latest_window(mut self, window: usize) -> Self {
        self.latest_window = window.max(1);
        self
    }

    #[must_use]
    pub fn with_plausibility_floor(mut self, floor: DateTime<Utc>) -> Self {
        self.floor = floor;
        self
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Normalize a batch, dropping malformed documents and unknown devices
    fn normalize_all(normalizer: &Normalizer, source: &str, docs: &[Value]) -> Vec<CanonicalRecord> {
        let mut records = Vec::with_capacity(docs.len());
        let mut dropped = 0;
        for doc in docs {
            match normalizer.normalize(doc) {
                Some(record) if !record.is_rejected() => records.push(record),
                _ => dropped += 1,
            }
        }
        if dropped > 0 {
            debug!("[SOURCE] {}: dropped {} unusable documents", source, dropped);
        }
        records
    }

    /// Newest reading of every device across all sources
    pub async fn fetch_latest_per_device(&self) -> FetchReport {
        let window = self.latest_window;
        let report = self
            .fan_out("latest", move |source, normalizer, retry| async move {
                latest_from_source(&source, &normalizer, retry, window).await
            })
            .await;

        let mut seen = HashSet::new();
        let records: Vec<_> = report
            .records
            .into_iter()
            .filter(|record| seen.insert(record.device_id.clone()))
            .collect();

        info!(
            "📡 [SOURCE] Latest readings for {} devices ({} sources failed)",
            records.len(),
            report.failed_sources.len()
        );
        FetchReport {
            records,
            failed_sources: report.failed_sources,
        }
    }

    /// Newest reading of one device. Sources are tried in priority order and the
    /// first one with a hit wins.
    pub async fn fetch_latest_for_device(&self, device_id: &str) -> FetchReport {
        let mut report = FetchReport::default();
        let query = FindQuery::filter(device_filter(&[device_id.to_owned()]))
            .newest_first("timestamp")
            .limit(1);

        for source in &self.sources {
            let label = format!("{} find {}", source.name, device_id);
            let result = tokio::time::timeout(
                self.deadline,
                self.retry
                    .run(&label, || source.store.find(&source.collection, &query)),
            )
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(self.deadline)));

            match result {
                Ok(docs) => {
                    let records = Self::normalize_all(&self.normalizer, &source.name, &docs);
                    if let Some(record) = records.into_iter().next() {
                        report.records.push(record);
                        break;
                    }
                }
                Err(e) => {
                    warn!("⚠️ [SOURCE] {} failed for device {}: {}", source.name, device_id, e);
                    report.failed_sources.push(source.name.clone());
                }
            }
        }
        report
    }

    /// Readings inside a time window. The device filter is pushed to the store;
    /// time bounds are applied after normalization because sources encode
    /// timestamps differently.
    pub async fn fetch_range(&self, query: &RangeQuery) -> FetchReport {
        let mut filter = Map::new();
        if let Some(devices) = &query.devices {
            filter = device_filter(devices);
        }
        let pipeline = Arc::new(vec![
            json!({ "$match": filter }),
            json!({ "$sort": { "_id": -1 } }),
            json!({ "$limit": query.limit }),
        ]);

        let report = self
            .fan_out("range", move |source, normalizer, retry| {
                let pipeline = Arc::clone(&pipeline);
                async move {
                    let label = format!("{} aggregate", source.name);
                    let docs = retry
                        .run(&label, || source.store.aggregate(&source.collection, &pipeline))
                        .await?;
                    Ok::<_, StoreError>(Self::normalize_all(&normalizer, &source.name, &docs))
                }
            })
            .await;

        let mut seen = HashSet::new();
        let records: Vec<_> = report
            .records
            .into_iter()
            .filter(|record| query.accepts(record, self.floor))
            .filter(|record| {
                record.source_id.is_empty()
                    || seen.insert((record.device_id.clone(), record.source_id.clone()))
            })
            .collect();

        debug!(
            "[SOURCE] Range fetch returned {} records ({} sources failed)",
            records.len(),
            report.failed_sources.len()
        );
        FetchReport {
            records,
            failed_sources: report.failed_sources,
        }
    }

    /// Run `task` once per source concurrently and concatenate the results in
    /// source order. Tasks still running at the deadline are aborted.
    async fn fan_out<F, Fut>(&self, what: &str, task: F) -> FetchReport
    where
        F: Fn(Source, Arc<Normalizer>, RetryPolicy) -> Fut,
        Fut: Future<Output = Result<Vec<CanonicalRecord>>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for (index, source) in self.sources.iter().enumerate() {
            let fut = task(source.clone(), Arc::clone(&self.normalizer), self.retry);
            set.spawn(async move { (index, fut.await) });
        }

        let mut results: Vec<Option<Vec<CanonicalRecord>>> = vec![None; self.sources.len()];
        let deadline = Instant::now() + self.deadline;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((index, Ok(records))))) => results[index] = Some(records),
                Ok(Some(Ok((index, Err(e))))) => {
                    warn!("⚠️ [SOURCE] {} {} fetch failed: {}", self.sources[index].name, what, e);
                }
                Ok(Some(Err(join_error))) => {
                    warn!("⚠️ [SOURCE] {} fetch task ended abnormally: {}", what, join_error);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "⏱️ [SOURCE] {} fetch deadline of {:?} reached, abandoning {} sources",
                        what,
                        self.deadline,
                        set.len()
                    );
                    set.abort_all();
                    break;
                }
            }
        }

        let mut report = FetchReport::default();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Some(records) => report.records.extend(records),
                None => report.failed_sources.push(source.name.clone()),
            }
        }
        report
    }
}

/// Filter matching any of the device id fields the normalizer reads
fn device_filter(devices: &[String]) -> Map<String, Value> {
    let any = json!({ "$in": devices });
    let mut filter = Map::new();
    filter.insert(
        "$or".to_owned(),
        json!([
            { "device_id": any },
            { "dispositivo_id": any },
            { "metadata.device_id": any },
        ]),
    );
    filter
}

fn group_latest_pipeline() -> Vec<Value> {
    vec![
        json!({ "$sort": { "timestamp": -1 } }),
        json!({
            "$group": {
                "_id": { "$ifNull": ["$device_id", { "$ifNull": ["$dispositivo_id", "$metadata.device_id"] }] },
                "doc": { "$first": "$$ROOT" }
            }
        }),
    ]
}

async fn latest_from_source(
    source: &Source,
    normalizer: &Normalizer,
    retry: RetryPolicy,
    window: usize,
) -> Result<Vec<CanonicalRecord>> {
    if source.server_grouping {
        let label = format!("{} group latest", source.name);
        let pipeline = group_latest_pipeline();
        match retry
            .run(&label, || source.store.aggregate(&source.collection, &pipeline))
            .await
        {
            Ok(groups) => {
                let docs: Vec<Value> = groups
                    .into_iter()
                    .filter_map(|mut group| group.get_mut("doc").map(Value::take))
                    .collect();
                return Ok(SourceAdapter::normalize_all(normalizer, &source.name, &docs));
            }
            Err(e) if !e.is_transient() => {
                debug!(
                    "[SOURCE] {}: server grouping unavailable ({}), scanning newest {}",
                    source.name, e, window
                );
            }
            Err(e) => return Err(e),
        }
    }

    let label = format!("{} find latest", source.name);
    let query = FindQuery::all().newest_first("timestamp").limit(window);
    let docs = retry
        .run(&label, || source.store.find(&source.collection, &query))
        .await?;

    // The store sorts raw values, which mixes encodings; pick by parsed instant
    let mut newest: Vec<CanonicalRecord> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for record in SourceAdapter::normalize_all(normalizer, &source.name, &docs) {
        match slots.get(&record.device_id) {
            Some(&slot) => {
                if record.timestamp > newest[slot].timestamp {
                    newest[slot] = record;
                }
            }
            None => {
                slots.insert(record.device_id.clone(), newest.len());
                newest.push(record);
            }
        }
    }
    Ok(newest)
}
