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

//! Raw document → [`CanonicalRecord`].
//!
//! Upstream writers disagree on field names, sensor payload shapes and
//! timestamp encodings. Resolution is first-match-wins per attribute and never
//! fails: unreadable parts degrade to their "absent" value.

use biofloc_core::{AliasCollisionPolicy, LocalOffset, SensorAliases};
use biofloc_types::{CanonicalRecord, UNASSIGNED_LOCATION, UNKNOWN_DEVICE_ID};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use tracing::{debug, trace};

/// Epoch values above this are milliseconds, below it seconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const DEVICE_ID_PATHS: &[&str] = &["device_id", "dispositivo_id", "metadata.device_id"];
const SENSOR_CONTAINERS: &[&str] = &["sensors", "datos"];
const LOCATION_PATHS: &[&str] = &["location", "ubicacion", "metadata.location"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    aliases: SensorAliases,
    offset: LocalOffset,
    collision: AliasCollisionPolicy,
}

impl Normalizer {
    pub fn new(aliases: SensorAliases, offset: LocalOffset, collision: AliasCollisionPolicy) -> Self {
        Self {
            aliases,
            offset,
            collision,
        }
    }

    pub fn offset(&self) -> LocalOffset {
        self.offset
    }

    /// Normalize one document. `None` only when the document is not an object.
    pub fn normalize(&self, raw: &Value) -> Option<CanonicalRecord> {
        let Some(doc) = raw.as_object() else {
            debug!("[NORMALIZE] Dropping non-document value: {}", raw);
            return None;
        };

        let device_id = first_string(raw, DEVICE_ID_PATHS)
            .unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_owned());
        let location = first_string(raw, LOCATION_PATHS)
            .unwrap_or_else(|| UNASSIGNED_LOCATION.to_owned());
        let timestamp = doc
            .get("timestamp")
            .and_then(|ts| parse_timestamp(ts, self.offset));
        if timestamp.is_none() && doc.contains_key("timestamp") {
            debug!("[NORMALIZE] {}: unreadable timestamp {}", device_id, doc["timestamp"]);
        }

        let mut record = CanonicalRecord::new(device_id)
            .with_location(location)
            .with_source_id(source_id(doc.get("_id")));
        record.timestamp = timestamp;
        record.sensors = self.sensors(doc);
        record.alerts = alerts(doc.get("alerts"));
        Some(record)
    }

    fn sensors(&self, doc: &Map<String, Value>) -> BTreeMap<String, f64> {
        let mut sensors = BTreeMap::new();
        let Some(container) = SENSOR_CONTAINERS
            .iter()
            .find_map(|key| doc.get(*key).and_then(Value::as_object))
        else {
            return sensors;
        };

        for (raw_name, raw_value) in container {
            let name = self.aliases.canonicalize(raw_name);
            if name.is_empty() {
                continue;
            }
            let reading = match raw_value {
                Value::Object(wrapped) if wrapped.contains_key("value") => {
                    wrapped.get("value").and_then(parse_number)
                }
                other => parse_number(other),
            };
            let Some(reading) = reading else {
                trace!("[NORMALIZE] Dropping non-numeric reading {}={}", raw_name, raw_value);
                continue;
            };

            match sensors.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(reading);
                }
                Entry::Occupied(mut slot) => {
                    if self.collision == AliasCollisionPolicy::LastWins {
                        slot.insert(reading);
                    } else {
                        trace!(
                            "[NORMALIZE] '{}' collides with '{}', keeping first value",
                            raw_name,
                            slot.key()
                        );
                    }
                }
            }
        }
        sensors
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, part| value.get(part))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(doc: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(doc, path).and_then(scalar_string))
}

fn source_id(id: Option<&Value>) -> String {
    match id {
        Some(Value::Object(wrapped)) => wrapped
            .get("$oid")
            .and_then(scalar_string)
            .unwrap_or_default(),
        Some(other) => scalar_string(other).unwrap_or_default(),
        None => String::new(),
    }
}

fn alerts(value: Option<&Value>) -> Vec<String> {
    let text = |v: &Value| match v {
        Value::String(s) => Some(s.trim().to_owned()).filter(|s| !s.is_empty()),
        Value::Null => None,
        other => Some(other.to_string()),
    };
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(text).collect(),
        Some(single @ Value::String(_)) => text(single).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Finite numeric reading. Booleans and strings are not readings; extended
/// JSON number wrappers (`$numberDouble` etc.) are unwrapped.
pub fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(wrapped) => ["$numberDouble", "$numberInt", "$numberLong", "$numberDecimal"]
            .iter()
            .find_map(|key| wrapped.get(*key))
            .and_then(|inner| match inner {
                Value::String(s) => s.trim().parse::<f64>().ok(),
                Value::Number(n) => n.as_f64(),
                _ => None,
            }),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    if value.abs() > EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value as i64)
    } else {
        let secs = value.floor();
        let nanos = ((value - secs) * 1e9).round() as u32;
        DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
    }
}

/// Extended-JSON dates are always milliseconds, whatever their magnitude
fn from_epoch_millis(ms: f64) -> Option<DateTime<Utc>> {
    ms.is_finite()
        .then(|| DateTime::from_timestamp_millis(ms.round() as i64))
        .flatten()
}

fn from_text(text: &str, offset: LocalOffset) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(aware) = DateTime::parse_from_rfc3339(text) {
        return Some(aware.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| offset.local_to_utc(naive))
}

/// Parse any supported timestamp encoding into a UTC instant.
///
/// Numbers are epoch seconds or milliseconds (by magnitude). Strings carrying
/// an offset are converted from it; naive strings are wall-clock time at
/// `offset`. `{"$date": ...}` wraps an ISO string or epoch milliseconds.
pub fn parse_timestamp(value: &Value, offset: LocalOffset) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => from_text(s, offset),
        Value::Object(wrapped) => match wrapped.get("$date") {
            Some(Value::String(s)) => from_text(s, offset),
            Some(Value::Number(n)) => n.as_f64().and_then(from_epoch_millis),
            Some(inner @ Value::Object(_)) => parse_number(inner).and_then(from_epoch_millis),
            Some(_) => None,
            None => parse_number(value).and_then(from_epoch),
        },
        _ => None,
    }
}
