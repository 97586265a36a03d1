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

//! In-process [`DocumentStore`] with a subset of the MongoDB query language.
//!
//! Supported: equality (dotted paths), `$eq`, `$ne`, `$in`, `$nin`, `$exists`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$or`, `$and`; updates with `$set`; pipelines
//! of `$match`, `$sort` and `$limit`. Anything else is rejected as a query
//! error, so callers see the same failure class a real server would report.

use crate::error::{Result, StoreError};
use crate::normalize::{parse_number, parse_timestamp};
use crate::store::{DocumentStore, FindQuery};
use async_trait::async_trait;
use biofloc_core::LocalOffset;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::mem::discriminant;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Default)]
struct Outage {
    failures_left: u32,
    unavailable: bool,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    outage: Mutex<Outage>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_documents(self, collection: &str, documents: impl IntoIterator<Item = Value>) -> Self {
        self.collections
            .write()
            .entry(collection.to_owned())
            .or_default()
            .extend(documents);
        self
    }

    pub fn insert(&self, collection: &str, document: Value) {
        self.collections
            .write()
            .entry(collection.to_owned())
            .or_default()
            .push(document);
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail the next `count` operations with a transient error
    pub fn fail_next(&self, count: u32) {
        self.outage.lock().failures_left = count;
    }

    /// Fail every operation with a transient error until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.outage.lock().unavailable = unavailable;
    }

    /// Delay every operation, for deadline tests
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.outage.lock().latency = latency;
    }

    /// Number of operations attempted, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    async fn gate(&self) -> Result<()> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        let latency = self.outage.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut outage = self.outage.lock();
        if outage.unavailable {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        if outage.failures_left > 0 {
            outage.failures_left -= 1;
            return Err(StoreError::Unavailable("injected connection failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>> {
        self.gate().await?;
        let mut found = Vec::new();
        for doc in self.documents(collection) {
            if matches(&doc, &query.filter)? {
                found.push(doc);
            }
        }
        if let Some(sort) = &query.sort {
            sort_documents(&mut found, sort);
        }
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        if let Some(projection) = &query.projection {
            found = found.into_iter().map(|d| project(d, projection)).collect();
        }
        trace!("[MEMORY] find on {} returned {} documents", collection, found.len());
        Ok(found)
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> Result<Vec<Value>> {
        self.gate().await?;
        run_pipeline(self.documents(collection), pipeline)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
        document: Value,
        upsert: bool,
    ) -> Result<bool> {
        self.gate().await?;
        let Value::Object(mut replacement) = document else {
            return Err(StoreError::Query("replacement must be a document".into()));
        };

        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_owned()).or_default();
        let position = first_match(docs, filter)?;
        match position {
            Some(index) => {
                if !replacement.contains_key("_id")
                    && let Some(id) = docs[index].get("_id")
                {
                    replacement.insert("_id".to_owned(), id.clone());
                }
                docs[index] = Value::Object(replacement);
                Ok(true)
            }
            None if upsert => {
                for (key, value) in equality_fields(filter) {
                    replacement.entry(key).or_insert(value);
                }
                docs.push(Value::Object(replacement));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
        update: &Value,
        upsert: bool,
    ) -> Result<bool> {
        self.gate().await?;
        let fields = set_fields(update)?;

        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_owned()).or_default();
        let position = first_match(docs, filter)?;
        let target = match position {
            Some(index) => &mut docs[index],
            None if upsert => {
                docs.push(Value::Object(equality_fields(filter).into_iter().collect()));
                let last = docs.len() - 1;
                &mut docs[last]
            }
            None => return Ok(false),
        };
        for (path, value) in fields {
            set_path(target, path, value.clone());
        }
        Ok(true)
    }

    async fn delete_one(&self, collection: &str, filter: &Map<String, Value>) -> Result<bool> {
        self.gate().await?;
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match first_match(docs, filter)? {
            Some(index) => {
                docs.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn first_match(docs: &[Value], filter: &Map<String, Value>) -> Result<Option<usize>> {
    for (index, doc) in docs.iter().enumerate() {
        if matches(doc, filter)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn set_fields(update: &Value) -> Result<&Map<String, Value>> {
    let ops = update
        .as_object()
        .ok_or_else(|| StoreError::Query("update must be a document".into()))?;
    if let Some(op) = ops.keys().find(|k| k.as_str() != "$set") {
        return Err(StoreError::Query(format!("unsupported update operator {op}")));
    }
    ops.get("$set")
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::Query("update requires a $set document".into()))
}

/// Plain equality clauses of a filter, used to seed upserted documents
fn equality_fields(filter: &Map<String, Value>) -> Vec<(String, Value)> {
    filter
        .iter()
        .filter(|(key, value)| !key.starts_with('$') && !is_operator_document(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, part| value.get(part))
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut target = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        let Value::Object(map) = target else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_owned(), value);
            return;
        }
        target = map
            .entry(part.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn project(doc: Value, projection: &Map<String, Value>) -> Value {
    let Value::Object(mut fields) = doc else {
        return doc;
    };
    let include = |v: &Value| v.as_bool().unwrap_or_else(|| v.as_i64() != Some(0));
    let inclusive = projection
        .iter()
        .any(|(key, v)| key.as_str() != "_id" && include(v));

    if inclusive {
        let keep_id = projection.get("_id").is_none_or(include);
        fields.retain(|key, _| {
            projection.get(key).is_some_and(include) || (key.as_str() == "_id" && keep_id)
        });
    } else {
        fields.retain(|key, _| projection.get(key).is_none_or(include));
    }
    Value::Object(fields)
}

/// Orderable view of a scalar. Variant order follows the cross-type ordering
/// MongoDB uses for sorting.
#[derive(Debug, PartialEq, PartialOrd)]
enum Key<'a> {
    Null,
    Number(f64),
    Text(&'a str),
    Bool(bool),
    Date(i64),
}

fn key(value: &Value) -> Option<Key<'_>> {
    match value {
        Value::Null => Some(Key::Null),
        Value::Bool(b) => Some(Key::Bool(*b)),
        Value::Number(n) => n.as_f64().map(Key::Number),
        Value::String(s) => Some(Key::Text(s)),
        Value::Object(map) if map.contains_key("$date") => {
            parse_timestamp(value, LocalOffset::utc()).map(|t| Key::Date(t.timestamp_millis()))
        }
        Value::Object(map) if map.contains_key("$oid") => map.get("$oid")?.as_str().map(Key::Text),
        Value::Object(_) => parse_number(value).map(Key::Number),
        Value::Array(_) => None,
    }
}

fn values_equal(value: Option<&Value>, target: &Value) -> bool {
    let value = value.unwrap_or(&Value::Null);
    match (key(value), key(target)) {
        (Some(a), Some(b)) => a == b,
        _ => value == target,
    }
}

fn compare(value: Option<&Value>, target: &Value) -> Option<Ordering> {
    let (a, b) = (key(value?)?, key(target)?);
    if discriminant(&a) == discriminant(&b) {
        a.partial_cmp(&b)
    } else {
        None
    }
}

fn is_operator_document(value: &Value) -> bool {
    value.as_object().is_some_and(|ops| {
        !ops.is_empty()
            && ops.keys().all(|k| k.starts_with('$'))
            && !ops.keys().any(|k| {
                matches!(
                    k.as_str(),
                    "$date" | "$oid" | "$numberLong" | "$numberInt" | "$numberDouble"
                )
            })
    })
}

pub(crate) fn matches(doc: &Value, filter: &Map<String, Value>) -> Result<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$or" => {
                let mut any = false;
                for clause in clauses(condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$and" => {
                let mut all = true;
                for clause in clauses(condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            op if op.starts_with('$') => {
                return Err(StoreError::Query(format!("unsupported operator {op}")));
            }
            path => condition_matches(lookup(doc, path), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses(condition: &Value) -> Result<Vec<&Map<String, Value>>> {
    condition
        .as_array()
        .and_then(|items| items.iter().map(Value::as_object).collect())
        .ok_or_else(|| StoreError::Query("$or/$and expect an array of documents".into()))
}

fn condition_matches(value: Option<&Value>, condition: &Value) -> Result<bool> {
    let Some(ops) = condition.as_object().filter(|_| is_operator_document(condition)) else {
        return Ok(values_equal(value, condition));
    };

    for (op, operand) in ops {
        let satisfied = match op.as_str() {
            "$eq" => values_equal(value, operand),
            "$ne" => !values_equal(value, operand),
            "$in" | "$nin" => {
                let candidates = operand
                    .as_array()
                    .ok_or_else(|| StoreError::Query(format!("{op} expects an array")))?;
                let found = candidates.iter().any(|c| values_equal(value, c));
                found == (op == "$in")
            }
            "$exists" => value.is_some() == operand.as_bool().unwrap_or(true),
            "$gt" => compare(value, operand) == Some(Ordering::Greater),
            "$gte" => matches!(
                compare(value, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$lt" => compare(value, operand) == Some(Ordering::Less),
            "$lte" => matches!(
                compare(value, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            other => return Err(StoreError::Query(format!("unsupported operator {other}"))),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sort_documents(docs: &mut [Value], sort: &Map<String, Value>) {
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let ka = lookup(a, field).and_then(key).unwrap_or(Key::Null);
            let kb = lookup(b, field).and_then(key).unwrap_or(Key::Null);
            let ordering = ka.partial_cmp(&kb).unwrap_or(Ordering::Equal);
            let ordering = if direction.as_i64() == Some(-1) {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn run_pipeline(mut docs: Vec<Value>, pipeline: &[Value]) -> Result<Vec<Value>> {
    for stage in pipeline {
        let Some((name, spec)) = stage
            .as_object()
            .filter(|s| s.len() == 1)
            .and_then(|s| s.iter().next())
        else {
            return Err(StoreError::Query(
                "pipeline stage must be a single-key document".into(),
            ));
        };

        match name.as_str() {
            "$match" => {
                let filter = spec
                    .as_object()
                    .ok_or_else(|| StoreError::Query("$match expects a document".into()))?;
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                docs = kept;
            }
            "$sort" => {
                let sort = spec
                    .as_object()
                    .ok_or_else(|| StoreError::Query("$sort expects a document".into()))?;
                sort_documents(&mut docs, sort);
            }
            "$limit" => {
                let limit = spec
                    .as_u64()
                    .ok_or_else(|| StoreError::Query("$limit expects a positive integer".into()))?;
                docs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }
            other => {
                return Err(StoreError::Query(format!(
                    "unsupported aggregation stage {other}"
                )));
            }
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn readings() -> MemoryStore {
        MemoryStore::new().with_documents(
            "readings",
            [
                json!({"_id": "r1", "device_id": "tank-1", "timestamp": 1_700_000_000, "sensors": {"ph": 7.1}}),
                json!({"_id": "r2", "device_id": "tank-2", "timestamp": 1_700_000_060, "metadata": {"site": "north"}}),
                json!({"_id": "r3", "dispositivo_id": "tank-3", "timestamp": 1_700_000_030}),
            ],
        )
    }

    #[tokio::test]
    async fn test_find_with_operators_sort_and_limit() {
        let store = readings();
        let query = FindQuery::filter(obj(json!({"timestamp": {"$gte": 1_700_000_030}})))
            .newest_first("timestamp")
            .limit(5);
        let docs = store.find("readings", &query).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["r2", "r3"]);

        let query = FindQuery::filter(obj(json!({"$or": [
            {"device_id": {"$in": ["tank-1"]}},
            {"dispositivo_id": {"$in": ["tank-3"]}}
        ]})));
        assert_eq!(store.find("readings", &query).await.unwrap().len(), 2);

        let query = FindQuery::by("metadata.site", "north");
        assert_eq!(store.find("readings", &query).await.unwrap()[0]["_id"], "r2");
    }

    #[tokio::test]
    async fn test_unsupported_stage_is_logical_error() {
        let store = readings();
        let err = store
            .aggregate("readings", &[json!({"$group": {"_id": "$device_id"}})])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
        assert!(!err.is_transient());

        let docs = store
            .aggregate(
                "readings",
                &[
                    json!({"$match": {"device_id": {"$exists": true}}}),
                    json!({"$sort": {"_id": -1}}),
                    json!({"$limit": 1}),
                ],
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], "r2");
    }

    #[tokio::test]
    async fn test_update_one_sets_dotted_paths_with_upsert() {
        let store = MemoryStore::new();
        let filter = obj(json!({"_id": "tank-1"}));
        assert!(
            !store
                .update_one("devices", &filter, &json!({"$set": {"alias": "A"}}), false)
                .await
                .unwrap()
        );
        store
            .update_one(
                "devices",
                &filter,
                &json!({"$set": {"alias": "A", "thresholds.ph": {"min": 6.0}}}),
                true,
            )
            .await
            .unwrap();
        store
            .update_one(
                "devices",
                &filter,
                &json!({"$set": {"thresholds.oxygen": {"min": 3.0}}}),
                true,
            )
            .await
            .unwrap();

        let docs = store.documents("devices");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], "tank-1");
        assert_eq!(docs[0]["thresholds"]["ph"]["min"], 6.0);
        assert_eq!(docs[0]["thresholds"]["oxygen"]["min"], 3.0);
    }

    #[tokio::test]
    async fn test_replace_and_delete() {
        let store = MemoryStore::new();
        let filter = obj(json!({"_id": "sensor_thresholds"}));
        store
            .replace_one("system_config", &filter, json!({"sensors": {}}), true)
            .await
            .unwrap();
        store
            .replace_one("system_config", &filter, json!({"sensors": {"ph": {}}}), true)
            .await
            .unwrap();
        let docs = store.documents("system_config");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], "sensor_thresholds");

        assert!(store.delete_one("system_config", &filter).await.unwrap());
        assert!(!store.delete_one("system_config", &filter).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let store = readings();
        store.fail_next(1);
        let err = store.find("readings", &FindQuery::all()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.find("readings", &FindQuery::all()).await.unwrap().len(), 3);
        assert_eq!(store.calls(), 2);
    }

    #[test]
    fn test_date_values_compare_chronologically() {
        let doc = json!({"timestamp": {"$date": "2024-03-01T12:00:00Z"}});
        let filter = obj(json!({"timestamp": {"$gt": {"$date": {"$numberLong": "1709290800000"}}}}));
        assert!(matches(&doc, &filter).unwrap());
    }

    #[test]
    fn test_projection() {
        let doc = json!({"_id": 1, "device_id": "a", "sensors": {}});
        let projected = project(doc.clone(), &obj(json!({"device_id": 1})));
        assert_eq!(projected, json!({"_id": 1, "device_id": "a"}));
        let projected = project(doc, &obj(json!({"sensors": 0})));
        assert_eq!(projected, json!({"_id": 1, "device_id": "a"}));
    }
}
