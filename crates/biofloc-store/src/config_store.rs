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

use crate::retry::RetryPolicy;
use crate::store::{DocumentStore, FindQuery};
use async_trait::async_trait;
use biofloc_core::{Clock, ConfigStore, Result as CoreResult};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_COLLECTION: &str = "system_config";
pub const DEFAULT_DEVICES_COLLECTION: &str = "devices";

/// [`ConfigStore`] over two collections of a [`DocumentStore`]: config
/// documents keyed by `_id`, and one metadata document per device whose `_id`
/// is the device id.
#[derive(Debug, Clone)]
pub struct DocumentConfigStore {
    store: Arc<dyn DocumentStore>,
    config_collection: String,
    devices_collection: String,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

fn by_id(id: &str) -> Map<String, Value> {
    let mut filter = Map::new();
    filter.insert("_id".to_owned(), Value::from(id));
    filter
}

impl DocumentConfigStore {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config_collection: DEFAULT_CONFIG_COLLECTION.to_owned(),
            devices_collection: DEFAULT_DEVICES_COLLECTION.to_owned(),
            retry: RetryPolicy::default(),
            clock,
        }
    }

    #[must_use]
    pub fn with_collections(mut self, config: impl Into<String>, devices: impl Into<String>) -> Self {
        self.config_collection = config.into();
        self.devices_collection = devices.into();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn timestamp(&self) -> Value {
        Value::from(self.clock.now().to_rfc3339())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> CoreResult<Option<Value>> {
        let query = FindQuery::filter(by_id(id)).limit(1);
        let docs = self
            .retry
            .run(&format!("{collection} get {id}"), || self.store.find(collection, &query))
            .await?;
        Ok(docs.into_iter().next())
    }
}

#[async_trait]
impl ConfigStore for DocumentConfigStore {
    async fn get_config(&self, id: &str) -> CoreResult<Option<Value>> {
        self.find_by_id(&self.config_collection, id).await
    }

    async fn save_config(&self, id: &str, document: Value) -> CoreResult<bool> {
        let mut document = match document {
            Value::Object(map) => map,
            other => {
                warn!("⚠️ [CONFIG] Refusing to save non-document config '{}': {}", id, other);
                return Ok(false);
            }
        };
        document.insert("_id".to_owned(), Value::from(id));
        document.insert("last_updated".to_owned(), self.timestamp());

        let filter = by_id(id);
        let document = Value::Object(document);
        let saved = self
            .retry
            .run(&format!("save config {id}"), || {
                self.store
                    .replace_one(&self.config_collection, &filter, document.clone(), true)
            })
            .await?;
        debug!("[CONFIG] Saved config document '{}'", id);
        Ok(saved)
    }

    async fn delete_config(&self, id: &str) -> CoreResult<bool> {
        let filter = by_id(id);
        Ok(self
            .retry
            .run(&format!("delete config {id}"), || {
                self.store.delete_one(&self.config_collection, &filter)
            })
            .await?)
    }

    async fn get_device_metadata(&self, device_id: &str) -> CoreResult<Option<Value>> {
        self.find_by_id(&self.devices_collection, device_id).await
    }

    async fn get_all_devices_metadata(&self) -> CoreResult<BTreeMap<String, Value>> {
        let query = FindQuery::all();
        let docs = self
            .retry
            .run("list devices", || self.store.find(&self.devices_collection, &query))
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc
                    .get("_id")
                    .or_else(|| doc.get("device_id"))
                    .and_then(Value::as_str)?
                    .to_owned();
                Some((id, doc))
            })
            .collect())
    }

    async fn update_device_fields(
        &self,
        device_id: &str,
        mut fields: Map<String, Value>,
    ) -> CoreResult<bool> {
        fields.insert("last_updated".to_owned(), self.timestamp());
        let mut update = Map::new();
        update.insert("$set".to_owned(), Value::Object(fields));
        let update = Value::Object(update);
        let filter = by_id(device_id);

        Ok(self
            .retry
            .run(&format!("update device {device_id}"), || {
                self.store
                    .update_one(&self.devices_collection, &filter, &update, true)
            })
            .await?)
    }
}
