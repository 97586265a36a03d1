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

use crate::error::{Result, StoreError};
use crate::store::{DocumentStore, FindQuery};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

/// Independent network budgets of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTimeouts {
    /// TCP/TLS connection establishment
    pub connect: Duration,
    /// One request/response exchange
    pub socket: Duration,
    /// Waiting for the server to start answering at all
    pub server_selection: Duration,
}

impl Default for StoreTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(20),
            socket: Duration::from_secs(20),
            server_selection: Duration::from_secs(20),
        }
    }
}

/// Client for an HTTP document data API
/// (`POST {endpoint}/action/{find|aggregate|replaceOne|updateOne|deleteOne}`)
#[derive(Clone)]
pub struct DataApiClient {
    base_url: String,
    api_key: String,
    data_source: Option<String>,
    database: String,
    client: Client,
    server_selection: Duration,
}

impl fmt::Debug for DataApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataApiClient")
            .field("base_url", &self.base_url)
            .field("data_source", &self.data_source)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl DataApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        database: impl Into<String>,
        timeouts: StoreTimeouts,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.socket)
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            data_source: None,
            database: database.into(),
            client,
            server_selection: timeouts.server_selection,
        })
    }

    /// Cluster name some data APIs require next to the database
    #[must_use]
    pub fn with_data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = Some(data_source.into());
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    async fn action(&self, action: &str, collection: &str, mut body: Map<String, Value>) -> Result<Value> {
        let url = format!("{}/action/{}", self.base_url, action);
        if let Some(data_source) = &self.data_source {
            body.insert("dataSource".to_owned(), Value::from(data_source.as_str()));
        }
        body.insert("database".to_owned(), Value::from(self.database.as_str()));
        body.insert("collection".to_owned(), Value::from(collection));

        debug!("🔍 [DATA API] {} on {}.{}", action, self.database, collection);

        let request = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.server_selection, request)
            .await
            .map_err(|_| StoreError::Timeout(self.server_selection))??;

        let status = response.status();
        if status.is_success() {
            response
                .json::<Value>()
                .await
                .map_err(|e| StoreError::MalformedResponse(format!("{action}: {e}")))
        } else {
            let message = response.text().await.unwrap_or_default();
            error!("❌ [DATA API] {} failed with status {}: {}", action, status, message);
            Err(StoreError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn documents(action: &str, mut response: Value) -> Result<Vec<Value>> {
    match response.get_mut("documents").map(Value::take) {
        Some(Value::Array(docs)) => Ok(docs),
        _ => Err(StoreError::MalformedResponse(format!(
            "{action}: response has no documents array"
        ))),
    }
}

fn body(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl DocumentStore for DataApiClient {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>> {
        let mut request = body(json!({ "filter": query.filter }));
        if let Some(projection) = &query.projection {
            request.insert("projection".to_owned(), Value::Object(projection.clone()));
        }
        if let Some(sort) = &query.sort {
            request.insert("sort".to_owned(), Value::Object(sort.clone()));
        }
        if let Some(limit) = query.limit {
            request.insert("limit".to_owned(), Value::from(limit));
        }
        let response = self.action("find", collection, request).await?;
        documents("find", response)
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> Result<Vec<Value>> {
        let response = self
            .action("aggregate", collection, body(json!({ "pipeline": pipeline })))
            .await?;
        documents("aggregate", response)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
        document: Value,
        upsert: bool,
    ) -> Result<bool> {
        self.action(
            "replaceOne",
            collection,
            body(json!({ "filter": filter, "replacement": document, "upsert": upsert })),
        )
        .await?;
        Ok(true)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
        update: &Value,
        upsert: bool,
    ) -> Result<bool> {
        let response = self
            .action(
                "updateOne",
                collection,
                body(json!({ "filter": filter, "update": update, "upsert": upsert })),
            )
            .await?;
        let matched = response.get("matchedCount").and_then(Value::as_u64).unwrap_or(0);
        Ok(matched > 0 || response.get("upsertedId").is_some() || upsert)
    }

    async fn delete_one(&self, collection: &str, filter: &Map<String, Value>) -> Result<bool> {
        let response = self
            .action("deleteOne", collection, body(json!({ "filter": filter })))
            .await?;
        Ok(response.get("deletedCount").and_then(Value::as_u64).unwrap_or(0) > 0)
    }
}
