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

//! Store query boundary. Documents are untyped JSON trees; filters, updates
//! and pipelines use the MongoDB query language.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Parameters of a `find` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Map<String, Value>,
    pub projection: Option<Map<String, Value>>,
    pub sort: Option<Map<String, Value>>,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(filter: Map<String, Value>) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Equality on one field
    pub fn by(field: &str, value: impl Into<Value>) -> Self {
        let mut filter = Map::new();
        filter.insert(field.to_owned(), value.into());
        Self::filter(filter)
    }

    #[must_use]
    pub fn newest_first(mut self, field: &str) -> Self {
        let mut sort = Map::new();
        sort.insert(field.to_owned(), Value::from(-1));
        self.sort = Some(sort);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn projection(mut self, projection: Map<String, Value>) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Read/write access to the collections of one database
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>>;

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> Result<Vec<Value>>;

    /// Replace the first document matching `filter`; returns whether the write
    /// was acknowledged
    async fn replace_one(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
        document: Value,
        upsert: bool,
    ) -> Result<bool>;

    /// Apply an update document (`$set`) to the first match
    async fn update_one(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
        update: &Value,
        upsert: bool,
    ) -> Result<bool>;

    /// Returns whether a document was deleted
    async fn delete_one(&self, collection: &str, filter: &Map<String, Value>) -> Result<bool>;
}
