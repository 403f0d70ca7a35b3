//! Milvus vector store backend.
//!
//! Provides [`MilvusVectorStore`] which implements [`VectorStore`] over the
//! Milvus RESTful API (v2) using `reqwest`.
//!
//! This module is only available when the `milvus` feature is enabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use groundwork_rag::milvus::MilvusVectorStore;
//!
//! let store = MilvusVectorStore::new("http://localhost:19530", "my_database", "docs")?;
//! store.ensure_database(false).await?;
//! store.create_collection(3072).await?;
//! let results = store.search(&query_embedding, 5).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::RetrievalConfig;
use crate::document::{CollectionInfo, CollectionStatus, IndexOutcome, SearchResult};
use crate::error::{RagError, Result};
use crate::index::{IndexKind, MetricType, rank_order};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "milvus";

/// Milvus always has this database; it cannot be dropped.
const DEFAULT_DATABASE: &str = "default";

const ID_FIELD: &str = "id";
const TEXT_FIELD: &str = "text";
const EMBEDDING_FIELD: &str = "embedding";

const LOAD_STATE_LOADED: &str = "LoadStateLoaded";

/// A [`VectorStore`] backed by a [Milvus](https://milvus.io/) server.
///
/// Collections use the schema `{ id: Int64 auto-id primary key, text:
/// VarChar, embedding: FloatVector(dimension) }`. `max_text_length` counts
/// characters, so the VarChar limit is sized in UTF-8 bytes to match.
pub struct MilvusVectorStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    database: String,
    collection: String,
    index_kind: IndexKind,
    metric: MetricType,
    nprobe: usize,
    max_text_length: usize,
    timeout: Duration,
    load_poll_interval: Duration,
    /// Dimension of the collection as last described by the server.
    dimension: RwLock<Option<usize>>,
    indexed: AtomicBool,
    loaded: AtomicBool,
}

impl MilvusVectorStore {
    /// Create a store for `collection` in `database` on the server at `url`.
    pub fn new(
        url: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Result<Self> {
        let defaults = RetrievalConfig::default();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_string(),
            token: None,
            database: database.into(),
            collection: collection.into(),
            index_kind: defaults.index,
            metric: defaults.metric,
            nprobe: defaults.nprobe,
            max_text_length: defaults.max_text_length,
            timeout: defaults.timeout,
            load_poll_interval: Duration::from_millis(200),
            dimension: RwLock::new(None),
            indexed: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
        })
    }

    /// Create a store from the connection, target, and index settings of `config`.
    pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
        let mut store =
            Self::new(config.store_url(), config.database.clone(), config.collection.clone())?
                .with_index(config.index)
                .with_metric(config.metric)
                .with_nprobe(config.nprobe)
                .with_max_text_length(config.max_text_length)
                .with_timeout(config.timeout);
        if let Some(token) = &config.store_token {
            store = store.with_token(token.clone());
        }
        Ok(store)
    }

    /// Authenticate with a bearer token (`user:password` or an API key).
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the index kind built by [`create_index`](VectorStore::create_index).
    pub fn with_index(mut self, index: IndexKind) -> Self {
        self.index_kind = index;
        self
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: MetricType) -> Self {
        self.metric = metric;
        self
    }

    /// Set the number of IVF partitions probed per search.
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe;
        self
    }

    /// Set the maximum text length of newly created collections.
    pub fn with_max_text_length(mut self, max: usize) -> Self {
        self.max_text_length = max;
        self
    }

    /// Set the bound applied to each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the delay between load-state polls.
    pub fn with_load_poll_interval(mut self, interval: Duration) -> Self {
        self.load_poll_interval = interval;
        self
    }

    fn forget_collection_state(&self) {
        self.indexed.store(false, Ordering::SeqCst);
        self.loaded.store(false, Ordering::SeqCst);
    }

    fn transport_error(&self, path: &str, e: reqwest::Error) -> RagError {
        if e.is_timeout() {
            warn!(backend = BACKEND, path, timeout = ?self.timeout, "request timed out");
            return RagError::Timeout { operation: format!("milvus {path}"), timeout: self.timeout };
        }
        error!(backend = BACKEND, path, error = %e, "request failed");
        RagError::StoreUnavailable { backend: BACKEND.to_string(), message: format!("{path}: {e}") }
    }

    /// POST `body` to `/v2/vectordb/{path}` and unwrap the response envelope.
    async fn call<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<Option<T>> {
        let url = format!("{}/v2/vectordb/{path}", self.base_url);
        let mut request = self.client.post(url).timeout(self.timeout).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(path, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(backend = BACKEND, path, %status, "HTTP error");
            let message = format!("{path} returned {status}: {body}");
            return Err(if status.is_server_error() {
                RagError::StoreUnavailable { backend: BACKEND.to_string(), message }
            } else {
                RagError::VectorStoreError { backend: BACKEND.to_string(), message }
            });
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                return self.transport_error(path, e);
            }
            RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!("{path}: malformed response: {e}"),
            }
        })?;
        if envelope.code != 0 {
            let message = envelope.message.unwrap_or_default();
            debug!(backend = BACKEND, path, code = envelope.code, %message, "request rejected");
            return Err(RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!("{path} failed (code {}): {message}", envelope.code),
            });
        }
        Ok(envelope.data)
    }

    fn target(&self) -> Value {
        json!({ "dbName": self.database, "collectionName": self.collection })
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.call::<Vec<String>>("databases/list", json!({})).await?.unwrap_or_default())
    }

    async fn has_collection(&self) -> Result<bool> {
        let data: Option<HasData> = self.call("collections/has", self.target()).await?;
        Ok(data.is_some_and(|d| d.has))
    }

    /// Read the embedding dimension from the server's collection schema.
    async fn describe_dimension(&self) -> Result<usize> {
        let data: DescribeData =
            self.call("collections/describe", self.target()).await?.ok_or_else(|| {
                RagError::VectorStoreError {
                    backend: BACKEND.to_string(),
                    message: "collections/describe returned no data".into(),
                }
            })?;
        let dimension = data
            .fields
            .iter()
            .find(|f| f.name == EMBEDDING_FIELD)
            .and_then(|f| f.params.iter().find(|p| p.key == "dim"))
            .and_then(|p| p.value.as_usize())
            .ok_or_else(|| RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!(
                    "collection '{}' has no '{EMBEDDING_FIELD}' vector field",
                    self.collection
                ),
            })?;
        *self.dimension.write().await = Some(dimension);
        Ok(dimension)
    }

    async fn cached_dimension(&self) -> Result<usize> {
        if let Some(dimension) = *self.dimension.read().await {
            return Ok(dimension);
        }
        if !self.has_collection().await? {
            return Err(RagError::CollectionMissing { collection: self.collection.clone() });
        }
        self.describe_dimension().await
    }

    async fn check_dimension(&self, actual: usize) -> Result<()> {
        let expected = self.cached_dimension().await?;
        if expected != actual {
            return Err(RagError::SchemaMismatch {
                collection: self.collection.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        Ok(self.call::<Vec<String>>("indexes/list", self.target()).await?.unwrap_or_default())
    }

    async fn ensure_indexed(&self) -> Result<()> {
        if self.indexed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.list_indexes().await?.is_empty() {
            return Err(RagError::IndexMissing { collection: self.collection.clone() });
        }
        self.indexed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn load_state(&self) -> Result<String> {
        let data: Option<LoadStateData> =
            self.call("collections/get_load_state", self.target()).await?;
        Ok(data.map(|d| d.load_state).unwrap_or_default())
    }
}

// ── Milvus REST request/response types ─────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct HasData {
    has: bool,
}

#[derive(Deserialize)]
struct DescribeData {
    #[serde(default)]
    fields: Vec<FieldData>,
}

#[derive(Deserialize)]
struct FieldData {
    name: String,
    #[serde(default)]
    params: Vec<FieldParam>,
}

#[derive(Deserialize)]
struct FieldParam {
    key: String,
    value: NumberOrString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsData {
    row_count: NumberOrString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStateData {
    load_state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertData {
    #[serde(default)]
    insert_ids: Vec<NumberOrString>,
}

#[derive(Deserialize)]
struct Hit {
    id: NumberOrString,
    #[serde(rename = "distance")]
    score: f32,
    #[serde(default)]
    text: String,
}

/// Milvus encodes int64 values as JSON numbers or strings depending on version.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    String(String),
}

impl NumberOrString {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.parse().ok(),
        }
    }

    fn as_usize(&self) -> Option<usize> {
        self.as_i64().and_then(|n| usize::try_from(n).ok())
    }
}

/// Milvus reports squared L2 and raw COSINE similarities; convert them to
/// the non-negative distances [`MetricType::distance`] computes.
fn score_to_distance(metric: MetricType, score: f32) -> f32 {
    match metric {
        MetricType::L2 => score.max(0.0).sqrt(),
        MetricType::Cosine => (1.0 - score).max(0.0),
    }
}

// ── VectorStore implementation ─────────────────────────────────────

#[async_trait]
impl VectorStore for MilvusVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn ensure_database(&self, reset: bool) -> Result<()> {
        let exists = self.list_databases().await?.iter().any(|db| *db == self.database);

        if reset && exists {
            let collections: Vec<String> = self
                .call("collections/list", json!({ "dbName": self.database }))
                .await?
                .unwrap_or_default();
            for name in &collections {
                self.call::<Value>(
                    "collections/drop",
                    json!({ "dbName": self.database, "collectionName": name }),
                )
                .await?;
                info!(database = %self.database, collection = %name, "dropped collection");
            }
            *self.dimension.write().await = None;
            self.forget_collection_state();

            if self.database == DEFAULT_DATABASE {
                return Ok(());
            }
            self.call::<Value>("databases/drop", json!({ "dbName": self.database })).await?;
            info!(database = %self.database, "dropped database");
        }

        if !exists || reset {
            self.call::<Value>("databases/create", json!({ "dbName": self.database })).await?;
            info!(database = %self.database, "created database");
        } else {
            debug!(database = %self.database, "database already exists");
        }
        Ok(())
    }

    async fn create_collection(&self, dimension: usize) -> Result<CollectionInfo> {
        if dimension == 0 {
            return Err(RagError::InvalidArgument("dimension must be greater than zero".into()));
        }

        if self.has_collection().await? {
            let existing = self.describe_dimension().await?;
            if existing != dimension {
                return Err(RagError::SchemaMismatch {
                    collection: self.collection.clone(),
                    expected: existing,
                    actual: dimension,
                });
            }
            debug!(collection = %self.collection, "milvus collection already exists, reusing");
            return Ok(CollectionInfo {
                database: self.database.clone(),
                name: self.collection.clone(),
                dimension,
                created: false,
            });
        }

        // Milvus counts VarChar max_length in bytes; a char is at most 4.
        let max_text_bytes = self.max_text_length.saturating_mul(4);
        let body = json!({
            "dbName": self.database,
            "collectionName": self.collection,
            "description": format!("Reference texts and embeddings (dim={dimension})"),
            "schema": {
                "autoId": true,
                "enableDynamicField": false,
                "fields": [
                    { "fieldName": ID_FIELD, "dataType": "Int64", "isPrimary": true },
                    {
                        "fieldName": TEXT_FIELD,
                        "dataType": "VarChar",
                        "elementTypeParams": { "max_length": max_text_bytes }
                    },
                    {
                        "fieldName": EMBEDDING_FIELD,
                        "dataType": "FloatVector",
                        "elementTypeParams": { "dim": dimension }
                    }
                ]
            }
        });
        self.call::<Value>("collections/create", body).await?;
        *self.dimension.write().await = Some(dimension);
        self.forget_collection_state();

        info!(collection = %self.collection, dimension, "created milvus collection");
        Ok(CollectionInfo {
            database: self.database.clone(),
            name: self.collection.clone(),
            dimension,
            created: true,
        })
    }

    async fn drop_collection(&self) -> Result<()> {
        if self.has_collection().await? {
            self.call::<Value>("collections/drop", self.target()).await?;
            info!(collection = %self.collection, "dropped milvus collection");
        }
        *self.dimension.write().await = None;
        self.forget_collection_state();
        Ok(())
    }

    async fn insert(&self, text: &str, embedding: &[f32]) -> Result<i64> {
        self.check_dimension(embedding.len()).await?;
        let chars = text.chars().count();
        if chars > self.max_text_length {
            return Err(RagError::TextTooLong { max: self.max_text_length, actual: chars });
        }

        let body = json!({
            "dbName": self.database,
            "collectionName": self.collection,
            "data": [{ TEXT_FIELD: text, EMBEDDING_FIELD: embedding }]
        });
        let data: Option<InsertData> = self.call("entities/insert", body).await?;
        let id = data
            .and_then(|d| d.insert_ids.first().and_then(NumberOrString::as_i64))
            .ok_or_else(|| RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: "entities/insert returned no id".into(),
            })?;

        // Seal the segment so the row is durable before we return.
        self.call::<Value>("collections/flush", self.target()).await?;

        debug!(collection = %self.collection, id, "inserted document into milvus");
        Ok(id)
    }

    async fn create_index(&self) -> Result<IndexOutcome> {
        if !self.list_indexes().await?.is_empty() {
            info!(collection = %self.collection, "index already exists, skipping");
            self.indexed.store(true, Ordering::SeqCst);
            return Ok(IndexOutcome::AlreadyExists);
        }

        let mut params = json!({ "index_type": self.index_kind.as_str() });
        if let IndexKind::IvfFlat { nlist } = self.index_kind {
            params["nlist"] = json!(nlist);
        }
        let body = json!({
            "dbName": self.database,
            "collectionName": self.collection,
            "indexParams": [{
                "fieldName": EMBEDDING_FIELD,
                "indexName": EMBEDDING_FIELD,
                "metricType": self.metric.as_str(),
                "params": params
            }]
        });
        self.call::<Value>("indexes/create", body).await?;
        self.indexed.store(true, Ordering::SeqCst);

        info!(
            collection = %self.collection,
            index_type = self.index_kind.as_str(),
            metric = self.metric.as_str(),
            "created milvus index"
        );
        Ok(IndexOutcome::Created)
    }

    async fn load(&self) -> Result<()> {
        if self.loaded.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.ensure_indexed().await?;

        if self.load_state().await? != LOAD_STATE_LOADED {
            self.call::<Value>("collections/load", self.target()).await?;
            let deadline = tokio::time::Instant::now() + self.timeout;
            while self.load_state().await? != LOAD_STATE_LOADED {
                if tokio::time::Instant::now() >= deadline {
                    return Err(RagError::Timeout {
                        operation: format!("loading collection '{}'", self.collection),
                        timeout: self.timeout,
                    });
                }
                tokio::time::sleep(self.load_poll_interval).await;
            }
            info!(collection = %self.collection, "loaded milvus collection");
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument("top_k must be greater than zero".into()));
        }
        self.check_dimension(embedding.len()).await?;
        self.load().await?;

        let mut params = json!({});
        if let IndexKind::IvfFlat { .. } = self.index_kind {
            params["nprobe"] = json!(self.nprobe);
        }
        let body = json!({
            "dbName": self.database,
            "collectionName": self.collection,
            "data": [embedding],
            "annsField": EMBEDDING_FIELD,
            "limit": top_k,
            "outputFields": [ID_FIELD, TEXT_FIELD],
            "searchParams": { "metricType": self.metric.as_str(), "params": params }
        });
        let hits: Vec<Hit> = self.call("entities/search", body).await?.unwrap_or_default();

        let mut results = hits
            .into_iter()
            .map(|hit| {
                let id = hit.id.as_i64().ok_or_else(|| RagError::VectorStoreError {
                    backend: BACKEND.to_string(),
                    message: "search hit has a non-integer id".into(),
                })?;
                let distance = score_to_distance(self.metric, hit.score);
                Ok(SearchResult { id, text: hit.text, distance })
            })
            .collect::<Result<Vec<_>>>()?;
        results.sort_by(|a, b| rank_order((a.distance, a.id), (b.distance, b.id)));
        results.truncate(top_k);

        debug!(collection = %self.collection, top_k, hits = results.len(), "milvus search completed");
        Ok(results)
    }

    async fn status(&self) -> Result<CollectionStatus> {
        if !self.has_collection().await? {
            return Ok(CollectionStatus::absent());
        }
        let dimension = self.describe_dimension().await?;
        let stats: Option<StatsData> = self.call("collections/get_stats", self.target()).await?;
        let row_count = stats.and_then(|s| s.row_count.as_usize()).unwrap_or(0);
        let indexed = !self.list_indexes().await?.is_empty();
        let loaded = self.load_state().await? == LOAD_STATE_LOADED;
        Ok(CollectionStatus { exists: true, dimension: Some(dimension), row_count, indexed, loaded })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int64_values_parse_from_numbers_and_strings() {
        let hits: Vec<Hit> = serde_json::from_value(json!([
            { "id": 449, "distance": 0.5, "text": "a" },
            { "id": "450", "distance": 0.25 }
        ]))
        .unwrap();
        assert_eq!(hits[0].id.as_i64(), Some(449));
        assert_eq!(hits[1].id.as_i64(), Some(450));
        assert_eq!(hits[1].text, "");
    }

    #[test]
    fn scores_become_ascending_distances() {
        assert_eq!(score_to_distance(MetricType::L2, 4.0), 2.0);
        assert_eq!(score_to_distance(MetricType::Cosine, 1.0001), 0.0);
        assert_eq!(score_to_distance(MetricType::L2, -1e-6), 0.0);
        assert_eq!(score_to_distance(MetricType::Cosine, 1.0), 0.0);
        assert!(score_to_distance(MetricType::Cosine, 0.9) < score_to_distance(MetricType::Cosine, 0.1));
    }

    #[test]
    fn envelope_without_data_parses() {
        let envelope: Envelope<Value> =
            serde_json::from_value(json!({ "code": 0 })).unwrap();
        assert_eq!(envelope.code, 0);
        assert!(envelope.data.is_none());
    }

    #[test]
    fn from_config_trims_and_targets() {
        let config = RetrievalConfig::builder().store_port(29530).build().unwrap();
        let store = MilvusVectorStore::from_config(&config).unwrap();
        assert_eq!(store.base_url, "http://localhost:29530");
        assert_eq!(store.collection_name(), "thai_text_embeddings");
        assert_eq!(store.target()["dbName"], "my_database");
    }
}
