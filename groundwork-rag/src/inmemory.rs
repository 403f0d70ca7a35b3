//! In-memory vector store with an IVF-flat index.
//!
//! This module provides [`InMemoryVectorStore`], a dependency-free vector
//! store backed by nested `HashMap`s behind a `tokio::sync::RwLock`. It
//! follows the same lifecycle as the Milvus backend (database, collection,
//! index, load) and is suitable for development, testing, and small corpora.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::document::{CollectionInfo, CollectionStatus, Document, IndexOutcome, SearchResult};
use crate::error::{RagError, Result};
use crate::index::{IndexKind, IvfIndex, MetricType, rank_order};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "InMemory";

/// Shared state of an in-memory "server": database name → collection name → data.
///
/// Several [`InMemoryVectorStore`] handles created with
/// [`InMemoryVectorStore::with_backend`] observe the same collections, the
/// way several connections observe one Milvus server.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    databases: RwLock<HashMap<String, HashMap<String, CollectionData>>>,
}

impl InMemoryBackend {
    /// Create an empty backend with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the databases that currently exist.
    pub async fn list_databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug)]
struct CollectionData {
    dimension: usize,
    max_text_length: usize,
    rows: Vec<Document>,
    next_id: i64,
    index: Option<BuiltIndex>,
    loaded: bool,
}

#[derive(Debug)]
struct BuiltIndex {
    metric: MetricType,
    ivf: Option<IvfIndex>,
}

/// An in-memory [`VectorStore`] bound to one database and collection.
///
/// # Example
///
/// ```rust,ignore
/// use groundwork_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new("my_database", "docs");
/// store.ensure_database(false).await?;
/// store.create_collection(384).await?;
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryVectorStore {
    backend: Arc<InMemoryBackend>,
    database: String,
    collection: String,
    index_kind: IndexKind,
    metric: MetricType,
    nprobe: usize,
    max_text_length: usize,
}

impl InMemoryVectorStore {
    /// Create a store over a fresh private backend.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new()), database, collection)
    }

    /// Create a store over a shared backend.
    pub fn with_backend(
        backend: Arc<InMemoryBackend>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        let defaults = RetrievalConfig::default();
        Self {
            backend,
            database: database.into(),
            collection: collection.into(),
            index_kind: defaults.index,
            metric: defaults.metric,
            nprobe: defaults.nprobe,
            max_text_length: defaults.max_text_length,
        }
    }

    /// Create a store over `backend` using the target and index settings of `config`.
    pub fn from_config(backend: Arc<InMemoryBackend>, config: &RetrievalConfig) -> Self {
        Self::with_backend(backend, config.database.clone(), config.collection.clone())
            .with_index(config.index)
            .with_metric(config.metric)
            .with_nprobe(config.nprobe)
            .with_max_text_length(config.max_text_length)
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
        self.nprobe = nprobe.max(1);
        self
    }

    /// Set the maximum text length of newly created collections.
    pub fn with_max_text_length(mut self, max: usize) -> Self {
        self.max_text_length = max;
        self
    }

    /// The shared backend this store reads and writes.
    pub fn backend_handle(&self) -> &Arc<InMemoryBackend> {
        &self.backend
    }

    fn collection_missing(&self) -> RagError {
        RagError::CollectionMissing { collection: self.collection.clone() }
    }

    fn schema_mismatch(&self, expected: usize, actual: usize) -> RagError {
        RagError::SchemaMismatch { collection: self.collection.clone(), expected, actual }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn ensure_database(&self, reset: bool) -> Result<()> {
        let mut databases = self.backend.databases.write().await;
        if reset {
            if let Some(dropped) = databases.remove(&self.database) {
                for name in dropped.keys() {
                    info!(database = %self.database, collection = %name, "dropped collection");
                }
                info!(database = %self.database, "dropped database");
            }
        }
        if !databases.contains_key(&self.database) {
            databases.insert(self.database.clone(), HashMap::new());
            info!(database = %self.database, "created database");
        }
        Ok(())
    }

    async fn create_collection(&self, dimension: usize) -> Result<CollectionInfo> {
        if dimension == 0 {
            return Err(RagError::InvalidArgument("dimension must be greater than zero".into()));
        }
        let mut databases = self.backend.databases.write().await;
        let database =
            databases.get_mut(&self.database).ok_or_else(|| RagError::VectorStoreError {
                backend: BACKEND.to_string(),
                message: format!("database '{}' does not exist", self.database),
            })?;

        if let Some(existing) = database.get(&self.collection) {
            if existing.dimension != dimension {
                return Err(self.schema_mismatch(existing.dimension, dimension));
            }
            debug!(collection = %self.collection, "collection already exists, reusing");
            return Ok(CollectionInfo {
                database: self.database.clone(),
                name: self.collection.clone(),
                dimension,
                created: false,
            });
        }

        database.insert(
            self.collection.clone(),
            CollectionData {
                dimension,
                max_text_length: self.max_text_length,
                rows: Vec::new(),
                next_id: 1,
                index: None,
                loaded: false,
            },
        );
        info!(collection = %self.collection, dimension, "created collection");
        Ok(CollectionInfo {
            database: self.database.clone(),
            name: self.collection.clone(),
            dimension,
            created: true,
        })
    }

    async fn drop_collection(&self) -> Result<()> {
        let mut databases = self.backend.databases.write().await;
        if let Some(database) = databases.get_mut(&self.database) {
            if database.remove(&self.collection).is_some() {
                info!(collection = %self.collection, "dropped collection");
            }
        }
        Ok(())
    }

    async fn insert(&self, text: &str, embedding: &[f32]) -> Result<i64> {
        let mut databases = self.backend.databases.write().await;
        let data = databases
            .get_mut(&self.database)
            .and_then(|db| db.get_mut(&self.collection))
            .ok_or_else(|| self.collection_missing())?;

        if embedding.len() != data.dimension {
            return Err(self.schema_mismatch(data.dimension, embedding.len()));
        }
        let chars = text.chars().count();
        if chars > data.max_text_length {
            return Err(RagError::TextTooLong { max: data.max_text_length, actual: chars });
        }

        let id = data.next_id;
        data.next_id += 1;
        let pos = data.rows.len();
        data.rows.push(Document { id, text: text.to_string(), embedding: embedding.to_vec() });
        if let Some(ivf) = data.index.as_mut().and_then(|index| index.ivf.as_mut()) {
            ivf.add(pos, embedding);
        }

        debug!(collection = %self.collection, id, "inserted document");
        Ok(id)
    }

    async fn create_index(&self) -> Result<IndexOutcome> {
        let mut databases = self.backend.databases.write().await;
        let data = databases
            .get_mut(&self.database)
            .and_then(|db| db.get_mut(&self.collection))
            .ok_or_else(|| self.collection_missing())?;

        if data.index.is_some() {
            info!(collection = %self.collection, "index already exists, skipping");
            return Ok(IndexOutcome::AlreadyExists);
        }

        let ivf = match self.index_kind {
            IndexKind::IvfFlat { nlist } => {
                Some(IvfIndex::build(data.rows.iter().map(|d| d.embedding.as_slice()), nlist))
            }
            IndexKind::Flat => None,
        };
        data.index = Some(BuiltIndex { metric: self.metric, ivf });

        info!(
            collection = %self.collection,
            index_type = self.index_kind.as_str(),
            metric = self.metric.as_str(),
            rows = data.rows.len(),
            "created index"
        );
        Ok(IndexOutcome::Created)
    }

    async fn load(&self) -> Result<()> {
        let mut databases = self.backend.databases.write().await;
        let data = databases
            .get_mut(&self.database)
            .and_then(|db| db.get_mut(&self.collection))
            .ok_or_else(|| self.collection_missing())?;

        if data.index.is_none() {
            return Err(RagError::IndexMissing { collection: self.collection.clone() });
        }
        if !data.loaded {
            data.loaded = true;
            info!(collection = %self.collection, "loaded collection");
        }
        Ok(())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument("top_k must be greater than zero".into()));
        }

        let needs_load = {
            let databases = self.backend.databases.read().await;
            let data = databases
                .get(&self.database)
                .and_then(|db| db.get(&self.collection))
                .ok_or_else(|| self.collection_missing())?;
            if embedding.len() != data.dimension {
                return Err(self.schema_mismatch(data.dimension, embedding.len()));
            }
            !data.loaded
        };
        if needs_load {
            self.load().await?;
        }

        let databases = self.backend.databases.read().await;
        let data = databases
            .get(&self.database)
            .and_then(|db| db.get(&self.collection))
            .ok_or_else(|| self.collection_missing())?;
        let index = data
            .index
            .as_ref()
            .ok_or_else(|| RagError::IndexMissing { collection: self.collection.clone() })?;

        let positions: Vec<usize> = match &index.ivf {
            Some(ivf) => ivf.candidates(embedding, self.nprobe, top_k),
            None => (0..data.rows.len()).collect(),
        };

        let mut scored: Vec<(f32, usize)> = positions
            .into_iter()
            .map(|pos| (index.metric.distance(embedding, &data.rows[pos].embedding), pos))
            .collect();
        scored.sort_by(|a, b| {
            rank_order((a.0, data.rows[a.1].id), (b.0, data.rows[b.1].id))
        });
        scored.truncate(top_k);

        let results: Vec<SearchResult> = scored
            .into_iter()
            .map(|(distance, pos)| {
                let row = &data.rows[pos];
                SearchResult { id: row.id, text: row.text.clone(), distance }
            })
            .collect();
        debug!(collection = %self.collection, top_k, hits = results.len(), "search completed");
        Ok(results)
    }

    async fn status(&self) -> Result<CollectionStatus> {
        let databases = self.backend.databases.read().await;
        let Some(data) = databases.get(&self.database).and_then(|db| db.get(&self.collection))
        else {
            return Ok(CollectionStatus::absent());
        };
        Ok(CollectionStatus {
            exists: true,
            dimension: Some(data.dimension),
            row_count: data.rows.len(),
            indexed: data.index.is_some(),
            loaded: data.loaded,
        })
    }
}
