//! Retrieval service orchestrator.
//!
//! The [`RetrievalService`] coordinates ingestion (preprocess → embed →
//! insert) and querying (embed → search) by composing a [`TextPreprocessor`],
//! an [`EmbeddingProvider`], and a [`VectorStore`].
//!
//! Every call into the embedder or the store is bounded by the configured
//! timeout; those awaits are the only suspension points of a request.
//!
//! # Example
//!
//! ```rust,ignore
//! use groundwork_rag::{InMemoryVectorStore, RetrievalConfig, RetrievalService};
//!
//! let service = RetrievalService::builder()
//!     .config(RetrievalConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new("my_database", "docs")))
//!     .seed_corpus(["สวัสดี", "ขอบคุณ"])
//!     .build()?;
//!
//! service.reset().await?;
//! let outcome = service.answer_query("สวัสดี", Some(1)).await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::RetrievalConfig;
use crate::document::{CollectionInfo, CollectionStatus, IndexOutcome, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::preprocess::{TextPreprocessor, ThaiTextNormalizer};
use crate::vectorstore::VectorStore;

/// Summary of a completed seed corpus ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    /// Ids assigned to the inserted documents, in input order.
    pub ids: Vec<i64>,
    /// Whether the index was built or already present.
    pub index: IndexOutcome,
}

impl IngestReport {
    /// Number of documents inserted.
    pub fn inserted(&self) -> usize {
        self.ids.len()
    }
}

/// What [`RetrievalService::initialize`] did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InitOutcome {
    /// An existing collection was reused.
    Reused(CollectionInfo),
    /// A new collection was created and seeded.
    Seeded(IngestReport),
}

/// Result of a live query.
///
/// Distinguishes "nothing relevant is stored" from "retrieval is down" so the
/// chat layer can answer each differently.
#[derive(Debug)]
pub enum QueryOutcome {
    /// Ranked hits, nearest first.
    Context(Vec<SearchResult>),
    /// The search succeeded but returned no documents.
    NoContext,
    /// Embedding or search failed; the error is kept for logging.
    Unavailable(RagError),
}

impl QueryOutcome {
    /// The ranked hits, empty unless this is [`QueryOutcome::Context`].
    pub fn hits(&self) -> &[SearchResult] {
        match self {
            Self::Context(hits) => hits,
            _ => &[],
        }
    }

    /// Hit texts joined by newlines, for use as model grounding context.
    pub fn context(&self) -> Option<String> {
        match self {
            Self::Context(hits) => {
                Some(hits.iter().map(|h| h.text.as_str()).collect::<Vec<_>>().join("\n"))
            }
            _ => None,
        }
    }

    /// Whether retrieval failed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// The retrieval orchestrator.
///
/// Construct one via [`RetrievalService::builder()`] and share it behind an
/// `Arc`. The service holds no global state: the store handle is explicit.
pub struct RetrievalService {
    config: RetrievalConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    preprocessor: Arc<dyn TextPreprocessor>,
    seed_corpus: Vec<String>,
}

impl RetrievalService {
    /// Create a new [`RetrievalServiceBuilder`].
    pub fn builder() -> RetrievalServiceBuilder {
        RetrievalServiceBuilder::default()
    }

    /// Return a reference to the service configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// The corpus ingested by [`initialize`](Self::initialize) and [`reset`](Self::reset).
    pub fn seed_corpus(&self) -> &[String] {
        &self.seed_corpus
    }

    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.config.timeout, "call timed out");
                Err(RagError::Timeout { operation: operation.to_string(), timeout: self.config.timeout })
            }
        }
    }

    /// Bring the store up at process start.
    ///
    /// Ensures the database exists, then reuses the collection when present
    /// (checking its dimension and making sure it is indexed) or creates it
    /// and ingests the seed corpus.
    ///
    /// # Errors
    ///
    /// Every failure is fatal here: an unusable store must not silently serve
    /// empty answers.
    pub async fn initialize(&self) -> Result<InitOutcome> {
        self.bounded("ensure_database", self.vector_store.ensure_database(false)).await?;

        let status = self.bounded("status", self.vector_store.status()).await?;
        let dimension = self.config.dimension();
        if status.exists {
            let info =
                self.bounded("create_collection", self.vector_store.create_collection(dimension)).await?;
            self.bounded("create_index", self.vector_store.create_index()).await?;
            info!(collection = %info.name, rows = status.row_count, "reusing existing collection");
            return Ok(InitOutcome::Reused(info));
        }

        info!(collection = self.vector_store.collection_name(), "collection absent, seeding");
        self.bounded("create_collection", self.vector_store.create_collection(dimension)).await?;
        let report = self.ingest_seed_corpus(&self.seed_corpus).await?;
        Ok(InitOutcome::Seeded(report))
    }

    /// Destroy the database and collection, recreate them empty, and
    /// re-ingest the seed corpus.
    ///
    /// # Errors
    ///
    /// Propagates store failures and [`RagError::PartialIngestion`].
    pub async fn reset(&self) -> Result<IngestReport> {
        info!(collection = self.vector_store.collection_name(), "resetting store");
        self.bounded("ensure_database", self.vector_store.ensure_database(true)).await?;
        self.bounded(
            "create_collection",
            self.vector_store.create_collection(self.config.dimension()),
        )
        .await?;
        let report = self.ingest_seed_corpus(&self.seed_corpus).await?;
        info!(inserted = report.inserted(), "store reset complete");
        Ok(report)
    }

    /// Preprocess, embed, and insert a single text. Returns the assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if the text is empty after
    /// preprocessing, and propagates embedder and store failures.
    pub async fn ingest(&self, text: &str) -> Result<i64> {
        let processed = self.preprocessor.preprocess(text);
        if processed.is_empty() {
            return Err(RagError::InvalidArgument("text is empty after preprocessing".into()));
        }

        let embedding = self.embed(&processed).await?;
        let id = self.bounded("insert", self.vector_store.insert(&processed, &embedding)).await?;
        debug!(id, text_len = processed.len(), "ingested text");
        Ok(id)
    }

    /// Ingest `texts` in order, then build the index once.
    ///
    /// Not atomic: when item *k* fails, items before it stay stored and the
    /// index is not built.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PartialIngestion`] carrying the number of stored
    /// documents and the failure, or the index build failure.
    pub async fn ingest_seed_corpus<S: AsRef<str>>(&self, texts: &[S]) -> Result<IngestReport> {
        let total = texts.len();
        let mut ids = Vec::with_capacity(total);
        for text in texts {
            match self.ingest(text.as_ref()).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    error!(inserted = ids.len(), total, error = %e, "seed ingestion stopped");
                    return Err(RagError::PartialIngestion {
                        inserted: ids.len(),
                        total,
                        source: Box::new(e),
                    });
                }
            }
        }

        let index = self.bounded("create_index", self.vector_store.create_index()).await?;
        info!(inserted = ids.len(), ?index, "seed corpus ingested");
        Ok(IngestReport { ids, index })
    }

    /// Embed a text with the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Embedding`] or [`RagError::Timeout`].
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.bounded("embed", self.embedding_provider.embed(text)).await
    }

    /// Search for the `top_k` stored texts nearest to `query`.
    ///
    /// The query is preprocessed only when `preprocess_queries` is enabled.
    ///
    /// # Errors
    ///
    /// Returns every failure unchanged; see [`answer_query`](Self::answer_query)
    /// for the variant that absorbs recoverable ones.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument("top_k must be greater than zero".into()));
        }
        let query = if self.config.preprocess_queries {
            self.preprocessor.preprocess(query)
        } else {
            query.to_string()
        };
        if query.trim().is_empty() {
            return Err(RagError::InvalidArgument("query must not be empty".into()));
        }

        let embedding = self.embed(&query).await?;
        self.bounded("search", self.vector_store.search(&embedding, top_k)).await
    }

    /// Answer a live query, defaulting `top_k` to the configured value.
    ///
    /// Embedding and store failures are absorbed into
    /// [`QueryOutcome::Unavailable`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SchemaMismatch`] and [`RagError::InvalidArgument`],
    /// which indicate misconfiguration rather than an outage.
    pub async fn answer_query(&self, query: &str, top_k: Option<usize>) -> Result<QueryOutcome> {
        let top_k = top_k.unwrap_or(self.config.top_k);
        match self.search(query, top_k).await {
            Ok(hits) if hits.is_empty() => {
                info!(top_k, "query found no context");
                Ok(QueryOutcome::NoContext)
            }
            Ok(hits) => {
                info!(top_k, result_count = hits.len(), "query completed");
                Ok(QueryOutcome::Context(hits))
            }
            Err(e) if e.is_recoverable_at_query() => {
                warn!(error = %e, retryable = e.is_retryable(), "retrieval unavailable");
                Ok(QueryOutcome::Unavailable(e))
            }
            Err(e) => {
                error!(error = %e, "query failed");
                Err(e)
            }
        }
    }

    /// Report the collection's schema and lifecycle flags.
    pub async fn status(&self) -> Result<CollectionStatus> {
        self.bounded("status", self.vector_store.status()).await
    }
}

/// Builder for constructing a [`RetrievalService`].
///
/// `config`, `embedding_provider`, and `vector_store` are required. The
/// preprocessor defaults to [`ThaiTextNormalizer`] and the seed corpus to empty.
#[derive(Default)]
pub struct RetrievalServiceBuilder {
    config: Option<RetrievalConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    preprocessor: Option<Arc<dyn TextPreprocessor>>,
    seed_corpus: Vec<String>,
}

impl RetrievalServiceBuilder {
    /// Set the service configuration.
    pub fn config(mut self, config: RetrievalConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the text preprocessor.
    pub fn preprocessor(mut self, preprocessor: Arc<dyn TextPreprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Set the seed corpus used by `initialize` and `reset`.
    pub fn seed_corpus<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seed_corpus = texts.into_iter().map(Into::into).collect();
        self
    }

    /// Build the [`RetrievalService`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required field is missing, the
    /// configuration is invalid, or the embedder's dimension differs from the
    /// configured model's.
    pub fn build(self) -> Result<RetrievalService> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;

        if embedding_provider.dimensions() != config.dimension() {
            return Err(RagError::ConfigError(format!(
                "embedding provider produces {} dimensions but model '{}' is configured for {}",
                embedding_provider.dimensions(),
                config.embedding_model,
                config.dimension()
            )));
        }

        Ok(RetrievalService {
            config,
            embedding_provider,
            vector_store,
            preprocessor: self.preprocessor.unwrap_or_else(|| Arc::new(ThaiTextNormalizer)),
            seed_corpus: self.seed_corpus,
        })
    }
}
