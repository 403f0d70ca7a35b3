//! Vector store trait for the collection lifecycle and similarity search.

use async_trait::async_trait;

use crate::document::{CollectionInfo, CollectionStatus, IndexOutcome, SearchResult};
use crate::error::Result;

/// A storage backend bound to one database and one named collection.
///
/// A store owns the collection's schema, index, and load state, and assigns
/// document ids on insert. Construct one per connection target and share it
/// as `Arc<dyn VectorStore>`.
///
/// Stores never retry internally: transport failures surface as
/// [`RagError::StoreUnavailable`](crate::RagError::StoreUnavailable) or
/// [`RagError::Timeout`](crate::RagError::Timeout).
///
/// Concurrent searches are safe. A search racing an insert, index build, or
/// reset may observe stale or empty results. Writers (insert, index build,
/// reset) must be serialized by the caller.
///
/// # Example
///
/// ```rust,ignore
/// use groundwork_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new("my_database", "docs");
/// store.ensure_database(false).await?;
/// store.create_collection(384).await?;
/// let id = store.insert("hello", &embedding).await?;
/// store.create_index().await?;
/// let results = store.search(&query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name for logs and errors.
    fn backend(&self) -> &str;

    /// Name of the collection this store is bound to.
    fn collection_name(&self) -> &str;

    /// Ensure the database exists.
    ///
    /// With `reset == false` this creates the database when absent and is a
    /// no-op otherwise. With `reset == true` every collection in the database
    /// is dropped, the database itself is dropped, and an empty one is created.
    async fn ensure_database(&self, reset: bool) -> Result<()>;

    /// Create the collection with the given embedding dimension.
    ///
    /// Idempotent: an existing collection is returned unchanged with
    /// `created == false`, after checking its dimension. A different
    /// dimension fails with [`RagError::SchemaMismatch`](crate::RagError::SchemaMismatch).
    async fn create_collection(&self, dimension: usize) -> Result<CollectionInfo>;

    /// Drop the collection and its index. No-op if it does not exist.
    async fn drop_collection(&self) -> Result<()>;

    /// Append one document and return its store-assigned id.
    ///
    /// The write is durable and visible to searches when this returns.
    async fn insert(&self, text: &str, embedding: &[f32]) -> Result<i64>;

    /// Build the configured similarity index over the embedding field.
    ///
    /// Returns [`IndexOutcome::AlreadyExists`] without rebuilding when the
    /// collection is already indexed. Must not run concurrently with itself.
    async fn create_index(&self) -> Result<IndexOutcome>;

    /// Load the collection into a searchable state. Idempotent.
    async fn load(&self) -> Result<()>;

    /// Return up to `top_k` documents nearest to `embedding`.
    ///
    /// Results are ordered by ascending distance, ties broken by smaller id.
    /// The collection is loaded on first use. Searching an un-indexed
    /// collection fails with [`RagError::IndexMissing`](crate::RagError::IndexMissing).
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;

    /// Report the collection's schema and lifecycle flags.
    async fn status(&self) -> Result<CollectionStatus>;
}
