//! Data types for stored documents, search results, and collection state.

use serde::{Deserialize, Serialize};

/// A stored text with its vector embedding.
///
/// The `id` is assigned by the [`VectorStore`](crate::VectorStore) on insert;
/// callers never choose it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Store-assigned identifier, increasing in insertion order.
    pub id: i64,
    /// The stored (preprocessed) text.
    pub text: String,
    /// The vector embedding, with the collection's dimension.
    pub embedding: Vec<f32>,
}

/// A retrieved document paired with its distance to the query.
///
/// Serialized with the `ID` / `Text` / `Distance` keys consumed by the chat layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Identifier of the matched document.
    #[serde(rename = "ID")]
    pub id: i64,
    /// The stored text of the matched document.
    #[serde(rename = "Text")]
    pub text: String,
    /// Distance under the collection's metric (lower is more similar).
    #[serde(rename = "Distance")]
    pub distance: f32,
}

/// Description of a collection returned by
/// [`VectorStore::create_collection`](crate::VectorStore::create_collection).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Database holding the collection.
    pub database: String,
    /// Collection name.
    pub name: String,
    /// Embedding dimension fixed at creation.
    pub dimension: usize,
    /// `true` if this call created the collection, `false` if it was reused.
    pub created: bool,
}

/// Result of [`VectorStore::create_index`](crate::VectorStore::create_index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOutcome {
    /// A new index was built.
    Created,
    /// The collection was already indexed; nothing changed.
    AlreadyExists,
}

/// Lifecycle state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionState {
    /// No collection with the configured name exists.
    Absent,
    /// The collection exists but has no index.
    Created,
    /// The collection is indexed but not loaded for search.
    Indexed,
    /// The collection is indexed and loaded; searches are served.
    Loaded,
}

/// Snapshot of a collection's schema and lifecycle flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStatus {
    /// Whether the collection exists.
    pub exists: bool,
    /// Embedding dimension, when the collection exists.
    pub dimension: Option<usize>,
    /// Number of stored documents.
    pub row_count: usize,
    /// Whether a similarity index has been built.
    pub indexed: bool,
    /// Whether the collection has been loaded for search.
    pub loaded: bool,
}

impl CollectionStatus {
    /// Status of a collection that does not exist.
    pub fn absent() -> Self {
        Self { exists: false, dimension: None, row_count: 0, indexed: false, loaded: false }
    }

    /// The lifecycle state derived from the flags.
    ///
    /// A loaded collection without an index reports [`CollectionState::Created`]
    /// because it still cannot serve searches.
    pub fn state(&self) -> CollectionState {
        match (self.exists, self.indexed, self.loaded) {
            (false, _, _) => CollectionState::Absent,
            (true, false, _) => CollectionState::Created,
            (true, true, false) => CollectionState::Indexed,
            (true, true, true) => CollectionState::Loaded,
        }
    }

    /// Whether searches can be served right now.
    pub fn is_searchable(&self) -> bool {
        self.state() == CollectionState::Loaded
    }
}
