//! # groundwork-rag
//!
//! Vector retrieval core for retrieval-augmented chat backends.
//!
//! The crate stores short reference texts as embeddings and returns the
//! stored texts nearest to a query, to be used as grounding context for a
//! language-model reply.
//!
//! ## Components
//!
//! - [`EmbeddingProvider`]: text → fixed-length vector
//! - [`TextPreprocessor`]: pure normalization applied before embedding
//! - [`VectorStore`]: collection lifecycle, indexing, insert, and ranked search
//! - [`RetrievalService`]: orchestrates the three for ingestion and queries
//!
//! ## Backends
//!
//! | Feature | Type |
//! |---|---|
//! | *(always)* | [`InMemoryVectorStore`] |
//! | `milvus` | [`milvus::MilvusVectorStore`] |
//! | `openai` | [`openai::OpenAIEmbeddingProvider`] |
//!
//! ## Collection lifecycle
//!
//! ```text
//! Absent ──create_collection──▶ Created ──create_index──▶ Indexed ──load──▶ Loaded
//!    ▲                                                                        │
//!    └──────────────────────── ensure_database(reset = true) ◀────────────────┘
//! ```
//!
//! Searching requires an index; the store loads the collection on first search.

pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod inmemory;
pub mod preprocess;
pub mod service;
pub mod vectorstore;

#[cfg(feature = "milvus")]
pub mod milvus;
#[cfg(feature = "openai")]
pub mod openai;

pub use config::{RetrievalConfig, RetrievalConfigBuilder};
pub use document::{
    CollectionInfo, CollectionState, CollectionStatus, Document, IndexOutcome, SearchResult,
};
pub use embedding::{EmbeddingModel, EmbeddingProvider, check_dimensions};
pub use error::{RagError, Result};
pub use index::{IndexKind, MetricType};
pub use inmemory::{InMemoryBackend, InMemoryVectorStore};
pub use preprocess::{PassThrough, TextPreprocessor, ThaiTextNormalizer};
pub use service::{
    IngestReport, InitOutcome, QueryOutcome, RetrievalService, RetrievalServiceBuilder,
};
pub use vectorstore::VectorStore;
