//! Error types for the `groundwork-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in retrieval operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding service failed or returned malformed data.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
        /// Whether repeating the same request may succeed.
        retryable: bool,
    },

    /// The vector store could not be reached.
    #[error("Vector store unavailable ({backend}): {message}")]
    StoreUnavailable {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector store answered but rejected the request.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An external call did not complete within the configured timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that was abandoned.
        operation: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// An embedding's length does not match the collection schema.
    #[error(
        "Schema mismatch on collection '{collection}': expected dimension {expected}, got {actual}"
    )]
    SchemaMismatch {
        /// The collection whose schema was violated.
        collection: String,
        /// The dimension fixed by the collection schema.
        expected: usize,
        /// The dimension that was supplied.
        actual: usize,
    },

    /// A document's text exceeds the collection's bounded text field.
    #[error("Text too long: {actual} characters exceeds the limit of {max}")]
    TextTooLong {
        /// The maximum number of characters the schema accepts.
        max: usize,
        /// The number of characters supplied.
        actual: usize,
    },

    /// The target collection does not exist.
    #[error("Collection '{collection}' does not exist")]
    CollectionMissing {
        /// The missing collection.
        collection: String,
    },

    /// The collection has no similarity index, so it cannot be searched.
    #[error("Collection '{collection}' has no index; call create_index before searching")]
    IndexMissing {
        /// The un-indexed collection.
        collection: String,
    },

    /// Seed corpus ingestion stopped partway through.
    #[error("Ingestion stopped after {inserted} of {total} documents: {source}")]
    PartialIngestion {
        /// Documents stored before the failure.
        inserted: usize,
        /// Documents in the corpus.
        total: usize,
        /// The failure that stopped ingestion.
        #[source]
        source: Box<RagError>,
    },

    /// A caller supplied an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RagError {
    /// Returns `true` when repeating the failed call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Embedding { retryable, .. } => *retryable,
            Self::StoreUnavailable { .. } | Self::Timeout { .. } => true,
            Self::PartialIngestion { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` for failures a live query may absorb into an
    /// "unavailable" outcome instead of surfacing an error.
    ///
    /// Schema mismatches, invalid arguments, and configuration errors are
    /// misconfigurations and never recoverable.
    pub fn is_recoverable_at_query(&self) -> bool {
        matches!(
            self,
            Self::Embedding { .. }
                | Self::StoreUnavailable { .. }
                | Self::VectorStoreError { .. }
                | Self::Timeout { .. }
                | Self::CollectionMissing { .. }
                | Self::IndexMissing { .. }
        )
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
