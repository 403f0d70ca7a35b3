//! Embedding provider trait and the embedding models it can select.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// An embedding model with a known output dimension.
///
/// Serialized as its API name; a [`Custom`](EmbeddingModel::Custom) model
/// is written as `name:dimensions`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum EmbeddingModel {
    /// `text-embedding-3-large`, 3072 dimensions.
    #[default]
    TextEmbedding3Large,
    /// `text-embedding-3-small`, 1536 dimensions.
    TextEmbedding3Small,
    /// `text-embedding-ada-002`, 1536 dimensions.
    Ada002,
    /// Any other model served by an OpenAI-compatible endpoint.
    Custom {
        /// Model name sent to the API.
        name: String,
        /// Output dimension of the model.
        dimensions: usize,
    },
}

impl EmbeddingModel {
    /// The model name sent to the embedding API.
    pub fn name(&self) -> &str {
        match self {
            Self::TextEmbedding3Large => "text-embedding-3-large",
            Self::TextEmbedding3Small => "text-embedding-3-small",
            Self::Ada002 => "text-embedding-ada-002",
            Self::Custom { name, .. } => name,
        }
    }

    /// The length of the vectors the model produces.
    pub fn dimensions(&self) -> usize {
        match self {
            Self::TextEmbedding3Large => 3072,
            Self::TextEmbedding3Small | Self::Ada002 => 1536,
            Self::Custom { dimensions, .. } => *dimensions,
        }
    }

    /// Build a custom model from a name and dimension.
    pub fn custom(name: impl Into<String>, dimensions: usize) -> Self {
        Self::Custom { name: name.into(), dimensions }
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<EmbeddingModel> for String {
    fn from(model: EmbeddingModel) -> Self {
        match model {
            EmbeddingModel::Custom { name, dimensions } => format!("{name}:{dimensions}"),
            known => known.name().to_string(),
        }
    }
}

impl TryFrom<String> for EmbeddingModel {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl FromStr for EmbeddingModel {
    type Err = RagError;

    /// Parse a known model name, or `name:dimensions` for any other model.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text-embedding-3-large" | "large" => Ok(Self::TextEmbedding3Large),
            "text-embedding-3-small" | "small" => Ok(Self::TextEmbedding3Small),
            "text-embedding-ada-002" => Ok(Self::Ada002),
            other => {
                let (name, dims) = other.rsplit_once(':').ok_or_else(|| {
                    RagError::ConfigError(format!(
                        "unknown embedding model '{other}'; use 'name:dimensions' for custom models"
                    ))
                })?;
                let dimensions = dims.parse::<usize>().map_err(|_| {
                    RagError::ConfigError(format!("invalid dimension '{dims}' for model '{name}'"))
                })?;
                if name.is_empty() || dimensions == 0 {
                    return Err(RagError::ConfigError(format!(
                        "invalid custom embedding model '{other}'"
                    )));
                }
                Ok(Self::custom(name, dimensions))
            }
        }
    }
}

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap a specific embedding backend behind a unified async
/// interface. Every vector returned has exactly [`dimensions`](EmbeddingProvider::dimensions)
/// elements; a provider that receives anything else from its backend must
/// fail with [`RagError::Embedding`].
///
/// # Example
///
/// ```rust,ignore
/// use groundwork_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single, non-empty text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Return a short provider name for logs and errors.
    fn name(&self) -> &str {
        "embedder"
    }
}

/// Check that an embedding has the length its provider promised.
pub fn check_dimensions(provider: &str, embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.len() != expected {
        return Err(RagError::Embedding {
            provider: provider.to_string(),
            message: format!(
                "malformed response: expected {expected} dimensions, got {}",
                embedding.len()
            ),
            retryable: false,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_report_their_dimensions() {
        assert_eq!(EmbeddingModel::TextEmbedding3Large.dimensions(), 3072);
        assert_eq!(EmbeddingModel::TextEmbedding3Small.dimensions(), 1536);
        assert_eq!(EmbeddingModel::Ada002.dimensions(), 1536);
    }

    #[test]
    fn parses_api_names_and_custom_models() {
        assert_eq!(
            "text-embedding-3-small".parse::<EmbeddingModel>().unwrap(),
            EmbeddingModel::TextEmbedding3Small
        );
        assert_eq!("large".parse::<EmbeddingModel>().unwrap(), EmbeddingModel::TextEmbedding3Large);

        let custom: EmbeddingModel = "nomic-embed-text:768".parse().unwrap();
        assert_eq!(custom.name(), "nomic-embed-text");
        assert_eq!(custom.dimensions(), 768);

        assert!("mystery-model".parse::<EmbeddingModel>().is_err());
        assert_eq!(String::from(custom), "nomic-embed-text:768");
        assert!("mystery-model:0".parse::<EmbeddingModel>().is_err());
    }

    #[test]
    fn check_dimensions_rejects_wrong_length() {
        assert!(check_dimensions("test", &[0.0; 3], 3).is_ok());
        let err = check_dimensions("test", &[0.0; 2], 3).unwrap_err();
        assert!(matches!(err, RagError::Embedding { retryable: false, .. }));
    }
}
