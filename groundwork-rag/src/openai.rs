//! OpenAI embedding provider using the OpenAI embeddings API.
//!
//! This module is only available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingModel, EmbeddingProvider, check_dimensions};
use crate::error::{RagError, Result};

/// The default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "OpenAI";

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// Uses `reqwest` to call the `/embeddings` endpoint of the configured base
/// URL, so any OpenAI-compatible server works.
///
/// # Configuration
///
/// - `model` – defaults to `text-embedding-3-large` (3072 dimensions).
/// - `dimensions` – optional Matryoshka dimension override.
/// - `api_key` – from the constructor or the `OPENAI_API_KEY` environment variable.
/// - `timeout` – bound on each request, defaults to 30 seconds.
///
/// # Example
///
/// ```rust,ignore
/// use groundwork_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: EmbeddingModel,
    dimensions: usize,
    timeout: Duration,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a new provider with the given API key.
    ///
    /// Uses the default model (`text-embedding-3-large`) and dimensions (3072).
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::Embedding {
                provider: PROVIDER.into(),
                message: "API key must not be empty".into(),
                retryable: false,
            });
        }

        let model = EmbeddingModel::default();
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: OPENAI_BASE_URL.into(),
            dimensions: model.dimensions(),
            model,
            timeout: Duration::from_secs(30),
            request_dimensions: None,
        })
    }

    /// Create a new provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| RagError::Embedding {
            provider: PROVIDER.into(),
            message: "OPENAI_API_KEY environment variable not set".into(),
            retryable: false,
        })?;
        Self::new(api_key)
    }

    /// Create a provider with the model, base URL, and timeout of `config`.
    pub fn from_config(api_key: impl Into<String>, config: &RetrievalConfig) -> Result<Self> {
        Ok(Self::new(api_key)?
            .with_model(config.embedding_model.clone())
            .with_base_url(config.embedding_base_url.clone())
            .with_timeout(config.timeout))
    }

    /// Set the embedding model. Resets the dimension to the model's default.
    pub fn with_model(mut self, model: EmbeddingModel) -> Self {
        self.dimensions = model.dimensions();
        self.request_dimensions = None;
        self.model = model;
        self
    }

    /// Set the output dimensions (Matryoshka support).
    ///
    /// When set, the API returns embeddings truncated to this size.
    /// This also updates the value returned by [`dimensions()`](EmbeddingProvider::dimensions).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Set the API base URL (without the trailing `/embeddings`).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the bound applied to each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured embedding model.
    pub fn model(&self) -> &EmbeddingModel {
        &self.model
    }

    fn request_error(&self, e: reqwest::Error) -> RagError {
        if e.is_timeout() {
            error!(provider = PROVIDER, timeout = ?self.timeout, "request timed out");
            return RagError::Timeout { operation: "embedding request".into(), timeout: self.timeout };
        }
        error!(provider = PROVIDER, error = %e, "request failed");
        RagError::Embedding {
            provider: PROVIDER.into(),
            message: format!("request failed: {e}"),
            retryable: true,
        }
    }
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::Embedding {
            provider: PROVIDER.into(),
            message: "API returned empty response".into(),
            retryable: false,
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(RagError::Embedding {
                provider: PROVIDER.into(),
                message: "input text must not be empty".into(),
                retryable: false,
            });
        }

        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request_body = EmbeddingRequest {
            model: self.model.name(),
            input: texts.to_vec(),
            dimensions: self.request_dimensions,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(provider = PROVIDER, %status, "API error");
            return Err(RagError::Embedding {
                provider: PROVIDER.into(),
                message: format!("API returned {status}: {detail}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                return self.request_error(e);
            }
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            RagError::Embedding {
                provider: PROVIDER.into(),
                message: format!("failed to parse response: {e}"),
                retryable: false,
            }
        })?;

        if embedding_response.data.len() != texts.len() {
            return Err(RagError::Embedding {
                provider: PROVIDER.into(),
                message: format!(
                    "malformed response: expected {} embeddings, got {}",
                    texts.len(),
                    embedding_response.data.len()
                ),
                retryable: false,
            });
        }

        let mut data = embedding_response.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        for embedding in &embeddings {
            check_dimensions(PROVIDER, embedding, self.dimensions)?;
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
