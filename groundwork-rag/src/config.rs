//! Configuration for the retrieval core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingModel;
use crate::error::{RagError, Result};
use crate::index::{IndexKind, MetricType};

/// Configuration parameters for the embedder, vector store, and retrieval service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Embedding model; selects the collection dimension.
    pub embedding_model: EmbeddingModel,
    /// Base URL of the OpenAI-compatible embeddings API.
    pub embedding_base_url: String,
    /// Distance metric for the index and searches.
    pub metric: MetricType,
    /// Index built over the embedding field.
    pub index: IndexKind,
    /// Number of IVF partitions probed per search.
    pub nprobe: usize,
    /// Vector store host.
    pub store_host: String,
    /// Vector store port.
    pub store_port: u16,
    /// Optional vector store token (`user:password` or an API key).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_token: Option<String>,
    /// Database holding the collection.
    pub database: String,
    /// Collection name.
    pub collection: String,
    /// Default number of results returned by a query.
    pub top_k: usize,
    /// Bound applied to every external call, in seconds when serialized.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Maximum characters in a stored text.
    pub max_text_length: usize,
    /// Apply the preprocessor to queries as well as documents.
    pub preprocess_queries: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_model: EmbeddingModel::default(),
            embedding_base_url: "https://api.openai.com/v1".to_string(),
            metric: MetricType::L2,
            index: IndexKind::default(),
            nprobe: 10,
            store_host: "localhost".to_string(),
            store_port: 19530,
            store_token: None,
            database: "my_database".to_string(),
            collection: "thai_text_embeddings".to_string(),
            top_k: 4,
            timeout: Duration::from_secs(30),
            max_text_length: 1000,
            preprocess_queries: false,
        }
    }
}

impl RetrievalConfig {
    /// Create a new builder for constructing a [`RetrievalConfig`].
    pub fn builder() -> RetrievalConfigBuilder {
        RetrievalConfigBuilder::default()
    }

    /// Embedding dimension of the configured model.
    pub fn dimension(&self) -> usize {
        self.embedding_model.dimensions()
    }

    /// Base URL of the vector store's HTTP endpoint.
    pub fn store_url(&self) -> String {
        format!("http://{}:{}", self.store_host, self.store_port)
    }

    /// Build a configuration from `GROUNDWORK_*` environment variables,
    /// falling back to defaults for anything unset.
    ///
    /// Recognized variables: `GROUNDWORK_EMBEDDING_MODEL`,
    /// `GROUNDWORK_EMBEDDING_BASE_URL`, `GROUNDWORK_STORE_HOST`,
    /// `GROUNDWORK_STORE_PORT`, `GROUNDWORK_STORE_TOKEN`, `GROUNDWORK_DATABASE`,
    /// `GROUNDWORK_COLLECTION`, `GROUNDWORK_TOP_K`, `GROUNDWORK_TIMEOUT_SECS`,
    /// `GROUNDWORK_PREPROCESS_QUERIES`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a variable cannot be parsed or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply the `GROUNDWORK_*` variables recognized by
    /// [`from_env`](Self::from_env) on top of this configuration.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn with_env_overrides(self) -> Result<Self> {
        self.overridden_by(|key| std::env::var(key).ok())
    }

    fn overridden_by(self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T> {
            value
                .parse()
                .map_err(|_| RagError::ConfigError(format!("invalid value '{value}' for {key}")))
        }

        let mut builder = RetrievalConfigBuilder::from_config(self);
        if let Some(v) = lookup("GROUNDWORK_EMBEDDING_MODEL") {
            builder = builder.embedding_model(v.parse()?);
        }
        if let Some(v) = lookup("GROUNDWORK_EMBEDDING_BASE_URL") {
            builder = builder.embedding_base_url(v);
        }
        if let Some(v) = lookup("GROUNDWORK_STORE_HOST") {
            builder = builder.store_host(v);
        }
        if let Some(v) = lookup("GROUNDWORK_STORE_PORT") {
            builder = builder.store_port(parse("GROUNDWORK_STORE_PORT", v)?);
        }
        if let Some(v) = lookup("GROUNDWORK_STORE_TOKEN") {
            builder = builder.store_token(v);
        }
        if let Some(v) = lookup("GROUNDWORK_DATABASE") {
            builder = builder.database(v);
        }
        if let Some(v) = lookup("GROUNDWORK_COLLECTION") {
            builder = builder.collection(v);
        }
        if let Some(v) = lookup("GROUNDWORK_TOP_K") {
            builder = builder.top_k(parse("GROUNDWORK_TOP_K", v)?);
        }
        if let Some(v) = lookup("GROUNDWORK_TIMEOUT_SECS") {
            builder = builder.timeout(Duration::from_secs(parse("GROUNDWORK_TIMEOUT_SECS", v)?));
        }
        if let Some(v) = lookup("GROUNDWORK_PREPROCESS_QUERIES") {
            builder = builder.preprocess_queries(parse("GROUNDWORK_PREPROCESS_QUERIES", v)?);
        }
        builder.build()
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `top_k`, `nprobe`, `max_text_length`, or the IVF `nlist` is zero
    /// - the timeout is zero
    /// - the database or collection name is empty
    /// - the embedding model has zero dimensions
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if self.nprobe == 0 {
            return Err(RagError::ConfigError("nprobe must be greater than zero".to_string()));
        }
        if let IndexKind::IvfFlat { nlist: 0 } = self.index {
            return Err(RagError::ConfigError("nlist must be greater than zero".to_string()));
        }
        if self.max_text_length == 0 {
            return Err(RagError::ConfigError(
                "max_text_length must be greater than zero".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(RagError::ConfigError("timeout must be greater than zero".to_string()));
        }
        if self.database.trim().is_empty() || self.collection.trim().is_empty() {
            return Err(RagError::ConfigError(
                "database and collection names must not be empty".to_string(),
            ));
        }
        if self.embedding_model.dimensions() == 0 {
            return Err(RagError::ConfigError(
                "embedding model dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RetrievalConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfigBuilder {
    config: RetrievalConfig,
}

impl RetrievalConfigBuilder {
    /// Start from an existing configuration.
    pub fn from_config(config: RetrievalConfig) -> Self {
        Self { config }
    }

    /// Set the embedding model.
    pub fn embedding_model(mut self, model: EmbeddingModel) -> Self {
        self.config.embedding_model = model;
        self
    }

    /// Set the embeddings API base URL.
    pub fn embedding_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.embedding_base_url = url.into();
        self
    }

    /// Set the distance metric.
    pub fn metric(mut self, metric: MetricType) -> Self {
        self.config.metric = metric;
        self
    }

    /// Set the index kind.
    pub fn index(mut self, index: IndexKind) -> Self {
        self.config.index = index;
        self
    }

    /// Set the number of IVF partitions probed per search.
    pub fn nprobe(mut self, nprobe: usize) -> Self {
        self.config.nprobe = nprobe;
        self
    }

    /// Set the vector store host.
    pub fn store_host(mut self, host: impl Into<String>) -> Self {
        self.config.store_host = host.into();
        self
    }

    /// Set the vector store port.
    pub fn store_port(mut self, port: u16) -> Self {
        self.config.store_port = port;
        self
    }

    /// Set the vector store token.
    pub fn store_token(mut self, token: impl Into<String>) -> Self {
        self.config.store_token = Some(token.into());
        self
    }

    /// Set the database name.
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.config.database = name.into();
        self
    }

    /// Set the collection name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    /// Set the default number of results.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the maximum stored text length in characters.
    pub fn max_text_length(mut self, max: usize) -> Self {
        self.config.max_text_length = max;
        self
    }

    /// Apply the preprocessor to queries too.
    pub fn preprocess_queries(mut self, enabled: bool) -> Self {
        self.config.preprocess_queries = enabled;
        self
    }

    /// Build the [`RetrievalConfig`], validating it first.
    ///
    /// # Errors
    ///
    /// See [`RetrievalConfig::validate`].
    pub fn build(self) -> Result<RetrievalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_baseline_deployment() {
        let config = RetrievalConfig::default();
        assert_eq!(config.dimension(), 3072);
        assert_eq!(config.store_url(), "http://localhost:19530");
        assert_eq!(config.collection, "thai_text_embeddings");
        assert_eq!(config.index, IndexKind::IvfFlat { nlist: 128 });
        assert_eq!(config.metric, MetricType::L2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_rejects_zero_parameters() {
        assert!(RetrievalConfig::builder().top_k(0).build().is_err());
        assert!(RetrievalConfig::builder().nprobe(0).build().is_err());
        assert!(RetrievalConfig::builder().index(IndexKind::IvfFlat { nlist: 0 }).build().is_err());
        assert!(RetrievalConfig::builder().timeout(Duration::ZERO).build().is_err());
        assert!(RetrievalConfig::builder().collection(" ").build().is_err());
        assert!(RetrievalConfig::builder().index(IndexKind::Flat).build().is_ok());
    }

    #[test]
    fn reads_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("GROUNDWORK_EMBEDDING_MODEL", "text-embedding-3-small"),
            ("GROUNDWORK_STORE_PORT", "29530"),
            ("GROUNDWORK_TOP_K", "2"),
            ("GROUNDWORK_TIMEOUT_SECS", "5"),
            ("GROUNDWORK_PREPROCESS_QUERIES", "true"),
        ]
        .into_iter()
        .collect();
        let config = RetrievalConfig::default()
            .overridden_by(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.dimension(), 1536);
        assert_eq!(config.store_port, 29530);
        assert_eq!(config.top_k, 2);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.preprocess_queries);
    }

    #[test]
    fn overrides_keep_unset_fields() {
        let base = RetrievalConfig::builder().collection("faq").top_k(7).build().unwrap();
        let config = base
            .overridden_by(|k| (k == "GROUNDWORK_TOP_K").then(|| "3".to_string()))
            .unwrap();
        assert_eq!(config.collection, "faq");
        assert_eq!(config.top_k, 3);
    }

    #[test]
    fn unparsable_env_value_is_a_config_error() {
        let err = RetrievalConfig::default()
            .overridden_by(|k| (k == "GROUNDWORK_STORE_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let config: RetrievalConfig = serde_json::from_str(
            r#"{"embedding_model": "nomic-embed-text:768", "timeout": 2.5, "index": {"index_type": "FLAT"}}"#,
        )
        .unwrap();
        assert_eq!(config.dimension(), 768);
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.index, IndexKind::Flat);
        assert_eq!(config.top_k, 4);
    }
}
