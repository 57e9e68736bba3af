//! Runtime and collection configuration.
//!
//! Everything is read once at startup by [`RagConfig::from_env`]; worker
//! counts and pacing never change afterwards.

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::errors::RagError;

/// Similarity metric of a vector space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Cosine similarity (higher is closer).
    Cosine,
    /// Inner product (higher is closer).
    InnerProduct,
    /// Euclidean distance (lower is closer).
    L2,
}

impl Metric {
    /// Stable short name, also used as the Qdrant named-vector suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::InnerProduct => "ip",
            Metric::L2 => "l2",
        }
    }

    /// Whether a higher score means a closer match.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Metric::L2)
    }
}

impl FromStr for Metric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" | "cos" => Ok(Metric::Cosine),
            "ip" | "dot" | "inner_product" => Ok(Metric::InnerProduct),
            "l2" | "euclid" | "euclidean" => Ok(Metric::L2),
            other => Err(RagError::Config(format!("unknown metric: {other}"))),
        }
    }
}

/// Closed set of search knobs for one search path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchParams {
    pub metric: Metric,
    /// Candidate list size explored by the index (HNSW `ef`).
    pub candidates: u64,
}

impl SearchParams {
    /// Inner product, 50 candidates.
    pub const ADVANCED: SearchParams = SearchParams {
        metric: Metric::InnerProduct,
        candidates: 50,
    };

    /// L2, 10 candidates.
    pub const BASELINE: SearchParams = SearchParams {
        metric: Metric::L2,
        candidates: 10,
    };

    pub fn validate(&self) -> Result<(), RagError> {
        if self.candidates == 0 {
            return Err(RagError::Config("search candidates must be > 0".into()));
        }
        Ok(())
    }
}

/// Which vector store implementation backs the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Qdrant,
    Memory,
}

/// Schema a collection is created with and checked against.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionSchema {
    pub name: String,
    /// Embedding dimensionality, fixed for the collection lifetime.
    pub dim: usize,
    /// One vector space per metric a search may ask for.
    pub metrics: Vec<Metric>,
    /// Payload field holding the stored text.
    pub content_field: String,
}

/// Which JSONL fields feed the embedding and the stored payload.
#[derive(Clone, Debug, PartialEq)]
pub struct CorpusFields {
    pub embed: Vec<String>,
    pub payload: Vec<String>,
}

impl Default for CorpusFields {
    fn default() -> Self {
        Self {
            embed: vec!["question".into()],
            payload: vec!["question".into(), "answer".into()],
        }
    }
}

/// Pacing and pool settings of the batch ingestor.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Max batches in flight.
    pub workers: usize,
    /// At most one batch starts per tick.
    pub pacing: Duration,
    /// Records embedded back to back inside a batch.
    pub sub_batch: usize,
    pub sub_batch_pause: Duration,
    /// Deadline of a single embed call.
    pub attempt_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 6,
            pacing: Duration::from_millis(250),
            sub_batch: 2,
            sub_batch_pause: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Backoff settings shared by ingestion and retrieval.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub base: Duration,
    pub max_retries: u32,
    pub fatal_attempts: u32,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(800),
            max_retries: 5,
            fatal_attempts: 2,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Advanced and baseline search profiles.
#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub advanced: SearchParams,
    pub baseline: SearchParams,
    /// The advanced path asks for `top_k * overfetch` hits.
    pub overfetch: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            advanced: SearchParams::ADVANCED,
            baseline: SearchParams::BASELINE,
            overfetch: 2,
        }
    }
}

/// Configuration for RAG ingestion and retrieval.
#[derive(Clone, Debug)]
pub struct RagConfig {
    pub backend: StoreBackend,
    /// Qdrant gRPC endpoint, e.g. `http://localhost:6334`.
    pub qdrant_url: String,
    /// Optional API key for Qdrant Cloud.
    pub qdrant_api_key: Option<String>,
    pub collection: String,
    pub embedding_dim: usize,
    pub content_field: String,
    pub fields: CorpusFields,
    pub ingest: IngestConfig,
    pub retry: RetryConfig,
    pub retrieval: RetrievalConfig,
}

impl RagConfig {
    /// Creates a sane default config for a given collection name and Qdrant endpoint.
    pub fn new_default(
        url: impl Into<String>,
        collection: impl Into<String>,
        embedding_dim: usize,
    ) -> Self {
        Self {
            backend: StoreBackend::Qdrant,
            qdrant_url: url.into(),
            qdrant_api_key: None,
            collection: collection.into(),
            embedding_dim,
            content_field: "content".into(),
            fields: CorpusFields::default(),
            ingest: IngestConfig::default(),
            retry: RetryConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }

    /// Reads the config from environment variables.
    ///
    /// | var | default |
    /// |-----|---------|
    /// | `RAG_BACKEND` | `qdrant` (`memory` for local runs) |
    /// | `QDRANT_URL` | `http://localhost:6334` |
    /// | `QDRANT_API_KEY` | none |
    /// | `RAG_COLLECTION` | `knowledge_base` |
    /// | `EMBEDDING_DIM` | required |
    /// | `RAG_CONTENT_FIELD` | `content` |
    /// | `RAG_EMBED_FIELDS` / `RAG_PAYLOAD_FIELDS` | `question` / `question,answer` |
    /// | `INGEST_WORKERS`, `INGEST_PACING_MS` | 6, 250 |
    /// | `INGEST_SUB_BATCH`, `INGEST_SUB_BATCH_PAUSE_MS` | 2, 500 |
    /// | `INGEST_ATTEMPT_TIMEOUT_SECS` | 30 |
    /// | `RETRY_BASE_MS`, `RETRY_MAX` | 800, 5 |
    /// | `RAG_ADVANCED_CANDIDATES`, `RAG_ADVANCED_METRIC` | 50, `ip` |
    /// | `RAG_BASELINE_CANDIDATES`, `RAG_BASELINE_METRIC` | 10, `l2` |
    ///
    /// # Errors
    /// Returns [`RagError::Config`] on missing or unparsable values.
    pub fn from_env() -> Result<Self, RagError> {
        let backend = match env_str("RAG_BACKEND").as_deref() {
            None | Some("qdrant") => StoreBackend::Qdrant,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(RagError::Config(format!("unsupported RAG_BACKEND: {other}")));
            }
        };

        let embedding_dim = env_num::<usize>("EMBEDDING_DIM")?
            .ok_or_else(|| RagError::Config("missing EMBEDDING_DIM".into()))?;

        let mut cfg = Self::new_default(
            env_str("QDRANT_URL").unwrap_or_else(|| "http://localhost:6334".into()),
            env_str("RAG_COLLECTION").unwrap_or_else(|| "knowledge_base".into()),
            embedding_dim,
        );
        cfg.backend = backend;
        cfg.qdrant_api_key = env_str("QDRANT_API_KEY");
        if let Some(f) = env_str("RAG_CONTENT_FIELD") {
            cfg.content_field = f;
        }
        if let Some(list) = env_list("RAG_EMBED_FIELDS") {
            cfg.fields.embed = list;
        }
        if let Some(list) = env_list("RAG_PAYLOAD_FIELDS") {
            cfg.fields.payload = list;
        }

        let ing = &mut cfg.ingest;
        ing.workers = env_num("INGEST_WORKERS")?.unwrap_or(ing.workers);
        ing.pacing = env_millis("INGEST_PACING_MS")?.unwrap_or(ing.pacing);
        ing.sub_batch = env_num("INGEST_SUB_BATCH")?.unwrap_or(ing.sub_batch);
        ing.sub_batch_pause =
            env_millis("INGEST_SUB_BATCH_PAUSE_MS")?.unwrap_or(ing.sub_batch_pause);
        if let Some(secs) = env_num::<u64>("INGEST_ATTEMPT_TIMEOUT_SECS")? {
            ing.attempt_timeout = Duration::from_secs(secs);
        }

        let retry = &mut cfg.retry;
        retry.base = env_millis("RETRY_BASE_MS")?.unwrap_or(retry.base);
        retry.max_retries = env_num("RETRY_MAX")?.unwrap_or(retry.max_retries);

        let rv = &mut cfg.retrieval;
        rv.advanced.candidates = env_num("RAG_ADVANCED_CANDIDATES")?.unwrap_or(rv.advanced.candidates);
        if let Some(m) = env_str("RAG_ADVANCED_METRIC") {
            rv.advanced.metric = m.parse()?;
        }
        rv.baseline.candidates = env_num("RAG_BASELINE_CANDIDATES")?.unwrap_or(rv.baseline.candidates);
        if let Some(m) = env_str("RAG_BASELINE_METRIC") {
            rv.baseline.metric = m.parse()?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates config values.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.backend == StoreBackend::Qdrant && self.qdrant_url.trim().is_empty() {
            return Err(RagError::Config("qdrant_url is empty".into()));
        }
        if self.collection.trim().is_empty() {
            return Err(RagError::Config("collection is empty".into()));
        }
        if self.embedding_dim == 0 {
            return Err(RagError::Config("embedding_dim must be > 0".into()));
        }
        if self.content_field.trim().is_empty() {
            return Err(RagError::Config("content_field is empty".into()));
        }
        if self.fields.embed.is_empty() {
            return Err(RagError::Config("at least one embed field is required".into()));
        }
        if self.ingest.workers == 0 || self.ingest.sub_batch == 0 {
            return Err(RagError::Config("workers and sub_batch must be > 0".into()));
        }
        if self.ingest.pacing.is_zero() {
            return Err(RagError::Config("pacing interval must be > 0".into()));
        }
        if self.retry.max_retries == 0 || self.retry.fatal_attempts == 0 {
            return Err(RagError::Config("retry budgets must be > 0".into()));
        }
        if self.retrieval.overfetch == 0 {
            return Err(RagError::Config("overfetch must be > 0".into()));
        }
        self.retrieval.advanced.validate()?;
        self.retrieval.baseline.validate()
    }

    /// Collection schema derived from the config: one vector space for each
    /// distinct metric the search profiles use.
    pub fn schema(&self) -> CollectionSchema {
        let mut metrics = vec![self.retrieval.advanced.metric];
        if self.retrieval.baseline.metric != self.retrieval.advanced.metric {
            metrics.push(self.retrieval.baseline.metric);
        }
        CollectionSchema {
            name: self.collection.clone(),
            dim: self.embedding_dim,
            metrics,
            content_field: self.content_field.clone(),
        }
    }
}

/* ---------------- env helpers ---------------- */

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_num<T: FromStr>(name: &str) -> Result<Option<T>, RagError> {
    match env_str(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| RagError::Config(format!("{name} is not a valid number: {raw}"))),
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>, RagError> {
    Ok(env_num::<u64>(name)?.map(Duration::from_millis))
}

fn env_list(name: &str) -> Option<Vec<String>> {
    let list: Vec<String> = env_str(name)?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!list.is_empty()).then_some(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_aliases_parse() {
        assert_eq!("IP".parse::<Metric>().unwrap(), Metric::InnerProduct);
        assert_eq!("euclid".parse::<Metric>().unwrap(), Metric::L2);
        assert!("hamming".parse::<Metric>().is_err());
    }

    #[test]
    fn schema_carries_one_space_per_distinct_metric() {
        let mut cfg = RagConfig::new_default("http://localhost:6334", "kb", 8);
        assert_eq!(
            cfg.schema().metrics,
            vec![Metric::InnerProduct, Metric::L2]
        );

        cfg.retrieval.baseline.metric = Metric::InnerProduct;
        assert_eq!(cfg.schema().metrics, vec![Metric::InnerProduct]);
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut cfg = RagConfig::new_default("http://localhost:6334", "kb", 8);
        assert!(cfg.validate().is_ok());

        cfg.retrieval.baseline.candidates = 0;
        assert!(matches!(cfg.validate(), Err(RagError::Config(_))));

        let mut cfg = RagConfig::new_default("http://localhost:6334", "kb", 0);
        assert!(cfg.validate().is_err());
        cfg.embedding_dim = 4;
        cfg.ingest.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn memory_backend_does_not_need_url() {
        let mut cfg = RagConfig::new_default("", "kb", 8);
        assert!(cfg.validate().is_err());
        cfg.backend = StoreBackend::Memory;
        assert!(cfg.validate().is_ok());
    }
}
