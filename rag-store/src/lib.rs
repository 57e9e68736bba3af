//! High-level RAG facade: throttled ingestion + retrieval over a vector store.
//!
//! This crate provides a clean API to:
//! - Ingest a JSONL or CSV corpus through a paced, bounded worker pool with retries
//! - Retrieve top‑K context for a textual query (advanced search with a
//!   baseline fallback)
//!
//! The design is flat (no deep nesting) and splits responsibilities into focused modules.

mod config;
mod embed;
mod errors;
mod ingest;
mod io_csv;
mod io_jsonl;
mod memory_store;
mod progress;
mod qdrant_facade;
mod record;
mod retrieve;
mod retry;
mod vector_store;

pub use config::{
    CollectionSchema, CorpusFields, IngestConfig, Metric, RagConfig, RetrievalConfig, RetryConfig,
    SearchParams, StoreBackend,
};
pub use embed::{EmbeddingsProvider, GatewayEmbedder};
pub use errors::RagError;
pub use ingest::{BatchFailure, IngestReport, Ingestor};
pub use io_csv::read_csv_corpus;
pub use io_jsonl::{read_corpus, record_from_value};
pub use memory_store::MemoryVectorStore;
pub use progress::{BarReporter, NoopReporter, ProgressReporter};
pub use qdrant_facade::QdrantFacade;
pub use record::{Batch, ContextBlock, IndexedDocument, Record, RetrievedContext, SearchResult};
pub use retrieve::{RetrievalAssembler, render_context};
pub use retry::{ErrorClass, RetryPolicy};
pub use vector_store::{IndexInfo, VectorStore};

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, trace};

/// Reads a corpus, choosing the reader by extension: `.csv` is CSV,
/// anything else JSONL.
///
/// # Errors
/// Whatever the selected reader returns.
pub fn load_corpus(path: impl AsRef<Path>, fields: &CorpusFields) -> Result<Vec<Record>, RagError> {
    let path = path.as_ref();
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        read_csv_corpus(path, fields)
    } else {
        read_corpus(path, fields)
    }
}

/// High-level facade that wires configuration, embedder and vector store.
///
/// This is the single entry point recommended for application code.
pub struct RagStore {
    cfg: RagConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingsProvider>,
    assembler: RetrievalAssembler,
}

impl RagStore {
    /// Constructs a new store from the given configuration, choosing the
    /// backend from `cfg.backend`.
    ///
    /// # Errors
    /// Returns `RagError::Config` on invalid config or `RagError::Qdrant`
    /// if the client cannot be built.
    pub fn new(cfg: RagConfig, embedder: Arc<dyn EmbeddingsProvider>) -> Result<Self, RagError> {
        cfg.validate()?;
        let store: Arc<dyn VectorStore> = match cfg.backend {
            StoreBackend::Qdrant => Arc::new(QdrantFacade::new(&cfg)?),
            StoreBackend::Memory => Arc::new(MemoryVectorStore::new(
                cfg.collection.clone(),
                cfg.content_field.clone(),
            )),
        };
        info!(backend = ?cfg.backend, collection = %cfg.collection, "RagStore ready");
        Ok(Self::with_store(cfg, embedder, store))
    }

    /// Builds the facade over an already constructed store.
    pub fn with_store(
        cfg: RagConfig,
        embedder: Arc<dyn EmbeddingsProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let assembler = RetrievalAssembler::new(
            Arc::clone(&embedder),
            Arc::clone(&store),
            cfg.retrieval.clone(),
            RetryPolicy::interactive(&cfg.retry),
        );
        Self {
            cfg,
            store,
            embedder,
            assembler,
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Ingestor bound to this store's schema, pacing and retry settings.
    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.store),
            self.cfg.schema(),
            self.cfg.ingest.clone(),
            RetryPolicy::new(&self.cfg.retry),
        )
    }

    /// Reads a JSONL or CSV corpus (see [`load_corpus`]) and ingests it.
    ///
    /// # Errors
    /// I/O on the corpus file, plus everything [`Ingestor::ingest`] returns.
    pub async fn ingest_file(
        &self,
        corpus_path: impl AsRef<Path>,
        batch_size: usize,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<IngestReport, RagError> {
        trace!("RagStore::ingest_file path={:?}", corpus_path.as_ref());
        let records = load_corpus(corpus_path, &self.cfg.fields)?;
        self.ingestor()
            .with_reporter(reporter)
            .ingest(records, batch_size)
            .await
    }

    /// Builds a context block for a textual query.
    ///
    /// # Errors
    /// Embedding errors, or `RagError::SearchFailed` when both profiles fail.
    pub async fn build_context(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievedContext, RagError> {
        debug!("RagStore::build_context top_k={top_k}");
        self.assembler.build_context(query, top_k).await
    }

    /// Vector store reachable.
    pub async fn is_ready(&self) -> bool {
        self.store.is_ready().await
    }
}
