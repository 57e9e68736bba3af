//! Retrieval assembler: query text → ranked documents → context block.
//!
//! The advanced profile runs first and over-fetches; any error there falls
//! back once to the baseline profile. Only a double failure is an error.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::RetrievalConfig;
use crate::embed::EmbeddingsProvider;
use crate::errors::RagError;
use crate::record::{ContextBlock, RetrievedContext, SearchResult};
use crate::retry::RetryPolicy;
use crate::vector_store::VectorStore;

pub struct RetrievalAssembler {
    embedder: Arc<dyn EmbeddingsProvider>,
    store: Arc<dyn VectorStore>,
    cfg: RetrievalConfig,
    policy: RetryPolicy,
}

impl RetrievalAssembler {
    /// `policy` should be an interactive budget (see [`RetryPolicy::interactive`]).
    pub fn new(
        embedder: Arc<dyn EmbeddingsProvider>,
        store: Arc<dyn VectorStore>,
        cfg: RetrievalConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            store,
            cfg,
            policy,
        }
    }

    /// Embeds `query` once and returns at most `top_k` documents.
    ///
    /// # Errors
    /// - embedding failure after the interactive retry budget
    /// - [`RagError::SearchFailed`] when both search profiles fail
    pub async fn build_context(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievedContext, RagError> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(RetrievedContext {
                block: ContextBlock::NoMatches,
                documents: Vec::new(),
            });
        }

        let vector = self
            .policy
            .run("query embedding", |_| self.embedder.embed(query))
            .await
            .map_err(|(e, _)| e)?;

        let advanced_k = top_k.saturating_mul(self.cfg.overfetch);
        let mut documents = match self.store.search(&vector, advanced_k, &self.cfg.advanced).await {
            Ok(hits) => {
                trace!(hits = hits.len(), "advanced search ok");
                hits
            }
            Err(advanced) => {
                warn!(error = %advanced, "advanced search failed, falling back to baseline");
                match self.store.search(&vector, top_k, &self.cfg.baseline).await {
                    Ok(hits) => hits,
                    Err(baseline) => {
                        return Err(RagError::SearchFailed {
                            advanced: Box::new(advanced),
                            baseline: Box::new(baseline),
                        });
                    }
                }
            }
        };

        documents.truncate(top_k);
        debug!(top_k, returned = documents.len(), "context assembled");
        Ok(RetrievedContext {
            block: render_context(&documents),
            documents,
        })
    }
}

/// Renders ranked documents as `[rank] (score=…) payload`, one per line.
pub fn render_context(documents: &[SearchResult]) -> ContextBlock {
    if documents.is_empty() {
        return ContextBlock::NoMatches;
    }
    let mut out = String::new();
    for (i, d) in documents.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "[{}] (score={:.4}) {}", i + 1, d.score, d.payload);
    }
    ContextBlock::Documents(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionSchema, Metric, RetryConfig, SearchParams};
    use crate::memory_store::MemoryVectorStore;
    use crate::record::IndexedDocument;
    use crate::vector_store::IndexInfo;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ConstEmbedder;

    impl EmbeddingsProvider for ConstEmbedder {
        fn embed<'a>(
            &'a self,
            _text: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>, RagError>> + Send + 'a>> {
            Box::pin(async { Ok(vec![1.0, 0.0]) })
        }
    }

    /// Store whose answers depend on the metric asked for.
    struct ScriptedStore {
        advanced_fails: bool,
        baseline_hits: usize,
        searches: AtomicUsize,
    }

    impl VectorStore for ScriptedStore {
        fn has_collection(&self) -> BoxFuture<'_, Result<bool, RagError>> {
            async { Ok(true) }.boxed()
        }
        fn ensure_collection<'a>(
            &'a self,
            _schema: &'a CollectionSchema,
        ) -> BoxFuture<'a, Result<(), RagError>> {
            async { Ok(()) }.boxed()
        }
        fn describe_index<'a>(
            &'a self,
            _field: &'a str,
        ) -> BoxFuture<'a, Result<Option<IndexInfo>, RagError>> {
            async { Ok(None) }.boxed()
        }
        fn ensure_index<'a>(
            &'a self,
            _field: &'a str,
            _metric: Metric,
        ) -> BoxFuture<'a, Result<(), RagError>> {
            async { Ok(()) }.boxed()
        }
        fn ensure_loaded(&self) -> BoxFuture<'_, Result<(), RagError>> {
            async { Ok(()) }.boxed()
        }
        fn upsert(&self, _docs: Vec<IndexedDocument>) -> BoxFuture<'_, Result<(), RagError>> {
            async { Ok(()) }.boxed()
        }
        fn search<'a>(
            &'a self,
            _vector: &'a [f32],
            top_k: usize,
            params: &'a SearchParams,
        ) -> BoxFuture<'a, Result<Vec<SearchResult>, RagError>> {
            async move {
                self.searches.fetch_add(1, Ordering::SeqCst);
                if params.metric == Metric::InnerProduct {
                    if self.advanced_fails {
                        return Err(RagError::Qdrant("503 Service Unavailable".into()));
                    }
                    return Ok(hits(top_k, params.metric));
                }
                if self.baseline_hits == 0 {
                    return Err(RagError::Qdrant("deadline exceeded".into()));
                }
                Ok(hits(self.baseline_hits.min(top_k), params.metric))
            }
            .boxed()
        }
        fn is_ready(&self) -> BoxFuture<'_, bool> {
            async { true }.boxed()
        }
    }

    fn hits(n: usize, metric: Metric) -> Vec<SearchResult> {
        (0..n as u64)
            .map(|id| SearchResult {
                id,
                score: 1.0 - id as f32 / 10.0,
                payload: format!("doc {id}"),
                metric,
            })
            .collect()
    }

    fn assembler(store: Arc<dyn VectorStore>) -> RetrievalAssembler {
        RetrievalAssembler::new(
            Arc::new(ConstEmbedder),
            store,
            RetrievalConfig::default(),
            RetryPolicy::interactive(&RetryConfig::default()),
        )
    }

    #[tokio::test]
    async fn advanced_overfetches_then_truncates() {
        let store = Arc::new(ScriptedStore {
            advanced_fails: false,
            baseline_hits: 0,
            searches: AtomicUsize::new(0),
        });
        let ctx = assembler(store.clone()).build_context("rent", 3).await.unwrap();
        assert_eq!(ctx.documents.len(), 3);
        assert!(ctx.documents.iter().all(|d| d.metric == Metric::InnerProduct));
        assert_eq!(store.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_advanced_failure_falls_back_to_baseline() {
        let store = Arc::new(ScriptedStore {
            advanced_fails: true,
            baseline_hits: 5,
            searches: AtomicUsize::new(0),
        });
        let ctx = assembler(store.clone()).build_context("lease", 5).await.unwrap();
        assert_eq!(ctx.documents.len(), 5);
        assert!(ctx.documents.iter().all(|d| d.metric == Metric::L2));
        assert_eq!(store.searches.load(Ordering::SeqCst), 2);
        assert!(matches!(ctx.block, ContextBlock::Documents(_)));
    }

    #[tokio::test]
    async fn double_failure_carries_both_causes() {
        let store = Arc::new(ScriptedStore {
            advanced_fails: true,
            baseline_hits: 0,
            searches: AtomicUsize::new(0),
        });
        let err = assembler(store).build_context("lease", 5).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("503"), "{msg}");
        assert!(msg.contains("deadline exceeded"), "{msg}");
    }

    #[tokio::test]
    async fn empty_collection_is_an_explicit_no_match() {
        let store = Arc::new(MemoryVectorStore::new("kb", "content"));
        store
            .ensure_collection(&CollectionSchema {
                name: "kb".into(),
                dim: 2,
                metrics: vec![Metric::InnerProduct, Metric::L2],
                content_field: "content".into(),
            })
            .await
            .unwrap();
        let ctx = assembler(store).build_context("anything", 4).await.unwrap();
        assert_eq!(ctx.block, ContextBlock::NoMatches);
        assert!(ctx.documents.is_empty());
    }

    #[test]
    fn renders_ranked_template() {
        let block = render_context(&hits(2, Metric::L2));
        assert_eq!(
            block.as_text(),
            Some("[1] (score=1.0000) doc 0\n[2] (score=0.9000) doc 1")
        );
        assert_eq!(render_context(&[]), ContextBlock::NoMatches);
    }
}
