//! In-process vector store with brute-force search.
//!
//! Same contract as the Qdrant facade; used for `RAG_BACKEND=memory` and in
//! tests. Everything lives behind one `RwLock`.

use std::collections::{BTreeMap, HashSet};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{CollectionSchema, Metric, SearchParams};
use crate::errors::RagError;
use crate::record::{IndexedDocument, SearchResult};
use crate::vector_store::{IndexInfo, VectorStore};

#[derive(Default)]
struct State {
    schema: Option<CollectionSchema>,
    docs: BTreeMap<u64, (Vec<f32>, String)>,
    indexed_fields: HashSet<String>,
    loaded: bool,
}

pub struct MemoryVectorStore {
    name: String,
    content_field: String,
    state: RwLock<State>,
}

impl MemoryVectorStore {
    pub fn new(name: impl Into<String>, content_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_field: content_field.into(),
            state: RwLock::new(State::default()),
        }
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.state.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn ensure_index_inner(&self, field: &str, metric: Metric) -> Result<(), RagError> {
        let mut st = self.state.write().await;
        let schema = st
            .schema
            .as_ref()
            .ok_or_else(|| RagError::Config(format!("collection '{}' does not exist", self.name)))?;
        if !schema.metrics.contains(&metric) {
            return Err(RagError::Config(format!(
                "collection '{}' has no {} vector space",
                self.name,
                metric.as_str()
            )));
        }
        if st.indexed_fields.insert(field.to_string()) {
            debug!(field, "memory index created");
        }
        Ok(())
    }

    async fn ensure_loaded_inner(&self) -> Result<(), RagError> {
        let mut st = self.state.write().await;
        if st.schema.is_none() {
            return Err(RagError::Config(format!(
                "collection '{}' does not exist",
                self.name
            )));
        }
        st.loaded = true;
        Ok(())
    }

    async fn search_inner(
        &self,
        vector: &[f32],
        top_k: usize,
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>, RagError> {
        if !self.state.read().await.loaded {
            self.ensure_index_inner(&self.content_field, params.metric)
                .await?;
            self.ensure_loaded_inner().await?;
        }

        let st = self.state.read().await;
        let schema = st
            .schema
            .as_ref()
            .ok_or_else(|| RagError::Config(format!("collection '{}' does not exist", self.name)))?;
        if !schema.metrics.contains(&params.metric) {
            return Err(RagError::Config(format!(
                "collection '{}' has no {} vector space",
                self.name,
                params.metric.as_str()
            )));
        }
        if vector.len() != schema.dim {
            return Err(RagError::VectorSizeMismatch {
                got: vector.len(),
                want: schema.dim,
            });
        }

        let mut hits: Vec<SearchResult> = st
            .docs
            .iter()
            .map(|(id, (v, payload))| SearchResult {
                id: *id,
                score: score(params.metric, vector, v),
                payload: payload.clone(),
                metric: params.metric,
            })
            .collect();

        let higher = params.metric.higher_is_better();
        hits.sort_by(|a, b| {
            let ord = a
                .score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal);
            (if higher { ord.reverse() } else { ord }).then(a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match metric {
        Metric::InnerProduct => dot,
        Metric::Cosine => {
            let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if na == 0.0 || nb == 0.0 {
                0.0
            } else {
                dot / (na * nb)
            }
        }
        Metric::L2 => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

impl VectorStore for MemoryVectorStore {
    fn has_collection(&self) -> BoxFuture<'_, Result<bool, RagError>> {
        async move { Ok(self.state.read().await.schema.is_some()) }.boxed()
    }

    fn ensure_collection<'a>(
        &'a self,
        schema: &'a CollectionSchema,
    ) -> BoxFuture<'a, Result<(), RagError>> {
        async move {
            let mut st = self.state.write().await;
            match &st.schema {
                Some(existing) if existing.dim != schema.dim => {
                    Err(RagError::VectorSizeMismatch {
                        got: schema.dim,
                        want: existing.dim,
                    })
                }
                Some(_) => Ok(()),
                None => {
                    info!(collection = %self.name, dim = schema.dim, "memory collection created");
                    st.schema = Some(schema.clone());
                    Ok(())
                }
            }
        }
        .boxed()
    }

    fn describe_index<'a>(
        &'a self,
        field: &'a str,
    ) -> BoxFuture<'a, Result<Option<IndexInfo>, RagError>> {
        async move {
            let st = self.state.read().await;
            let Some(schema) = &st.schema else {
                return Ok(None);
            };
            Ok(st.indexed_fields.contains(field).then(|| IndexInfo {
                field: field.to_string(),
                metrics: schema.metrics.clone(),
                indexed_points: Some(st.docs.len() as u64),
            }))
        }
        .boxed()
    }

    fn ensure_index<'a>(
        &'a self,
        field: &'a str,
        metric: Metric,
    ) -> BoxFuture<'a, Result<(), RagError>> {
        self.ensure_index_inner(field, metric).boxed()
    }

    fn ensure_loaded(&self) -> BoxFuture<'_, Result<(), RagError>> {
        self.ensure_loaded_inner().boxed()
    }

    fn upsert(&self, docs: Vec<IndexedDocument>) -> BoxFuture<'_, Result<(), RagError>> {
        async move {
            let mut st = self.state.write().await;
            let dim = st
                .schema
                .as_ref()
                .map(|s| s.dim)
                .ok_or_else(|| RagError::Config(format!("collection '{}' does not exist", self.name)))?;
            if let Some(bad) = docs.iter().find(|d| d.vector.len() != dim) {
                return Err(RagError::VectorSizeMismatch {
                    got: bad.vector.len(),
                    want: dim,
                });
            }
            for d in docs {
                st.docs.insert(d.id, (d.vector, d.payload));
            }
            Ok(())
        }
        .boxed()
    }

    fn search<'a>(
        &'a self,
        vector: &'a [f32],
        top_k: usize,
        params: &'a SearchParams,
    ) -> BoxFuture<'a, Result<Vec<SearchResult>, RagError>> {
        self.search_inner(vector, top_k, params).boxed()
    }

    fn is_ready(&self) -> BoxFuture<'_, bool> {
        async { true }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> CollectionSchema {
        CollectionSchema {
            name: "kb".into(),
            dim: 2,
            metrics: vec![Metric::InnerProduct, Metric::L2],
            content_field: "content".into(),
        }
    }

    fn doc(id: u64, v: [f32; 2]) -> IndexedDocument {
        IndexedDocument {
            id,
            vector: v.to_vec(),
            payload: format!("doc {id}"),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let store = MemoryVectorStore::new("kb", "content");
        store.ensure_collection(&schema()).await.unwrap();
        store.upsert(vec![doc(0, [1.0, 0.0]), doc(1, [0.0, 1.0])]).await.unwrap();
        store.upsert(vec![doc(0, [1.0, 0.0]), doc(1, [0.0, 1.0])]).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn search_loads_lazily_and_ranks_per_metric() {
        let store = MemoryVectorStore::new("kb", "content");
        store.ensure_collection(&schema()).await.unwrap();
        store
            .upsert(vec![doc(0, [1.0, 0.0]), doc(1, [0.0, 1.0]), doc(2, [3.0, 0.0])])
            .await
            .unwrap();
        assert!(store.describe_index("content").await.unwrap().is_none());

        let ip = store.search(&[1.0, 0.0], 2, &SearchParams::ADVANCED).await.unwrap();
        assert_eq!(ip.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2, 0]);
        assert!(store.describe_index("content").await.unwrap().is_some());

        let l2 = store.search(&[1.0, 0.0], 2, &SearchParams::BASELINE).await.unwrap();
        assert_eq!(l2.iter().map(|h| h.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(l2[0].metric, Metric::L2);
    }

    #[tokio::test]
    async fn dimension_conflicts_are_configuration_errors() {
        let store = MemoryVectorStore::new("kb", "content");
        store.ensure_collection(&schema()).await.unwrap();
        let mut wider = schema();
        wider.dim = 3;
        let err = store.ensure_collection(&wider).await.unwrap_err();
        assert!(err.is_configuration());

        let err = store.upsert(vec![IndexedDocument {
            id: 9,
            vector: vec![1.0],
            payload: String::new(),
        }]);
        assert!(err.await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn unknown_metric_is_rejected() {
        let store = MemoryVectorStore::new("kb", "content");
        let mut s = schema();
        s.metrics = vec![Metric::L2];
        store.ensure_collection(&s).await.unwrap();
        let err = store
            .search(&[0.0, 1.0], 1, &SearchParams::ADVANCED)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }
}
