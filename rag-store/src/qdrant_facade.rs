//! Thin adapter around `qdrant-client` to isolate API usage.
//!
//! Layout of a collection:
//! - one named vector per metric (`vector_ip`, `vector_l2`, ...) so each
//!   search path can pick its metric; every point carries the same embedding
//!   in all of them
//! - payload `{ <content_field>: text }` with a text index on that field
//! - numeric point ids (corpus ordinals), so re-upserting a batch overwrites

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use qdrant_client::qdrant::{
    CollectionInfo, CollectionStatus, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    Distance, FieldType, PointStruct, SearchParamsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParams, VectorParamsBuilder, VectorsConfigBuilder,
    point_id::PointIdOptions, value::Kind, vectors_config,
};
use qdrant_client::{Payload, Qdrant};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::config::{CollectionSchema, Metric, RagConfig, SearchParams};
use crate::errors::RagError;
use crate::record::{IndexedDocument, SearchResult};
use crate::vector_store::{IndexInfo, VectorStore};

const LOAD_POLL_ATTEMPTS: u32 = 20;
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A facade over the Qdrant client bound to one collection.
pub struct QdrantFacade {
    client: Qdrant,
    collection: String,
    content_field: String,
    collection_ready: AtomicBool,
    indexed: RwLock<HashSet<String>>,
    loaded: OnceCell<()>,
}

fn vector_name(metric: Metric) -> String {
    format!("vector_{}", metric.as_str())
}

fn distance_of(metric: Metric) -> Distance {
    match metric {
        Metric::Cosine => Distance::Cosine,
        Metric::InnerProduct => Distance::Dot,
        Metric::L2 => Distance::Euclid,
    }
}

fn metric_of(distance: i32) -> Option<Metric> {
    match Distance::try_from(distance).ok()? {
        Distance::Cosine => Some(Metric::Cosine),
        Distance::Dot => Some(Metric::InnerProduct),
        Distance::Euclid => Some(Metric::L2),
        _ => None,
    }
}

/// Named vector spaces of an existing collection.
fn named_spaces(info: &CollectionInfo) -> HashMap<String, VectorParams> {
    let cfg = info
        .config
        .as_ref()
        .and_then(|c| c.params.as_ref())
        .and_then(|p| p.vectors_config.as_ref())
        .and_then(|v| v.config.as_ref());
    match cfg {
        Some(vectors_config::Config::ParamsMap(m)) => m.map.clone(),
        Some(vectors_config::Config::Params(p)) => HashMap::from([(String::new(), p.clone())]),
        None => HashMap::new(),
    }
}

impl QdrantFacade {
    /// Creates a new facade from the given configuration.
    ///
    /// # Errors
    /// Returns [`RagError::Config`] on invalid config, [`RagError::Qdrant`]
    /// if the client cannot be built.
    pub fn new(cfg: &RagConfig) -> Result<Self, RagError> {
        cfg.validate()?;

        let mut builder = Qdrant::from_url(&cfg.qdrant_url);
        if let Some(key) = &cfg.qdrant_api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            collection: cfg.collection.clone(),
            content_field: cfg.content_field.clone(),
            collection_ready: AtomicBool::new(false),
            indexed: RwLock::new(HashSet::new()),
            loaded: OnceCell::new(),
        })
    }

    async fn info(&self) -> Result<CollectionInfo, RagError> {
        self.client
            .collection_info(&self.collection)
            .await?
            .result
            .ok_or_else(|| RagError::Qdrant(format!("no info for '{}'", self.collection)))
    }

    async fn ensure_collection_inner(&self, schema: &CollectionSchema) -> Result<(), RagError> {
        if self.collection_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        info!(
            "Ensuring collection '{}' with dim={} metrics={:?}",
            self.collection, schema.dim, schema.metrics
        );

        if self.client.collection_exists(&self.collection).await? {
            let spaces = named_spaces(&self.info().await?);
            for metric in &schema.metrics {
                match spaces.get(&vector_name(*metric)) {
                    Some(p) if p.size as usize != schema.dim => {
                        return Err(RagError::VectorSizeMismatch {
                            got: schema.dim,
                            want: p.size as usize,
                        });
                    }
                    Some(_) => {}
                    None => {
                        return Err(RagError::Config(format!(
                            "collection '{}' exists without vector space '{}'",
                            self.collection,
                            vector_name(*metric)
                        )));
                    }
                }
            }
            debug!("Collection '{}' already exists", self.collection);
        } else {
            let mut vectors = VectorsConfigBuilder::default();
            for metric in &schema.metrics {
                vectors.add_named_vector_params(
                    vector_name(*metric),
                    VectorParamsBuilder::new(schema.dim as u64, distance_of(*metric)).build(),
                );
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(vectors),
                )
                .await?;
            info!("Collection '{}' created", self.collection);
        }

        self.collection_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn describe_index_inner(&self, field: &str) -> Result<Option<IndexInfo>, RagError> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(None);
        }
        let info = self.info().await?;
        let Some(schema) = info.payload_schema.get(field) else {
            return Ok(None);
        };
        let metrics = named_spaces(&info)
            .values()
            .filter_map(|p| metric_of(p.distance))
            .collect();
        Ok(Some(IndexInfo {
            field: field.to_string(),
            metrics,
            indexed_points: schema.points,
        }))
    }

    async fn ensure_index_inner(&self, field: &str, metric: Metric) -> Result<(), RagError> {
        if self.indexed.read().await.contains(field) {
            return Ok(());
        }

        let info = self.info().await?;
        if !named_spaces(&info).contains_key(&vector_name(metric)) {
            return Err(RagError::Config(format!(
                "collection '{}' has no {} vector space",
                self.collection,
                metric.as_str()
            )));
        }

        if info.payload_schema.contains_key(field) {
            debug!(field, "payload index already present");
        } else {
            info!(field, collection = %self.collection, "creating payload index");
            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(
                        &self.collection,
                        field,
                        FieldType::Text,
                    )
                    .wait(true),
                )
                .await?;
        }

        self.indexed.write().await.insert(field.to_string());
        Ok(())
    }

    /// Polls until the collection serves searches.
    ///
    /// Green and yellow (optimizing) both serve; red fails right away.
    async fn wait_serving(&self) -> Result<(), RagError> {
        for attempt in 0..LOAD_POLL_ATTEMPTS {
            let status = self.info().await?.status;
            if status == CollectionStatus::Green as i32 || status == CollectionStatus::Yellow as i32
            {
                debug!(attempt, "collection '{}' is serving", self.collection);
                return Ok(());
            }
            if status == CollectionStatus::Red as i32 {
                return Err(RagError::Qdrant(format!(
                    "collection '{}' is red",
                    self.collection
                )));
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
        Err(RagError::Qdrant(format!(
            "collection '{}' not loaded after {} polls (service unavailable)",
            self.collection, LOAD_POLL_ATTEMPTS
        )))
    }

    async fn upsert_inner(&self, docs: Vec<IndexedDocument>) -> Result<(), RagError> {
        if docs.is_empty() {
            debug!("No points provided for upsert");
            return Ok(());
        }
        let spaces: Vec<String> = named_spaces(&self.info().await?).into_keys().collect();
        let n = docs.len();

        let points: Vec<PointStruct> = docs
            .into_iter()
            .map(|d| {
                let vectors: HashMap<String, Vec<f32>> = spaces
                    .iter()
                    .map(|name| (name.clone(), d.vector.clone()))
                    .collect();
                let mut payload = Payload::new();
                payload.insert(self.content_field.as_str(), d.payload);
                PointStruct::new(d.id, vectors, payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        debug!("Upserted {} points into '{}'", n, self.collection);
        Ok(())
    }

    async fn search_inner(
        &self,
        vector: &[f32],
        top_k: usize,
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>, RagError> {
        self.loaded
            .get_or_try_init(|| async {
                self.ensure_index_inner(&self.content_field, params.metric)
                    .await?;
                self.wait_serving().await
            })
            .await?;

        debug!(
            "Searching '{}' top_k={} metric={:?} ef={}",
            self.collection, top_k, params.metric, params.candidates
        );

        let res = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), top_k as u64)
                    .vector_name(vector_name(params.metric))
                    .with_payload(true)
                    .params(SearchParamsBuilder::default().hnsw_ef(params.candidates)),
            )
            .await?;

        let out = res
            .result
            .into_iter()
            .filter_map(|p| {
                let id = match p.id.and_then(|id| id.point_id_options) {
                    Some(PointIdOptions::Num(n)) => n,
                    other => {
                        warn!(?other, "skipping point with non-numeric id");
                        return None;
                    }
                };
                let payload = match p.payload.get(&self.content_field).and_then(|v| v.kind.clone()) {
                    Some(Kind::StringValue(s)) => s,
                    _ => String::new(),
                };
                Some(SearchResult {
                    id,
                    score: p.score,
                    payload,
                    metric: params.metric,
                })
            })
            .collect::<Vec<_>>();

        debug!("Search completed: {} hits returned", out.len());
        Ok(out)
    }
}

impl VectorStore for QdrantFacade {
    fn has_collection(&self) -> BoxFuture<'_, Result<bool, RagError>> {
        async move { Ok(self.client.collection_exists(&self.collection).await?) }.boxed()
    }

    fn ensure_collection<'a>(
        &'a self,
        schema: &'a CollectionSchema,
    ) -> BoxFuture<'a, Result<(), RagError>> {
        self.ensure_collection_inner(schema).boxed()
    }

    fn describe_index<'a>(
        &'a self,
        field: &'a str,
    ) -> BoxFuture<'a, Result<Option<IndexInfo>, RagError>> {
        self.describe_index_inner(field).boxed()
    }

    fn ensure_index<'a>(
        &'a self,
        field: &'a str,
        metric: Metric,
    ) -> BoxFuture<'a, Result<(), RagError>> {
        self.ensure_index_inner(field, metric).boxed()
    }

    fn ensure_loaded(&self) -> BoxFuture<'_, Result<(), RagError>> {
        async move {
            self.loaded
                .get_or_try_init(|| self.wait_serving())
                .await
                .map(|_| ())
        }
        .boxed()
    }

    fn upsert(&self, docs: Vec<IndexedDocument>) -> BoxFuture<'_, Result<(), RagError>> {
        self.upsert_inner(docs).boxed()
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
        async move {
            match self.client.health_check().await {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "qdrant health check failed");
                    false
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_names_are_stable() {
        assert_eq!(vector_name(Metric::InnerProduct), "vector_ip");
        assert_eq!(vector_name(Metric::L2), "vector_l2");
    }

    #[test]
    fn distances_round_trip_to_metrics() {
        for m in [Metric::Cosine, Metric::InnerProduct, Metric::L2] {
            assert_eq!(metric_of(distance_of(m) as i32), Some(m));
        }
    }

    #[test]
    fn construction_is_lazy() {
        let cfg = RagConfig::new_default("http://localhost:6334", "kb", 4);
        assert!(QdrantFacade::new(&cfg).is_ok());
    }
}
