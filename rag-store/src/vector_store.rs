//! Vector Store Gateway: the narrow contract both backends implement.
//!
//! A store is bound to one collection. The `ensure_*` calls are idempotent
//! and become cheap no-ops after their first success. `search` on a
//! collection that is not loaded yet ensures index and load first.

use futures::future::BoxFuture;

use crate::config::{CollectionSchema, Metric, SearchParams};
use crate::errors::RagError;
use crate::record::{IndexedDocument, SearchResult};

/// What the store reports about an index on a payload field.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexInfo {
    pub field: String,
    /// Metrics a search can use on this collection.
    pub metrics: Vec<Metric>,
    /// Points covered by the index, when the backend reports it.
    pub indexed_points: Option<u64>,
}

pub trait VectorStore: Send + Sync {
    fn has_collection(&self) -> BoxFuture<'_, Result<bool, RagError>>;

    /// Creates the collection if missing. An existing collection with a
    /// different dimension is a configuration error.
    fn ensure_collection<'a>(
        &'a self,
        schema: &'a CollectionSchema,
    ) -> BoxFuture<'a, Result<(), RagError>>;

    /// `None` when no index exists on `field`.
    fn describe_index<'a>(
        &'a self,
        field: &'a str,
    ) -> BoxFuture<'a, Result<Option<IndexInfo>, RagError>>;

    fn ensure_index<'a>(
        &'a self,
        field: &'a str,
        metric: Metric,
    ) -> BoxFuture<'a, Result<(), RagError>>;

    fn ensure_loaded(&self) -> BoxFuture<'_, Result<(), RagError>>;

    /// Insert-or-replace by id.
    fn upsert(&self, docs: Vec<IndexedDocument>) -> BoxFuture<'_, Result<(), RagError>>;

    /// Best match first.
    fn search<'a>(
        &'a self,
        vector: &'a [f32],
        top_k: usize,
        params: &'a SearchParams,
    ) -> BoxFuture<'a, Result<Vec<SearchResult>, RagError>>;

    fn is_ready(&self) -> BoxFuture<'_, bool>;
}
