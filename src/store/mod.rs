//! Vector storage for catalog indexes.
//!
//! The [`IndexStore`] trait holds one namespace of collection vectors per
//! catalog. Two backends are provided:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteIndexStore`] | Persistent index on disk (default) |
//! | [`InMemoryIndexStore`] | Tests and ephemeral runs |
//!
//! Similarity search is brute-force cosine similarity; catalogs hold at most
//! a few thousand collections.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

pub use memory::InMemoryIndexStore;
pub use sqlite::SqliteIndexStore;

/// One indexed collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub collection_id: String,
    pub title: String,
    pub description: String,
    pub embedding: Vec<f32>,
}

/// A collection returned from a similarity query, best match first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHit {
    pub collection_id: String,
    pub title: String,
    pub description: String,
    pub score: f32,
}

/// Summary of a stored namespace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub catalog_url: String,
    pub collections: usize,
}

/// Per-namespace vector store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put_namespace`](IndexStore::put_namespace) | Create or extend a namespace atomically |
/// | [`namespace_exists`](IndexStore::namespace_exists) | Existence check |
/// | [`list_namespaces`](IndexStore::list_namespaces) | All namespaces with entry counts |
/// | [`drop_namespace`](IndexStore::drop_namespace) | Remove a namespace and its entries |
/// | [`query`](IndexStore::query) | Nearest entries by cosine similarity |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Creates the namespace if needed and upserts `entries` keyed by
    /// collection id, in one atomic step. Re-running with the same entries
    /// never duplicates them.
    async fn put_namespace(
        &self,
        namespace: &str,
        catalog_url: &str,
        entries: &[IndexEntry],
    ) -> Result<()>;

    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>>;

    /// Returns `true` if the namespace existed.
    async fn drop_namespace(&self, namespace: &str) -> Result<bool>;

    /// Returns up to `limit` entries of `namespace` ranked by similarity to
    /// `query_vec`. An unknown namespace yields no hits.
    async fn query(&self, namespace: &str, query_vec: &[f32], limit: usize)
        -> Result<Vec<IndexHit>>;
}

/// Sorts hits best first and keeps the top `limit`.
pub(crate) fn rank_hits(mut hits: Vec<IndexHit>, limit: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.collection_id.cmp(&b.collection_id))
    });
    hits.truncate(limit);
    hits
}
