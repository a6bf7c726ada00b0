//! Per-catalog collection index.
//!
//! Every catalog gets its own vector namespace, named deterministically from
//! its URL:
//!
//! ```text
//! https://planetarycomputer.microsoft.com/api/stac/v1
//!   → catalog name  planetarycomputer_microsoft_com_api_stac_v1_<8 hex of sha256(url)>
//!   → namespace     <catalog name>_collections
//! ```
//!
//! A namespace is built lazily the first time a catalog is needed: the
//! catalog is validated, each collection's `"<title> <description>"` is
//! embedded, and the vectors are upserted by collection id. Existing
//! namespaces are never rebuilt implicitly; [`CatalogIndex::reload`] is the
//! only way to refresh one.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, CollectionInfo, StacHttpClient};
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::http::UPSTREAM_RETRIES;
use crate::store::{IndexEntry, IndexHit, IndexStore, NamespaceInfo, SqliteIndexStore};
use crate::{Error, Result};

/// `"<sanitized url>_<first 8 hex chars of sha256(url)>"`.
pub fn catalog_name(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let sanitized = stripped.replace(['/', '.'], "_");
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{}_{}", sanitized, &digest[..8])
}

pub fn namespace_for(url: &str) -> String {
    format!("{}_collections", catalog_name(url))
}

/// Outcome of an indexing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub catalog_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections_count: Option<usize>,
}

/// Queryable view of one catalog's namespace.
pub struct IndexHandle {
    namespace: String,
    store: Arc<dyn IndexStore>,
}

impl IndexHandle {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Nearest collections to `query_vec`, best first.
    pub async fn query(&self, query_vec: &[f32], limit: usize) -> Result<Vec<IndexHit>> {
        self.store
            .query(&self.namespace, query_vec, limit)
            .await
            .map_err(Error::storage)
    }
}

pub struct CatalogIndex {
    catalog: Arc<dyn CatalogClient>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn IndexStore>,
    batch_size: usize,
}

impl CatalogIndex {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            catalog,
            embedder,
            store,
            batch_size: 64,
        }
    }

    /// Catalog client, embedding provider and SQLite store from configuration,
    /// without any LLM.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let catalog = StacHttpClient::new(config.timeouts.request(), UPSTREAM_RETRIES)?;
        let embedder = embedding::create_provider(&config.embedding)?;
        let store = SqliteIndexStore::open(&config.index.path).await?;
        Ok(Self::new(Arc::new(catalog), embedder, Arc::new(store))
            .with_batch_size(config.embedding.batch_size))
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Builds the catalog's namespace unless it already exists.
    pub async fn ensure_indexed(&self, url: &str) -> IndexStatus {
        status_of(url, self.index_if_missing(url).await)
    }

    /// Drops and rebuilds the catalog's namespace.
    pub async fn reload(&self, url: &str) -> IndexStatus {
        let result = async {
            let collections = self.validate(url).await?;
            self.store
                .drop_namespace(&namespace_for(url))
                .await
                .map_err(Error::storage)?;
            let count = self.build(url, collections).await?;
            Ok::<_, Error>(Indexed::Built(count))
        }
        .await;
        status_of(url, result)
    }

    /// Ensures the catalog is indexed and returns a handle to it, keeping the
    /// failure's error kind.
    pub async fn require_index(&self, url: &str) -> Result<IndexHandle> {
        self.index_if_missing(url).await?;
        self.get_index(url).await
    }

    /// Handle to an existing namespace; [`Error::IndexNotFound`] otherwise.
    pub async fn get_index(&self, url: &str) -> Result<IndexHandle> {
        let namespace = namespace_for(url);
        let exists = self
            .store
            .namespace_exists(&namespace)
            .await
            .map_err(Error::storage)?;
        if !exists {
            return Err(Error::IndexNotFound(namespace));
        }
        Ok(IndexHandle {
            namespace,
            store: self.store.clone(),
        })
    }

    pub async fn list_indexed(&self) -> Result<Vec<NamespaceInfo>> {
        self.store.list_namespaces().await.map_err(Error::storage)
    }

    async fn index_if_missing(&self, url: &str) -> Result<Indexed> {
        let namespace = namespace_for(url);
        if self
            .store
            .namespace_exists(&namespace)
            .await
            .map_err(Error::storage)?
        {
            return Ok(Indexed::Existing);
        }

        let collections = self.validate(url).await?;
        let count = self.build(url, collections).await?;
        Ok(Indexed::Built(count))
    }

    /// Opens the catalog and lists its collections; at least one is required.
    async fn validate(&self, url: &str) -> Result<Vec<CollectionInfo>> {
        self.catalog.open(url).await?;
        let collections = self.catalog.list_collections(url).await.map_err(|e| match e {
            Error::InvalidCatalog { .. } => e,
            other => Error::InvalidCatalog {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;
        if collections.is_empty() {
            return Err(Error::InvalidCatalog {
                url: url.to_string(),
                reason: "catalog has no collections".to_string(),
            });
        }
        Ok(collections)
    }

    async fn build(&self, url: &str, collections: Vec<CollectionInfo>) -> Result<usize> {
        let started = Instant::now();
        let namespace = namespace_for(url);

        let mut seen = HashSet::new();
        let collections: Vec<CollectionInfo> = collections
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();

        info!(
            catalog = url,
            namespace = %namespace,
            collections = collections.len(),
            "indexing catalog collections"
        );

        let mut entries = Vec::with_capacity(collections.len());
        for batch in collections.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(CollectionInfo::summary).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::external(
                    "embedding",
                    format!("expected {} vectors, got {}", batch.len(), vectors.len()),
                ));
            }
            for (info, embedding) in batch.iter().zip(vectors) {
                entries.push(IndexEntry {
                    collection_id: info.id.clone(),
                    title: info.title.clone().unwrap_or_default(),
                    description: info.description.clone().unwrap_or_default(),
                    embedding,
                });
            }
        }

        self.store
            .put_namespace(&namespace, url, &entries)
            .await
            .map_err(Error::storage)?;

        info!(
            catalog = url,
            collections = entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "catalog indexed"
        );
        Ok(entries.len())
    }
}

enum Indexed {
    Existing,
    Built(usize),
}

fn status_of(url: &str, result: Result<Indexed>) -> IndexStatus {
    let catalog_name = catalog_name(url);
    match result {
        Ok(Indexed::Existing) => IndexStatus {
            success: true,
            message: Some("Catalog already indexed".to_string()),
            error: None,
            catalog_name,
            collections_count: None,
        },
        Ok(Indexed::Built(count)) => IndexStatus {
            success: true,
            message: Some("Catalog indexed successfully".to_string()),
            error: None,
            catalog_name,
            collections_count: Some(count),
        },
        Err(e) => {
            warn!(catalog = url, error = %e, "catalog indexing failed");
            IndexStatus {
                success: false,
                message: None,
                error: Some(e.to_string()),
                catalog_name,
                collections_count: None,
            }
        }
    }
}
