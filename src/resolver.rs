//! Collection resolution.
//!
//! Narrows a catalog down to the collections a query is about, in two
//! stages:
//!
//! ```text
//! query ──frame──▶ {query, is_specific}
//!                      │ specific
//!                      ▼
//!        embed ──▶ index query (2 × top_k) ──▶ LLM re-rank ──▶ candidates
//! ```
//!
//! General queries ("imagery of Paris") resolve to `None` and the
//! orchestrator falls back to default collections. Framing, re-ranking and
//! query embeddings are all cached.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cache::CacheSet;
use crate::catalog_index::CatalogIndex;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::extractor::with_timeout;
use crate::llm::{extract, LlmClient};
use crate::models::CollectionCandidate;
use crate::prompts;
use crate::store::IndexHit;
use crate::Result;

/// A query rewritten for collection-level matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramedQuery {
    pub query: String,
    #[serde(default)]
    pub is_specific: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RankedCollections {
    #[serde(default)]
    results: Vec<CollectionCandidate>,
}

pub struct CollectionResolver {
    llm: Arc<dyn LlmClient>,
    index: Arc<CatalogIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    caches: Arc<CacheSet>,
    top_k: usize,
    /// Deadline for each LLM and embedding call.
    timeout: Duration,
}

impl CollectionResolver {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        index: Arc<CatalogIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        caches: Arc<CacheSet>,
        top_k: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            index,
            embedder,
            caches,
            top_k: top_k.max(1),
            timeout,
        }
    }

    pub fn index(&self) -> &Arc<CatalogIndex> {
        &self.index
    }

    /// Candidate collections for `query`, or `None` when the query does not
    /// point at particular kinds of data.
    pub async fn resolve_collections(
        &self,
        query: &str,
        catalog_url: &str,
    ) -> Result<Option<Vec<CollectionCandidate>>> {
        self.caches
            .extraction
            .cached_call(
                "resolve_collections",
                &(query, catalog_url, self.top_k),
                || async {
                    let framed = self.frame(query).await?;
                    info!(framed = %framed.query, is_specific = framed.is_specific, "framed collection query");
                    if !framed.is_specific {
                        return Ok(None);
                    }
                    let candidates = self
                        .search_collections(&framed.query, catalog_url, self.top_k)
                        .await?;
                    Ok(Some(candidates))
                },
            )
            .await
    }

    /// Rewrites `query` into collection-level phrasing and classifies it.
    pub async fn frame(&self, query: &str) -> Result<FramedQuery> {
        self.caches
            .extraction
            .cached_call("frame_collection_query", query, || {
                with_timeout(
                    "query framing",
                    self.timeout,
                    extract::<FramedQuery>(self.llm.as_ref(), prompts::FRAMING, query),
                )
            })
            .await
    }

    /// Semantic search plus re-ranking over a catalog's collections, without
    /// framing. The catalog is indexed first if needed.
    pub async fn search_collections(
        &self,
        query: &str,
        catalog_url: &str,
        top_k: usize,
    ) -> Result<Vec<CollectionCandidate>> {
        let started = Instant::now();
        let handle = self.index.require_index(catalog_url).await?;

        let query_vec = self.embed(query).await?;
        let hits = handle.query(&query_vec, top_k.max(1) * 2).await?;
        debug!(
            namespace = handle.namespace(),
            hits = hits.len(),
            "vector search complete"
        );
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranked = self.rerank(query, &hits).await?;
        ranked.truncate(top_k.max(1));

        info!(
            candidates = ranked.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collection search complete"
        );
        Ok(ranked)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.embedder.model_name().to_string();
        self.caches
            .embedding
            .cached_call("embed_query", &(model, text), || {
                with_timeout(
                    "query embedding",
                    self.timeout,
                    embed_query(self.embedder.as_ref(), text),
                )
            })
            .await
    }

    async fn rerank(&self, query: &str, hits: &[IndexHit]) -> Result<Vec<CollectionCandidate>> {
        let ids: Vec<&str> = hits.iter().map(|h| h.collection_id.as_str()).collect();
        let ranked = self
            .caches
            .extraction
            .cached_call("rerank_collections", &(query, ids), || async {
                let user = prompts::rerank_user(query, hits);
                with_timeout(
                    "collection re-ranking",
                    self.timeout,
                    extract::<RankedCollections>(self.llm.as_ref(), prompts::RERANK, &user),
                )
                .await
            })
            .await?;
        Ok(keep_known(ranked.results, hits))
    }
}

/// Drops ids that were not among the candidates and repeated ids, keeping order.
fn keep_known(ranked: Vec<CollectionCandidate>, hits: &[IndexHit]) -> Vec<CollectionCandidate> {
    let known: HashSet<&str> = hits.iter().map(|h| h.collection_id.as_str()).collect();
    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .filter(|c| {
            let keep = known.contains(c.collection_id.as_str()) && seen.insert(c.collection_id.clone());
            if !keep {
                debug!(collection = %c.collection_id, "dropping re-ranked collection");
            }
            keep
        })
        .collect()
}
