//! End-to-end item search.
//!
//! [`SearchOrchestrator::search`] runs the pipeline for one query:
//!
//! 1. Extract temporal range, location phrase and attribute filter.
//! 2. Resolve collections. Specific queries use the re-ranked candidates;
//!    otherwise the configured defaults that exist in the catalog are used,
//!    and if none exist, every collection in the catalog.
//! 3. Geocode the location phrase. Without a polygon the search stops here
//!    and returns the partial parameters with `items = None`.
//! 4. Build the STAC search parameters and, unless only parameters were
//!    requested, run the search.
//!
//! Each stage logs its elapsed time.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cache::CacheSet;
use crate::catalog::{CatalogClient, StacHttpClient};
use crate::catalog_index::CatalogIndex;
use crate::config::Config;
use crate::embedding;
use crate::extractor::{with_timeout, ExtractionContext, QueryExtractor};
use crate::geocoding::{GeodiniGeocoder, Geocoder};
use crate::http::UPSTREAM_RETRIES;
use crate::llm::{LlmClient, OpenAiClient};
use crate::models::{CollectionCandidate, Geometry, Query, SearchParams, SearchResult};
use crate::resolver::CollectionResolver;
use crate::store::{IndexStore, SqliteIndexStore};
use crate::{Error, Result};

/// Defaults applied to every search.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub default_catalog_url: String,
    pub default_collections: Vec<String>,
    pub max_items: usize,
    pub top_k: usize,
    /// Deadline for each geocoding and catalog call.
    pub timeout: Duration,
}

impl SearchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_catalog_url: config.catalog.default_url.clone(),
            default_collections: config.catalog.default_collections.clone(),
            max_items: config.catalog.max_items,
            top_k: config.catalog.top_k,
            timeout: config.timeouts.request(),
        }
    }
}

pub struct SearchOrchestrator {
    settings: SearchSettings,
    catalog: Arc<dyn CatalogClient>,
    geocoder: Arc<dyn Geocoder>,
    resolver: CollectionResolver,
    extractor: QueryExtractor,
    caches: Arc<CacheSet>,
}

impl SearchOrchestrator {
    pub fn new(
        settings: SearchSettings,
        catalog: Arc<dyn CatalogClient>,
        geocoder: Arc<dyn Geocoder>,
        resolver: CollectionResolver,
        extractor: QueryExtractor,
        caches: Arc<CacheSet>,
    ) -> Self {
        Self {
            settings,
            catalog,
            geocoder,
            resolver,
            extractor,
            caches,
        }
    }

    /// Wires the HTTP collaborators, the SQLite index and the caches from
    /// configuration.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = config.timeouts.request();
        let caches = Arc::new(CacheSet::new(&config.cache));

        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::from_config(&config.llm, timeout)?);
        let embedder = embedding::create_provider(&config.embedding)?;
        let store: Arc<dyn IndexStore> =
            Arc::new(SqliteIndexStore::open(&config.index.path).await?);
        let catalog: Arc<dyn CatalogClient> =
            Arc::new(StacHttpClient::new(timeout, UPSTREAM_RETRIES)?);
        let geocoder: Arc<dyn Geocoder> = Arc::new(GeodiniGeocoder::new(
            &config.geocoding.endpoint,
            timeout,
            UPSTREAM_RETRIES,
        )?);

        let index = Arc::new(
            CatalogIndex::new(catalog.clone(), embedder.clone(), store)
                .with_batch_size(config.embedding.batch_size),
        );
        let resolver = CollectionResolver::new(
            llm.clone(),
            index,
            embedder,
            caches.clone(),
            config.catalog.top_k,
            timeout,
        );
        let extractor = QueryExtractor::with_llm(llm, caches.clone(), timeout);

        Ok(Self::new(
            SearchSettings::from_config(config),
            catalog,
            geocoder,
            resolver,
            extractor,
            caches,
        ))
    }

    pub fn caches(&self) -> &Arc<CacheSet> {
        &self.caches
    }

    pub fn catalog_index(&self) -> &Arc<CatalogIndex> {
        self.resolver.index()
    }

    pub fn default_catalog_url(&self) -> &str {
        &self.settings.default_catalog_url
    }

    /// Ranked collections for `query` in a catalog (default catalog if `None`).
    pub async fn search_collections(
        &self,
        query: &str,
        catalog_url: Option<&str>,
    ) -> Result<Vec<CollectionCandidate>> {
        let query = non_empty(query)?;
        let catalog_url = catalog_url.unwrap_or(&self.settings.default_catalog_url);
        self.resolver
            .search_collections(query, catalog_url, self.settings.top_k)
            .await
    }

    pub async fn search(&self, query: &Query) -> Result<SearchResult> {
        let started = Instant::now();
        let text = non_empty(&query.text)?;
        let catalog_url = query
            .catalog_url
            .as_deref()
            .unwrap_or(&self.settings.default_catalog_url);
        let max_items = match query.limit {
            Some(0) => return Err(Error::InvalidInput("limit must be > 0".to_string())),
            Some(limit) => limit,
            None => self.settings.max_items,
        };

        let extraction = self
            .extractor
            .extract(text, &ExtractionContext::now())
            .await?;
        let extracted_at = Instant::now();

        let (collections, mut explanation) = self.choose_collections(text, catalog_url).await?;
        let mut params = SearchParams {
            collections,
            datetime: extraction.temporal_range.clone(),
            filter: extraction.attribute_filter.clone(),
            intersects: None,
            max_items,
        };
        info!(
            collections = ?params.collections,
            elapsed_ms = extracted_at.elapsed().as_millis() as u64,
            "collections resolved"
        );

        let geocoded_at = Instant::now();
        let polygon = match extraction.location_phrase.as_deref() {
            Some(phrase) => self.geocode(phrase).await?,
            None => None,
        };
        let Some(polygon) = polygon else {
            let missing = match extraction.location_phrase.as_deref() {
                Some(phrase) => format!("No polygon found for {}.", phrase),
                None => "No polygon found: the query names no location.".to_string(),
            };
            warn!(location = ?extraction.location_phrase, "area of interest not resolved");
            explanation.push_str("\n\n");
            explanation.push_str(&missing);
            return Ok(SearchResult {
                items: None,
                search_params: params,
                aoi: None,
                explanation,
            });
        };
        info!(
            elapsed_ms = geocoded_at.elapsed().as_millis() as u64,
            "area of interest resolved"
        );
        params.intersects = Some(polygon.clone());

        if query.return_params_only {
            info!(
                total_ms = started.elapsed().as_millis() as u64,
                "returning search parameters only"
            );
            return Ok(SearchResult {
                items: None,
                search_params: params,
                aoi: Some(polygon),
                explanation,
            });
        }

        let searched_at = Instant::now();
        let items = with_timeout(
            "catalog search",
            self.settings.timeout,
            self.catalog.search_items(catalog_url, &params),
        )
        .await?;
        info!(
            items = items.len(),
            elapsed_ms = searched_at.elapsed().as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            "catalog search complete"
        );

        Ok(SearchResult {
            items: Some(items),
            search_params: params,
            aoi: Some(polygon),
            explanation,
        })
    }

    /// Collection ids to search plus the explanation of how they were chosen.
    async fn choose_collections(
        &self,
        query: &str,
        catalog_url: &str,
    ) -> Result<(Vec<String>, String)> {
        if let Some(candidates) = self
            .resolver
            .resolve_collections(query, catalog_url)
            .await?
            .filter(|c| !c.is_empty())
        {
            let mut explanation = "Considering the following collections:".to_string();
            for candidate in &candidates {
                explanation.push_str(&format!(
                    "\n- {}: {}",
                    candidate.collection_id, candidate.explanation
                ));
            }
            let ids = candidates.into_iter().map(|c| c.collection_id).collect();
            return Ok((ids, explanation));
        }

        let available: Vec<String> = with_timeout(
            "collection listing",
            self.settings.timeout,
            self.catalog.list_collections(catalog_url),
        )
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();

        let defaults: Vec<String> = self
            .settings
            .default_collections
            .iter()
            .filter(|id| available.contains(id))
            .cloned()
            .collect();

        if defaults.is_empty() {
            Ok((
                available,
                "Searching all collections in the catalog.".to_string(),
            ))
        } else {
            let explanation = format!(
                "Including the following common collections in the search: {}",
                defaults.join(", ")
            );
            Ok((defaults, explanation))
        }
    }

    async fn geocode(&self, phrase: &str) -> Result<Option<Geometry>> {
        self.caches
            .geocoding
            .cached_call("geocode", phrase, || {
                with_timeout("geocoding", self.settings.timeout, self.geocoder.geocode(phrase))
            })
            .await
    }
}

fn non_empty(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("query must not be empty".to_string()));
    }
    Ok(trimmed)
}
