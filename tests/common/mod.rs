//! In-process fakes for the external collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stac_search::cache::CacheSet;
use stac_search::catalog::{CatalogClient, CollectionInfo};
use stac_search::catalog_index::CatalogIndex;
use stac_search::config::CacheConfig;
use stac_search::embedding::EmbeddingProvider;
use stac_search::extractor::QueryExtractor;
use stac_search::geocoding::Geocoder;
use stac_search::llm::LlmClient;
use stac_search::models::{Geometry, SearchParams};
use stac_search::orchestrator::{SearchOrchestrator, SearchSettings};
use stac_search::prompts;
use stac_search::resolver::CollectionResolver;
use stac_search::store::InMemoryIndexStore;
use stac_search::{Error, Result};

pub const CATALOG_URL: &str = "https://stac.example.com/api/stac/v1";

// ─── LLM ────────────────────────────────────────────────────────────

/// Answers each prompt from per-query tables.
#[derive(Default)]
pub struct FakeLlm {
    /// query → rewritten query; present means the query is specific.
    pub specific: HashMap<String, String>,
    /// Collection ids the re-ranker keeps, in candidate order.
    pub relevant: Vec<String>,
    pub locations: HashMap<String, String>,
    pub datetimes: HashMap<String, String>,
    pub filters: HashMap<String, Value>,
    /// System prompt that never gets an answer.
    pub stall_on: Option<&'static str>,
    /// System prompt that fails while set.
    pub fail_on: Mutex<Option<&'static str>>,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn specific(mut self, query: &str, framed: &str) -> Self {
        self.specific.insert(query.to_string(), framed.to_string());
        self
    }

    pub fn relevant(mut self, ids: &[&str]) -> Self {
        self.relevant = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn location(mut self, query: &str, place: &str) -> Self {
        self.locations.insert(query.to_string(), place.to_string());
        self
    }

    pub fn datetime(mut self, query: &str, range: &str) -> Self {
        self.datetimes.insert(query.to_string(), range.to_string());
        self
    }

    pub fn filter(mut self, query: &str, filter: Value) -> Self {
        self.filters.insert(query.to_string(), filter);
        self
    }

    pub fn stall_on(mut self, system: &'static str) -> Self {
        self.stall_on = Some(system);
        self
    }

    pub fn fail_on(self, system: &'static str) -> Self {
        *self.fail_on.lock().unwrap() = Some(system);
        self
    }

    pub fn recover(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn rerank(&self, user: &str) -> Value {
        let results: Vec<Value> = user
            .lines()
            .filter_map(|line| line.strip_prefix("Collection ID: "))
            .filter(|id| self.relevant.iter().any(|r| r == id))
            .map(|id| json!({"collection_id": id, "explanation": format!("{} matches the request", id)}))
            .collect();
        json!({ "results": results })
    }
}

#[async_trait]
impl LlmClient for FakeLlm {
    fn model(&self) -> &str {
        "fake-llm"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_on == Some(system) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if *self.fail_on.lock().unwrap() == Some(system) {
            return Err(Error::external("llm", "HTTP 503: service unavailable"));
        }
        let reply = if system == prompts::FRAMING {
            match self.specific.get(user) {
                Some(framed) => json!({"query": framed, "is_specific": true}),
                None => json!({"query": user, "is_specific": false}),
            }
        } else if system == prompts::RERANK {
            self.rerank(user)
        } else if system == prompts::LOCATION {
            json!({"location": self.locations.get(user).cloned().unwrap_or_default()})
        } else if system == prompts::FILTER {
            json!({"filter": self.filters.get(user).cloned().unwrap_or(Value::Null)})
        } else if system.starts_with(prompts::TEMPORAL) {
            json!({"datetime": self.datetimes.get(user)})
        } else {
            panic!("unexpected system prompt: {}", system);
        };
        Ok(reply.to_string())
    }
}

// ─── Catalog ────────────────────────────────────────────────────────

pub struct FakeCatalog {
    pub collections: Vec<CollectionInfo>,
    pub items: Vec<Value>,
    pub search_calls: AtomicUsize,
    pub last_params: Mutex<Option<SearchParams>>,
}

impl FakeCatalog {
    pub fn new(collections: &[(&str, &str, &str)]) -> Self {
        let collections = collections
            .iter()
            .map(|(id, title, description)| CollectionInfo {
                id: id.to_string(),
                title: Some(title.to_string()),
                description: Some(description.to_string()),
            })
            .collect();
        let items = (0..3)
            .map(|i| json!({"type": "Feature", "id": format!("item-{}", i)}))
            .collect();
        Self {
            collections,
            items,
            search_calls: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    /// A small Planetary Computer-like catalog.
    pub fn planetary() -> Self {
        Self::new(&[
            ("naip", "NAIP: National Agriculture Imagery Program", "High-resolution aerial imagery of the continental United States"),
            ("sentinel-2-l2a", "Sentinel-2 Level-2A", "Global multispectral imagery at 10m resolution"),
            ("landsat-8-c2-l2", "Landsat 8 Collection 2 Level-2", "Global surface reflectance from Landsat 8"),
            ("cop-dem-glo-30", "Copernicus DEM GLO-30", "Global digital elevation model at 30m"),
        ])
    }

    pub fn search_count(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<SearchParams> {
        self.last_params.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn open(&self, _catalog_url: &str) -> Result<()> {
        Ok(())
    }

    async fn list_collections(&self, _catalog_url: &str) -> Result<Vec<CollectionInfo>> {
        Ok(self.collections.clone())
    }

    async fn search_items(&self, _catalog_url: &str, params: &SearchParams) -> Result<Vec<Value>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = Some(params.clone());
        Ok(self.items.iter().take(params.max_items).cloned().collect())
    }
}

// ─── Geocoder ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeGeocoder {
    pub places: HashMap<String, Geometry>,
    /// Fails every call while set.
    pub down: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn with_place(mut self, phrase: &str, geometry: Geometry) -> Self {
        self.places.insert(phrase.to_string(), geometry);
        self
    }

    pub fn down(self) -> Self {
        self.down.store(true, Ordering::SeqCst);
        self
    }

    pub fn recover(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn geocode(&self, phrase: &str) -> Result<Option<Geometry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::external("geocoding", "connection refused"));
        }
        Ok(self.places.get(phrase).cloned())
    }
}

pub fn washington() -> Geometry {
    Geometry {
        kind: "Polygon".to_string(),
        coordinates: json!([[[-124.8, 45.5], [-116.9, 45.5], [-116.9, 49.0], [-124.8, 49.0], [-124.8, 45.5]]]),
    }
}

// ─── Embeddings ─────────────────────────────────────────────────────

/// Bag-of-words vectors: each lowercased word bumps one of 64 buckets.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

const DIMS: usize = 64;

fn bucket(word: &str) -> usize {
    word.bytes()
        .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
        % DIMS
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    v[bucket(&word.to_lowercase())] += 1.0;
                }
                v
            })
            .collect())
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────

pub struct Harness {
    pub llm: Arc<FakeLlm>,
    pub catalog: Arc<FakeCatalog>,
    pub geocoder: Arc<FakeGeocoder>,
    pub orchestrator: SearchOrchestrator,
}

pub fn settings(timeout: Duration) -> SearchSettings {
    SearchSettings {
        default_catalog_url: CATALOG_URL.to_string(),
        default_collections: vec!["landsat-8-c2-l2".to_string(), "sentinel-2-l2a".to_string()],
        max_items: 20,
        top_k: 5,
        timeout,
    }
}

pub fn harness(llm: FakeLlm, catalog: FakeCatalog, geocoder: FakeGeocoder) -> Harness {
    harness_with_timeout(llm, catalog, geocoder, Duration::from_secs(5))
}

/// Like [`harness`], with `timeout` bounding every collaborator call.
pub fn harness_with_timeout(
    llm: FakeLlm,
    catalog: FakeCatalog,
    geocoder: FakeGeocoder,
    timeout: Duration,
) -> Harness {
    let llm = Arc::new(llm);
    let catalog = Arc::new(catalog);
    let geocoder = Arc::new(geocoder);
    let caches = Arc::new(CacheSet::new(&CacheConfig::default()));
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::default());

    let index = Arc::new(CatalogIndex::new(
        catalog.clone(),
        embedder.clone(),
        Arc::new(InMemoryIndexStore::new()),
    ));
    let resolver =
        CollectionResolver::new(llm.clone(), index, embedder, caches.clone(), 5, timeout);
    let extractor = QueryExtractor::with_llm(llm.clone(), caches.clone(), timeout);

    let orchestrator = SearchOrchestrator::new(
        settings(timeout),
        catalog.clone(),
        geocoder.clone(),
        resolver,
        extractor,
        caches,
    );

    Harness {
        llm,
        catalog,
        geocoder,
        orchestrator,
    }
}
