//! Configuration loading and validation.
//!
//! Configuration is read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a working setup pointed at the
//! Planetary Computer catalog. A handful of environment variables override the
//! file after it is parsed:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `STAC_CATALOG_URL` | `catalog.default_url` |
//! | `DEFAULT_TARGET_COLLECTIONS` | `catalog.default_collections` (JSON array) |
//! | `GEODINI_API` | `geocoding.endpoint` |
//! | `SMALL_MODEL_NAME` | `llm.model` |
//! | `LLM_BASE_URL` | `llm.base_url` |
//! | `DATA_PATH` | `index.path` |
//! | `STAC_SEARCH_BIND` | `server.bind` |
//!
//! # Example
//!
//! ```toml
//! [catalog]
//! default_url = "https://planetarycomputer.microsoft.com/api/stac/v1"
//! default_collections = ["landsat-8-c2-l2", "sentinel-2-l2a"]
//! max_items = 20
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [cache]
//! extraction_ttl_secs = 3600
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

// ============ Catalog ============

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub default_url: String,
    /// Collections searched when the query does not point at specific ones.
    #[serde(default = "default_collections")]
    pub default_collections: Vec<String>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Number of re-ranked collections sought per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_url: default_catalog_url(),
            default_collections: default_collections(),
            max_items: default_max_items(),
            top_k: default_top_k(),
        }
    }
}

fn default_catalog_url() -> String {
    "https://planetarycomputer.microsoft.com/api/stac/v1".to_string()
}
fn default_collections() -> Vec<String> {
    vec!["landsat-8-c2-l2".to_string(), "sentinel-2-l2a".to_string()]
}
fn default_max_items() -> usize {
    20
}
fn default_top_k() -> usize {
    5
}

// ============ Geocoding ============

#[derive(Debug, Deserialize, Clone)]
pub struct GeocodingConfig {
    #[serde(default = "default_geocoding_endpoint")]
    pub endpoint: String,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_geocoding_endpoint(),
        }
    }
}

fn default_geocoding_endpoint() -> String {
    "https://geodini.k8s.labs.ds.io".to_string()
}

// ============ LLM ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Chat model id. A `provider:` prefix such as `openai:` is accepted and stripped.
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            max_retries: default_max_retries(),
        }
    }
}

fn default_llm_model() -> String {
    "openai:gpt-4.1-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// One of `openai`, `ollama` or `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL for HTTP providers. Defaults per provider when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    30
}

// ============ Cache ============

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_day_secs")]
    pub geocoding_ttl_secs: u64,
    #[serde(default = "default_day_secs")]
    pub embedding_ttl_secs: u64,
    #[serde(default = "default_hour_secs")]
    pub extraction_ttl_secs: u64,
    /// Capacity of each cache instance.
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            geocoding_ttl_secs: default_day_secs(),
            embedding_ttl_secs: default_day_secs(),
            extraction_ttl_secs: default_hour_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_day_secs() -> u64 {
    24 * 60 * 60
}
fn default_hour_secs() -> u64 {
    60 * 60
}
fn default_max_entries() -> u64 {
    1000
}

// ============ Index / Server / Timeouts ============

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// SQLite file holding the per-catalog collection vectors.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("data/index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Deadline for each external call (LLM, geocoding, catalog).
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: default_request_secs(),
        }
    }
}

fn default_request_secs() -> u64 {
    60
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

// ============ Loading ============

/// Reads, parses and validates a config file, then applies environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Built-in defaults plus environment overrides, for running without a file.
pub fn default_config() -> Result<Config> {
    let mut config = Config::default();
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("STAC_CATALOG_URL") {
            self.catalog.default_url = url;
        }
        if let Some(raw) = lookup("DEFAULT_TARGET_COLLECTIONS") {
            self.catalog.default_collections = serde_json::from_str(&raw)
                .with_context(|| "DEFAULT_TARGET_COLLECTIONS must be a JSON array of strings")?;
        }
        if let Some(endpoint) = lookup("GEODINI_API") {
            self.geocoding.endpoint = endpoint;
        }
        if let Some(model) = lookup("SMALL_MODEL_NAME") {
            self.llm.model = model;
        }
        if let Some(base_url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(path) = lookup("DATA_PATH") {
            self.index.path = PathBuf::from(path);
        }
        if let Some(bind) = lookup("STAC_SEARCH_BIND") {
            self.server.bind = bind;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.catalog.default_url)
            .with_context(|| format!("catalog.default_url is not a URL: {}", self.catalog.default_url))?;

        if self.catalog.max_items == 0 {
            anyhow::bail!("catalog.max_items must be > 0");
        }
        if self.catalog.top_k == 0 {
            anyhow::bail!("catalog.top_k must be > 0");
        }

        match self.embedding.provider.as_str() {
            "openai" | "ollama" | "local" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }

        if self.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be > 0");
        }
        if self.timeouts.request_secs == 0 {
            anyhow::bail!("timeouts.request_secs must be > 0");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(
            config.catalog.default_url,
            "https://planetarycomputer.microsoft.com/api/stac/v1"
        );
        assert_eq!(
            config.catalog.default_collections,
            vec!["landsat-8-c2-l2", "sentinel-2-l2a"]
        );
        assert_eq!(config.catalog.max_items, 20);
        assert_eq!(config.catalog.top_k, 5);
        assert_eq!(config.cache.geocoding_ttl_secs, 86_400);
        assert_eq!(config.cache.extraction_ttl_secs, 3_600);
        assert_eq!(config.timeouts.request_secs, 60);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [catalog]
            max_items = 50

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 768
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog.max_items, 50);
        assert_eq!(config.catalog.top_k, 5);
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.batch_size, 64);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STAC_CATALOG_URL", "https://earth-search.aws.element84.com/v1"),
            ("DEFAULT_TARGET_COLLECTIONS", r#"["naip"]"#),
            ("DATA_PATH", "/tmp/stac-index.sqlite"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(
            config.catalog.default_url,
            "https://earth-search.aws.element84.com/v1"
        );
        assert_eq!(config.catalog.default_collections, vec!["naip"]);
        assert_eq!(config.index.path, PathBuf::from("/tmp/stac-index.sqlite"));
        assert_eq!(config.geocoding.endpoint, "https://geodini.k8s.labs.ds.io");
    }

    #[test]
    fn test_bad_collections_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "DEFAULT_TARGET_COLLECTIONS").then(|| "naip".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DEFAULT_TARGET_COLLECTIONS"));
    }

    #[test]
    fn test_validation_rejects_unknown_provider() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let config: Config = toml::from_str("[catalog]\nmax_items = 0").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[timeouts]\nrequest_secs = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stac-search.toml");
        std::fs::write(&path, "[server]\nbind = \"0.0.0.0:9000\"\n").unwrap();
        let config = load_config(&path).unwrap();
        // STAC_SEARCH_BIND may be set in the environment running the tests.
        if std::env::var("STAC_SEARCH_BIND").is_err() {
            assert_eq!(config.server.bind, "0.0.0.0:9000");
        }
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config =
            toml::from_str(include_str!("../config/stac-search.example.toml")).unwrap();
        config.validate().unwrap();
        let defaults = Config::default();
        assert_eq!(config.catalog.default_url, defaults.catalog.default_url);
        assert_eq!(config.embedding.dims, defaults.embedding.dims);
        assert_eq!(config.index.path, defaults.index.path);
    }
}
