//! # STAC Search
//!
//! Natural-language search over STAC geospatial catalogs.
//!
//! A request such as *"cloud-free imagery over Paris in 2017"* is turned into
//! a structured STAC item search: the relevant collections are narrowed down
//! with a per-catalog embedding index and LLM re-ranking, the temporal range,
//! location and attribute filter are extracted from the text, the location is
//! geocoded to a polygon, and the catalog is queried.
//!
//! ## Architecture
//!
//! ```text
//!  query text
//!      │
//!      ▼
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ QueryExtract │   │ CollectionResolve│──▶│ CatalogIndex  │
//! │ loc/time/cql2│   │ frame + rerank   │   │ SQLite + vecs │
//! └──────┬───────┘   └────────┬─────────┘   └───────────────┘
//!        └──────────┬─────────┘
//!                   ▼
//!          ┌─────────────────┐   geocoding   ┌──────────────┐
//!          │ SearchOrchestr. │──────────────▶│ STAC /search │
//!          └─────────────────┘               └──────────────┘
//! ```
//!
//! Every externally-bound call (LLM extraction, re-ranking, geocoding, query
//! embeddings) goes through the single-flight TTL caches in [`cache`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Request and result types |
//! | [`filter`] | CQL2 filter expression tree |
//! | [`cache`] | Canonical cache keys and single-flight TTL caches |
//! | [`embedding`] | Embedding providers |
//! | [`http`] | Shared HTTP client and retry policy |
//! | [`llm`] | Structured extraction over a chat-completion API |
//! | [`catalog`] | STAC API client |
//! | [`geocoding`] | Location phrase → polygon |
//! | [`store`] | Vector index storage backends |
//! | [`catalog_index`] | Per-catalog collection index |
//! | [`resolver`] | Collection resolution |
//! | [`extractor`] | Query extraction |
//! | [`orchestrator`] | End-to-end item search |
//! | [`server`] | HTTP API |

pub mod cache;
pub mod catalog;
pub mod catalog_index;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extractor;
pub mod filter;
pub mod geocoding;
pub mod http;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod resolver;
pub mod server;
pub mod store;

/// Errors produced by the search pipeline.
///
/// Variants carry plain strings so the type is `Clone`: a failure inside a
/// single-flight cache call is shared by every waiter on that key.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty query, malformed request |
/// | `InvalidCatalog` | Catalog unreachable or has no collections |
/// | `IndexNotFound` | Querying a catalog that was never indexed |
/// | `UnsupportedFilter` | Filter uses a disallowed property or operator |
/// | `ExternalService` | LLM, geocoding, embedding or catalog call failed |
/// | `Timeout` | An external call exceeded its deadline |
/// | `Storage` | The vector index store failed |
/// | `Config` | Invalid configuration |
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid catalog {url}: {reason}")]
    InvalidCatalog { url: String, reason: String },

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("{service} call failed: {cause}")]
    ExternalService { service: String, cause: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps a failure of an external collaborator.
    pub fn external(service: &str, cause: impl std::fmt::Display) -> Self {
        Error::ExternalService {
            service: service.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn storage(cause: impl std::fmt::Display) -> Self {
        Error::Storage(cause.to_string())
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
