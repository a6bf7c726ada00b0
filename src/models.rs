//! Data models flowing through the search pipeline.
//!
//! A [`Query`] enters, the extractor produces an [`ExtractionResult`], the
//! resolver produces [`CollectionCandidate`]s and the orchestrator returns a
//! [`SearchResult`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::FilterNode;

/// A natural-language search request.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    /// Catalog to search. `None` means the configured default catalog.
    pub catalog_url: Option<String>,
    /// Maximum number of items to return. `None` means the configured default.
    pub limit: Option<usize>,
    /// Build the search parameters without executing the search.
    pub return_params_only: bool,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            catalog_url: None,
            limit: None,
            return_params_only: false,
        }
    }

    pub fn with_catalog(mut self, url: impl Into<String>) -> Self {
        self.catalog_url = Some(url.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn params_only(mut self) -> Self {
        self.return_params_only = true;
        self
    }
}

/// Structured facets derived from the query text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// `start/end` interval, with `..` for an open bound.
    pub temporal_range: Option<String>,
    pub location_phrase: Option<String>,
    pub attribute_filter: Option<FilterNode>,
}

/// A collection judged relevant to a query, most relevant first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCandidate {
    pub collection_id: String,
    pub explanation: String,
}

/// GeoJSON geometry, typically the Polygon or MultiPolygon of an area of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Value,
}

impl Geometry {
    pub fn is_areal(&self) -> bool {
        matches!(self.kind.as_str(), "Polygon" | "MultiPolygon")
    }
}

/// Parameters of a STAC item search as sent to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub collections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intersects: Option<Geometry>,
    pub max_items: usize,
}

/// Outcome of an item search.
///
/// `items` is `None` when no search was executed (unresolved area of interest
/// or parameters-only request) and `Some(vec![])` when the search ran and
/// matched nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub items: Option<Vec<Value>>,
    pub search_params: SearchParams,
    pub aoi: Option<Geometry>,
    pub explanation: String,
}
