//! STAC API client.
//!
//! [`CatalogClient`] is the capability the pipeline needs from a catalog:
//! confirm it is a STAC API, list its collections, and run an item search.
//! [`StacHttpClient`] implements it over the STAC API HTTP endpoints:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | open | `GET {catalog}` (landing page) |
//! | list collections | `GET {catalog}/collections`, following `rel="next"` links |
//! | search items | `POST {catalog}/search`, following `rel="next"` links |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use crate::http::{build_client, send_json_with_retry};
use crate::models::SearchParams;
use crate::{Error, Result};

/// Largest page requested from `/search`.
const MAX_PAGE_SIZE: usize = 100;

/// Collection metadata used for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CollectionInfo {
    /// `"<title> <description>"`, the text embedded for the index.
    pub fn summary(&self) -> String {
        format!(
            "{} {}",
            self.title.as_deref().unwrap_or_default(),
            self.description.as_deref().unwrap_or_default()
        )
    }
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fails with [`Error::InvalidCatalog`] unless `catalog_url` serves a
    /// STAC landing page.
    async fn open(&self, catalog_url: &str) -> Result<()>;

    async fn list_collections(&self, catalog_url: &str) -> Result<Vec<CollectionInfo>>;

    /// Runs an item search and returns up to `params.max_items` items.
    async fn search_items(&self, catalog_url: &str, params: &SearchParams) -> Result<Vec<Value>>;
}

pub struct StacHttpClient {
    client: reqwest::Client,
    max_retries: u32,
    max_pages: usize,
}

impl StacHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            max_retries,
            max_pages: 50,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        send_json_with_retry("stac catalog", self.max_retries, || self.client.get(url)).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        send_json_with_retry("stac catalog", self.max_retries, || {
            self.client.post(url).json(body)
        })
        .await
    }
}

fn endpoint(catalog_url: &str, path: &str) -> String {
    format!("{}/{}", catalog_url.trim_end_matches('/'), path)
}

fn invalid(url: &str, reason: impl std::fmt::Display) -> Error {
    Error::InvalidCatalog {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl CatalogClient for StacHttpClient {
    async fn open(&self, catalog_url: &str) -> Result<()> {
        let parsed = url::Url::parse(catalog_url).map_err(|e| invalid(catalog_url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(catalog_url, "URL must use http or https"));
        }

        let landing = self
            .get_json(catalog_url)
            .await
            .map_err(|e| invalid(catalog_url, e))?;
        if landing.get("links").and_then(Value::as_array).is_none() {
            return Err(invalid(catalog_url, "landing page has no links; not a STAC API"));
        }
        debug!(catalog = catalog_url, "opened STAC catalog");
        Ok(())
    }

    async fn list_collections(&self, catalog_url: &str) -> Result<Vec<CollectionInfo>> {
        let mut collections = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(endpoint(catalog_url, "collections"));

        while let Some(url) = next.take() {
            if seen.len() >= self.max_pages || !seen.insert(url.clone()) {
                break;
            }
            let page = self.get_json(&url).await?;
            let batch = page
                .get("collections")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::external("stac catalog", "response has no collections array"))?;
            for raw in batch {
                match serde_json::from_value::<CollectionInfo>(raw.clone()) {
                    Ok(info) => collections.push(info),
                    Err(e) => debug!(error = %e, "skipping malformed collection"),
                }
            }
            next = next_link(&page).map(|link| link.href);
        }

        info!(catalog = catalog_url, count = collections.len(), "listed collections");
        Ok(collections)
    }

    async fn search_items(&self, catalog_url: &str, params: &SearchParams) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut body = search_body(params);
        let mut url = endpoint(catalog_url, "search");
        let mut method_post = true;

        for _ in 0..self.max_pages {
            let page = if method_post {
                self.post_json(&url, &body).await?
            } else {
                self.get_json(&url).await?
            };

            let features = page
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::external("stac catalog", "search response has no features"))?;
            if features.is_empty() {
                break;
            }
            items.extend(features.iter().cloned());
            if items.len() >= params.max_items {
                break;
            }

            let Some(link) = next_link(&page) else { break };
            url = link.href;
            method_post = link.method.eq_ignore_ascii_case("POST");
            if let Some(Value::Object(next_body)) = link.body {
                if link.merge {
                    if let Value::Object(current) = &mut body {
                        current.extend(next_body);
                    }
                } else {
                    body = Value::Object(next_body);
                }
            }
        }

        items.truncate(params.max_items);
        Ok(items)
    }
}

/// Request body for `POST /search`.
pub fn search_body(params: &SearchParams) -> Value {
    let mut body = Map::new();
    body.insert("collections".to_string(), json!(params.collections));
    body.insert(
        "limit".to_string(),
        json!(params.max_items.clamp(1, MAX_PAGE_SIZE)),
    );
    if let Some(datetime) = &params.datetime {
        body.insert("datetime".to_string(), json!(datetime));
    }
    if let Some(filter) = &params.filter {
        body.insert("filter".to_string(), filter.to_cql2());
        body.insert("filter-lang".to_string(), json!("cql2-json"));
    }
    if let Some(geometry) = &params.intersects {
        body.insert("intersects".to_string(), json!(geometry));
    }
    Value::Object(body)
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    merge: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn next_link(page: &Value) -> Option<Link> {
    page.get("links")?
        .as_array()?
        .iter()
        .filter_map(|raw| serde_json::from_value::<Link>(raw.clone()).ok())
        .find(|link| link.rel == "next")
}
