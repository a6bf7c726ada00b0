//! Query extraction.
//!
//! [`QueryExtractor`] derives the item-level facets of a query with three
//! independent sub-extractors, run concurrently:
//!
//! | Trait | Produces | LLM implementation |
//! |-------|----------|--------------------|
//! | [`LocationExtractor`] | geocodable place phrase | [`LlmLocationExtractor`] |
//! | [`TemporalExtractor`] | `start/end` interval | [`LlmTemporalExtractor`] |
//! | [`FilterExtractor`] | validated [`FilterNode`] | [`LlmFilterExtractor`] |
//!
//! The LLM implementations cache their results by input text (the temporal
//! one also by the current date, since "last year" moves). Model output is
//! validated before it is trusted: malformed intervals and filters on
//! unsupported properties become "none" rather than reaching the catalog.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cache::CacheSet;
use crate::filter::FilterNode;
use crate::llm::{extract, LlmClient};
use crate::models::ExtractionResult;
use crate::prompts;
use crate::{Error, Result};

/// Per-request context for extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionContext {
    pub today: NaiveDate,
}

impl ExtractionContext {
    pub fn now() -> Self {
        Self {
            today: chrono::Utc::now().date_naive(),
        }
    }
}

#[async_trait]
pub trait LocationExtractor: Send + Sync {
    async fn extract_location(&self, text: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait TemporalExtractor: Send + Sync {
    async fn extract_temporal_range(&self, text: &str, today: NaiveDate)
        -> Result<Option<String>>;
}

#[async_trait]
pub trait FilterExtractor: Send + Sync {
    async fn extract_filter(&self, text: &str) -> Result<Option<FilterNode>>;
}

// ============ Orchestration ============

pub struct QueryExtractor {
    location: Arc<dyn LocationExtractor>,
    temporal: Arc<dyn TemporalExtractor>,
    filter: Arc<dyn FilterExtractor>,
    timeout: Duration,
}

impl QueryExtractor {
    pub fn new(
        location: Arc<dyn LocationExtractor>,
        temporal: Arc<dyn TemporalExtractor>,
        filter: Arc<dyn FilterExtractor>,
        timeout: Duration,
    ) -> Self {
        Self {
            location,
            temporal,
            filter,
            timeout,
        }
    }

    /// LLM-backed sub-extractors sharing one client and cache set.
    pub fn with_llm(llm: Arc<dyn LlmClient>, caches: Arc<CacheSet>, timeout: Duration) -> Self {
        Self::new(
            Arc::new(LlmLocationExtractor::new(llm.clone(), caches.clone())),
            Arc::new(LlmTemporalExtractor::new(llm.clone(), caches.clone())),
            Arc::new(LlmFilterExtractor::new(llm, caches)),
            timeout,
        )
    }

    pub async fn extract(&self, query: &str, ctx: &ExtractionContext) -> Result<ExtractionResult> {
        let started = Instant::now();

        let (location_phrase, temporal_range, attribute_filter) = tokio::try_join!(
            with_timeout(
                "location extraction",
                self.timeout,
                self.location.extract_location(query)
            ),
            with_timeout(
                "temporal extraction",
                self.timeout,
                self.temporal.extract_temporal_range(query, ctx.today)
            ),
            with_timeout(
                "filter extraction",
                self.timeout,
                self.filter.extract_filter(query)
            ),
        )?;

        let result = ExtractionResult {
            temporal_range,
            location_phrase: location_phrase
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            attribute_filter,
        };
        info!(
            location = ?result.location_phrase,
            datetime = ?result.temporal_range,
            has_filter = result.attribute_filter.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query extracted"
        );
        Ok(result)
    }
}

pub(crate) async fn with_timeout<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        })?
}

// ============ Temporal validation ============

/// Validates a model-produced interval.
///
/// Each bound must be `..`, a `YYYY-MM-DD` date or an RFC 3339 timestamp.
/// Returns `None` for `../..`, unparseable input, or a start after the end.
/// A single date is accepted as a one-day instant.
pub fn normalize_temporal_range(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (start, end) = match raw.split_once('/') {
        Some((start, end)) => (start.trim(), end.trim()),
        None => {
            parse_bound(raw)?;
            return Some(raw.to_string());
        }
    };

    if start == ".." && end == ".." {
        return None;
    }
    let start_key = if start == ".." { None } else { Some(parse_bound(start)?) };
    let end_key = if end == ".." { None } else { Some(parse_bound(end)?) };

    if let (Some(s), Some(e)) = (start_key, end_key) {
        if s > e {
            return None;
        }
    }
    Some(format!("{}/{}", start, end))
}

/// Parses a bound into a comparable UTC timestamp (seconds).
fn parse_bound(bound: &str) -> Option<i64> {
    if let Ok(date) = NaiveDate::parse_from_str(bound, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }
    DateTime::parse_from_rfc3339(bound)
        .ok()
        .map(|dt| dt.timestamp())
}

// ============ LLM implementations ============

#[derive(Debug, Deserialize)]
struct LocationReply {
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemporalReply {
    #[serde(default)]
    datetime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilterReply {
    #[serde(default)]
    filter: Option<serde_json::Value>,
}

pub struct LlmLocationExtractor {
    llm: Arc<dyn LlmClient>,
    caches: Arc<CacheSet>,
}

impl LlmLocationExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, caches: Arc<CacheSet>) -> Self {
        Self { llm, caches }
    }
}

#[async_trait]
impl LocationExtractor for LlmLocationExtractor {
    async fn extract_location(&self, text: &str) -> Result<Option<String>> {
        // Kept alongside geocoding results, with the same TTL.
        self.caches
            .geocoding
            .cached_call("extract_location", text, || async {
                let reply: LocationReply =
                    extract(self.llm.as_ref(), prompts::LOCATION, text).await?;
                Ok(reply
                    .location
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()))
            })
            .await
    }
}

pub struct LlmTemporalExtractor {
    llm: Arc<dyn LlmClient>,
    caches: Arc<CacheSet>,
}

impl LlmTemporalExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, caches: Arc<CacheSet>) -> Self {
        Self { llm, caches }
    }
}

#[async_trait]
impl TemporalExtractor for LlmTemporalExtractor {
    async fn extract_temporal_range(
        &self,
        text: &str,
        today: NaiveDate,
    ) -> Result<Option<String>> {
        let day = today.format("%Y-%m-%d").to_string();
        self.caches
            .extraction
            .cached_call("extract_temporal_range", &(text, day.as_str()), || async {
                let system = prompts::temporal_system(today);
                let reply: TemporalReply = extract(self.llm.as_ref(), &system, text).await?;
                let Some(raw) = reply.datetime else {
                    return Ok(None);
                };
                let normalized = normalize_temporal_range(&raw);
                if normalized.is_none() {
                    warn!(datetime = %raw, "discarding invalid temporal range");
                }
                Ok(normalized)
            })
            .await
    }
}

pub struct LlmFilterExtractor {
    llm: Arc<dyn LlmClient>,
    caches: Arc<CacheSet>,
}

impl LlmFilterExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, caches: Arc<CacheSet>) -> Self {
        Self { llm, caches }
    }
}

#[async_trait]
impl FilterExtractor for LlmFilterExtractor {
    async fn extract_filter(&self, text: &str) -> Result<Option<FilterNode>> {
        self.caches
            .extraction
            .cached_call("extract_filter", text, || async {
                let reply: FilterReply = extract(self.llm.as_ref(), prompts::FILTER, text).await?;
                Ok(validate_filter(reply.filter))
            })
            .await
    }
}

/// Parses a model-produced CQL2 expression, discarding it if unsupported.
pub fn validate_filter(raw: Option<serde_json::Value>) -> Option<FilterNode> {
    let raw = raw.filter(|v| !v.is_null())?;
    match FilterNode::from_cql2(&raw) {
        Ok(node) => Some(node),
        Err(e) => {
            warn!(filter = %raw, error = %e, "discarding unsupported filter");
            None
        }
    }
}
