//! Location phrase → area-of-interest polygon.
//!
//! [`GeodiniGeocoder`] queries a geodini service:
//! `GET {endpoint}/search_complex?query=<phrase>` → `{"result": {"geometry": …}}`.
//! Only Polygon and MultiPolygon geometries are accepted as areas of interest.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::http::{build_client, send_json_with_retry};
use crate::models::Geometry;
use crate::{Error, Result};

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Returns the polygon for `phrase`, or `None` if the place is unknown.
    async fn geocode(&self, phrase: &str) -> Result<Option<Geometry>>;
}

pub struct GeodiniGeocoder {
    endpoint: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl GeodiniGeocoder {
    pub fn new(endpoint: &str, timeout: Duration, max_retries: u32) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
            max_retries,
        })
    }
}

#[async_trait]
impl Geocoder for GeodiniGeocoder {
    async fn geocode(&self, phrase: &str) -> Result<Option<Geometry>> {
        let url = format!("{}/search_complex", self.endpoint);
        let json = send_json_with_retry("geocoding", self.max_retries, || {
            self.client.get(&url).query(&[("query", phrase)])
        })
        .await?;
        parse_geodini_response(phrase, &json)
    }
}

fn parse_geodini_response(phrase: &str, json: &Value) -> Result<Option<Geometry>> {
    let Some(geometry) = json
        .get("result")
        .filter(|r| !r.is_null())
        .and_then(|r| r.get("geometry"))
        .filter(|g| !g.is_null())
    else {
        debug!(location = phrase, "geocoder returned no result");
        return Ok(None);
    };

    let geometry: Geometry = serde_json::from_value(geometry.clone())
        .map_err(|e| Error::external("geocoding", format!("malformed geometry: {}", e)))?;

    if !geometry.is_areal() {
        warn!(location = phrase, kind = %geometry.kind, "geocoder returned a non-polygon geometry");
        return Ok(None);
    }
    Ok(Some(geometry))
}
