use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::GeocodeError;
use crate::location::{GeocodeCandidate, Geocoder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenStreetMap Nominatim search (`/search?format=json&q=...`).
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    /// Nominatim's usage policy requires an identifying user agent.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn search(&self, query: &str) -> Result<Vec<GeocodeCandidate>, GeocodeError> {
        let url = format!("{}/search", self.base_url);
        debug!(url = %url, query, "geocoding");

        let resp = self
            .client
            .get(&url)
            .query(&[("format", "json"), ("q", query), ("limit", "1")])
            .send()
            .await?
            .error_for_status()?;

        let body = resp.text().await?;
        parse_candidates(&body)
    }
}

fn parse_candidates(body: &str) -> Result<Vec<GeocodeCandidate>, GeocodeError> {
    serde_json::from_str(body).map_err(|e| GeocodeError::Malformed(e.to_string()))
}
