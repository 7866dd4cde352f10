//! Position source backed by an HTTP geolocation endpoint.
//!
//! Used where there is no device GPS (e.g. the server resolving a coarse
//! position for a request without coordinates). The endpoint must answer
//! with a JSON object carrying either `latitude`/`longitude` or
//! `lat`/`lon` numbers, which covers the common IP-geolocation services.

use async_trait::async_trait;
use protest_map_hazard_models::Position;

use crate::{GeolocationError, LocationSource, PositionOptions};

/// A [`LocationSource`] that asks an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    /// Creates a source querying `url`.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Reads the endpoint from `GEOLOCATION_URL`, if set.
    #[must_use]
    pub fn from_env(client: reqwest::Client) -> Option<Self> {
        let url = std::env::var("GEOLOCATION_URL").ok()?;
        if url.is_empty() {
            return None;
        }
        Some(Self::new(client, url))
    }
}

#[async_trait]
impl LocationSource for HttpSource {
    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<Position, GeolocationError> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(options.timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(GeolocationError::Unavailable {
                message: format!("geolocation endpoint returned status {}", resp.status()),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        parse_response(&body)
    }
}

/// Extracts a position from a geolocation response body.
fn parse_response(body: &serde_json::Value) -> Result<Position, GeolocationError> {
    let field = |names: [&str; 2]| {
        names
            .iter()
            .find_map(|name| body.get(*name).and_then(serde_json::Value::as_f64))
    };

    let lat = field(["latitude", "lat"]).ok_or_else(|| GeolocationError::Unavailable {
        message: "response missing latitude".to_string(),
    })?;
    let lng = field(["longitude", "lon"]).ok_or_else(|| GeolocationError::Unavailable {
        message: "response missing longitude".to_string(),
    })?;

    Ok(Position::new(lat, lng))
}
