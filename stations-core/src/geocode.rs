//! Address lookup for station registration.
//! Uses the Mapbox geocoding API (`mapbox.places`).

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::model::Coordinates;

const MAPBOX_PLACES_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places";
const PLACE_TYPES: &str = "address,place";

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("Geocoding service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Geocoding service returned status {code}")]
    UpstreamStatus { code: u16 },
    #[error("Malformed geocoding response: {0}")]
    Malformed(String),
    #[error("No results found for '{0}'")]
    NoResults(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub coordinates: Coordinates,
    pub formatted_address: String,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    place_name: String,
    /// `[longitude, latitude]`
    center: [f64; 2],
}

#[derive(Debug, Clone)]
pub struct MapboxGeocoder {
    access_token: String,
    http: Client,
    base_url: String,
}

impl MapboxGeocoder {
    pub fn new(access_token: String, timeout: Duration) -> Result<Self, GeocodeError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            access_token,
            http,
            base_url: MAPBOX_PLACES_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Resolve a free-form address to the best matching place.
    pub async fn geocode(&self, address: &str) -> Result<GeocodeResult, GeocodeError> {
        let feature = self
            .first_feature(&urlencoding::encode(address))
            .await?
            .ok_or_else(|| GeocodeError::NoResults(address.to_string()))?;

        Ok(GeocodeResult {
            coordinates: Coordinates::new(feature.center[1], feature.center[0]),
            formatted_address: feature.place_name,
        })
    }

    /// Name the place at `coords`.
    pub async fn reverse_geocode(&self, coords: Coordinates) -> Result<String, GeocodeError> {
        let query = format!("{},{}", coords.longitude, coords.latitude);

        self.first_feature(&query)
            .await?
            .map(|feature| feature.place_name)
            .ok_or(GeocodeError::NoResults(query))
    }

    async fn first_feature(&self, query: &str) -> Result<Option<Feature>, GeocodeError> {
        let url = format!("{}/{}.json", self.base_url, query);

        let res = self
            .http
            .get(&url)
            .query(&[
                ("access_token", self.access_token.as_str()),
                ("limit", "1"),
                ("types", PLACE_TYPES),
            ])
            .send()
            .await?;

        let status = res.status();
        if status != StatusCode::OK {
            tracing::debug!("Geocoding returned status {}", status);
            return Err(GeocodeError::UpstreamStatus {
                code: status.as_u16(),
            });
        }

        let body = res.text().await?;
        let parsed: FeatureCollection =
            serde_json::from_str(&body).map_err(|e| GeocodeError::Malformed(e.to_string()))?;

        Ok(parsed.features.into_iter().next())
    }
}
