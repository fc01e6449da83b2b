use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::model::{Conditions, Coordinates, Reading};

use super::{ProviderError, UnitSystem, WeatherProvider};

const ONE_CALL_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

/// Only the "current" block is wanted.
const EXCLUDE: &str = "minutely,hourly,daily,alerts";

/// OpenWeather One Call client. Stateless apart from the credential.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    http: Client,
    base_url: String,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            api_key,
            http,
            base_url: ONE_CALL_URL.to_string(),
        })
    }

    /// Point the client at another endpoint (mock servers, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Check the credential with a request at (0, 0).
    ///
    /// `Ok(false)` means upstream rejected the key with 401; any other
    /// failure is returned as is.
    pub async fn validate_api_key(&self) -> Result<bool, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Ok(false);
        }

        match self
            .fetch_current(Coordinates::new(0.0, 0.0), UnitSystem::Metric)
            .await
        {
            Ok(_) => Ok(true),
            Err(ProviderError::UpstreamStatus { code: 401 }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OcWeather {
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OcCurrent {
    #[serde(default)]
    dt: Option<i64>,
    #[serde(default)]
    temp: Option<f64>,
    #[serde(default)]
    feels_like: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    wind_speed: Option<f64>,
    #[serde(default)]
    wind_deg: Option<f64>,
    #[serde(default)]
    weather: Option<Vec<OcWeather>>,
}

#[derive(Debug, Deserialize)]
struct OcResponse {
    current: OcCurrent,
}

impl OcCurrent {
    fn into_reading(self, fetched_at: i64) -> Reading {
        let conditions = self
            .weather
            .and_then(|list| list.into_iter().next())
            .map(|w| Conditions {
                main: w.main,
                description: w.description,
                icon_code: w.icon,
            })
            .unwrap_or_default();

        Reading {
            temp: self.temp,
            feels_like: self.feels_like,
            humidity: self.humidity,
            wind_speed: self.wind_speed,
            wind_deg: self.wind_deg,
            conditions,
            observed_at: self.dt.unwrap_or(fetched_at),
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn fetch_current(
        &self,
        coords: Coordinates,
        units: UnitSystem,
    ) -> Result<Reading, ProviderError> {
        let lat = coords.latitude.to_string();
        let lon = coords.longitude.to_string();

        tracing::debug!(%lat, %lon, %units, "Requesting OpenWeather current conditions");

        let res = self
            .http
            .get(&self.base_url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("exclude", EXCLUDE),
                ("units", units.as_str()),
                ("appid", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(ProviderError::UpstreamStatus {
                code: status.as_u16(),
            });
        }

        let body = res.text().await?;

        let parsed: OcResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::debug!(body = %truncate_body(&body), "Unexpected OpenWeather body");
            ProviderError::Malformed(e.to_string())
        })?;

        Ok(parsed.current.into_reading(Utc::now().timestamp()))
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider_for(server: &MockServer) -> OpenWeatherProvider {
        OpenWeatherProvider::new("test_key".into(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(format!("{}/onecall", server.uri()))
    }

    #[tokio::test]
    async fn test_fetch_current_sends_expected_query() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("lat", "44.43"))
            .and(query_param("lon", "26.1"))
            .and(query_param("exclude", "minutely,hourly,daily,alerts"))
            .and(query_param("units", "imperial"))
            .and(query_param("appid", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lat": 44.43,
                "lon": 26.1,
                "current": {
                    "dt": 1700000000,
                    "temp": 68.2,
                    "feels_like": 66.0,
                    "humidity": 55,
                    "wind_speed": 6.7,
                    "wind_deg": 180,
                    "weather": [
                        {"id": 800, "main": "Clear", "description": "clear sky", "icon": "01d"},
                        {"id": 701, "main": "Mist", "description": "mist", "icon": "50d"}
                    ]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let reading = provider
            .fetch_current(Coordinates::new(44.43, 26.1), UnitSystem::Imperial)
            .await
            .unwrap();

        assert_eq!(reading.temp, Some(68.2));
        assert_eq!(reading.humidity, Some(55.0));
        assert_eq!(reading.wind_deg, Some(180.0));
        assert_eq!(reading.conditions.main.as_deref(), Some("Clear"));
        assert_eq!(reading.conditions.icon_code.as_deref(), Some("01d"));
        assert_eq!(reading.observed_at, 1700000000);
    }

    #[tokio::test]
    async fn test_missing_fields_map_to_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"current": {"temp": 3.5}})),
            )
            .mount(&server)
            .await;

        let before = Utc::now().timestamp();
        let provider = provider_for(&server).await;
        let reading = provider
            .fetch_current(Coordinates::new(1.0, 2.0), UnitSystem::Metric)
            .await
            .unwrap();

        assert_eq!(reading.temp, Some(3.5));
        assert_eq!(reading.feels_like, None);
        assert_eq!(reading.wind_speed, None);
        assert_eq!(reading.conditions, Conditions::default());
        assert!(reading.observed_at >= before);
    }

    #[tokio::test]
    async fn test_non_200_is_upstream_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = provider
            .fetch_current(Coordinates::new(1.0, 2.0), UnitSystem::Metric)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::UpstreamStatus { code: 429 }));
    }

    #[tokio::test]
    async fn test_missing_current_object_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"lat": 1.0})))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = provider
            .fetch_current(Coordinates::new(1.0, 2.0), UnitSystem::Metric)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_unparseable_body_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = provider
            .fetch_current(Coordinates::new(1.0, 2.0), UnitSystem::Metric)
            .await
            .unwrap_err();

        assert!(err.is_systemic());
    }

    #[tokio::test]
    async fn test_timeout_is_transport() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"current": {}}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let provider = OpenWeatherProvider::new("k".into(), Duration::from_millis(200))
            .unwrap()
            .with_base_url(server.uri());
        let err = provider
            .fetch_current(Coordinates::new(1.0, 2.0), UnitSystem::Metric)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Transport(_)));
        let source = std::error::Error::source(&err).expect("reqwest error kept as source");
        assert!(source.downcast_ref::<reqwest::Error>().is_some_and(|e| e.is_timeout()));
    }

    #[tokio::test]
    async fn test_validate_api_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("appid", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"current": {}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("appid", "bad"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let good = OpenWeatherProvider::new("good".into(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        let bad = OpenWeatherProvider::new("bad".into(), Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        let blank = OpenWeatherProvider::new("  ".into(), Duration::from_secs(5)).unwrap();

        assert!(good.validate_api_key().await.unwrap());
        assert!(!bad.validate_api_key().await.unwrap());
        assert!(!blank.validate_api_key().await.unwrap());
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 203);
    }
}
