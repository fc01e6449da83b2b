use crate::{
    config::RefreshSettings,
    model::{Coordinates, Reading},
    provider::openweather::OpenWeatherProvider,
};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, sync::Arc};

pub mod openweather;

/// External services that need a credential in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    Mapbox,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::Mapbox => "mapbox",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::Mapbox]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "mapbox" => Ok(ProviderId::Mapbox),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, mapbox."
            )),
        }
    }
}

/// The upstream API answers in one unit system per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitSystem {
    Metric,
    Imperial,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }
}

impl std::fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network, DNS or timeout failure.
    #[error("Weather provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Weather provider returned status {code}")]
    UpstreamStatus { code: u16 },
    /// The body did not have the expected structure.
    #[error("Malformed weather provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Transport(_) => "transport",
            ProviderError::UpstreamStatus { .. } => "upstream_status",
            ProviderError::Malformed(_) => "malformed",
        }
    }

    /// A malformed body points at an integration break rather than a
    /// transient outage.
    pub fn is_systemic(&self) -> bool {
        matches!(self, ProviderError::Malformed(_))
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Fetch current conditions at `coords` in one unit system.
    async fn fetch_current(
        &self,
        coords: Coordinates,
        units: UnitSystem,
    ) -> Result<Reading, ProviderError>;
}

/// Construct the weather provider from validated settings.
pub fn provider_from_settings(
    settings: &RefreshSettings,
) -> Result<Arc<dyn WeatherProvider>, ProviderError> {
    let provider = OpenWeatherProvider::new(settings.api_key.clone(), settings.http_timeout)?;
    Ok(Arc::new(provider))
}
