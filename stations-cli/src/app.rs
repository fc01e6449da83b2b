use anyhow::{Context, Result, anyhow, bail};
use std::{fs, sync::Arc};

use stations_core::{
    Config, Coordinates, MapboxGeocoder, ProviderId, RefreshSettings, SqliteStationRepository,
    StationWeatherUpdater, SystemClock, config, provider::provider_from_settings,
};

/// Open the station database named by the config, creating it if needed.
pub fn open_repository(config: &Config) -> Result<Arc<SqliteStationRepository>> {
    let path = config.resolved_database_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }

    let repo = SqliteStationRepository::open(&path)
        .with_context(|| format!("Failed to open station database: {}", path.display()))?;

    tracing::debug!(path = %path.display(), "Station database opened");
    Ok(Arc::new(repo))
}

/// Refresh interval for read-only commands, checked the same way the
/// updater checks it but without requiring an API key.
pub fn view_interval_hours(config: &Config) -> Result<f64> {
    Ok(config::validate_interval(config.refresh_interval_hours)?)
}

/// Wire the updater from a validated config.
pub fn build_updater(
    config: &Config,
    repository: Arc<SqliteStationRepository>,
) -> Result<Arc<StationWeatherUpdater>> {
    let settings = RefreshSettings::from_config(config)?;
    let provider = provider_from_settings(&settings)?;

    Ok(Arc::new(StationWeatherUpdater::new(
        repository,
        provider,
        Arc::new(SystemClock),
        settings.interval_hours,
    )))
}

fn geocoder(config: &Config) -> Result<Option<MapboxGeocoder>> {
    let Some(token) = config.provider_api_key(ProviderId::Mapbox) else {
        return Ok(None);
    };

    let timeout = std::time::Duration::from_secs(config.http_timeout_secs.max(1));
    Ok(Some(MapboxGeocoder::new(token.to_string(), timeout)?))
}

/// Turn the location flags of `station add` / `station locate` into an
/// address and coordinates, geocoding through Mapbox where needed.
pub async fn resolve_location(
    config: &Config,
    address: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
) -> Result<Option<(Option<String>, Coordinates)>> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => {
            let coords = Coordinates::new(lat, lon);
            if !coords.is_valid() {
                bail!("Coordinates out of range: latitude {lat}, longitude {lon}");
            }

            let address = match (address, geocoder(config)?) {
                (Some(address), _) => Some(address),
                (None, Some(geocoder)) => match geocoder.reverse_geocode(coords).await {
                    Ok(name) => Some(name),
                    Err(e) => {
                        tracing::warn!("Reverse geocoding failed, storing coordinates only: {e}");
                        None
                    }
                },
                (None, None) => None,
            };

            Ok(Some((address, coords)))
        }
        (None, None) => {
            let Some(address) = address else {
                return Ok(None);
            };

            let geocoder = geocoder(config)?.ok_or_else(|| {
                anyhow!(
                    "Looking up an address needs a Mapbox token.\n\
                     Hint: run `stations configure` or pass --lat and --lon."
                )
            })?;

            let found = geocoder
                .geocode(&address)
                .await
                .with_context(|| format!("Failed to geocode '{address}'"))?;

            Ok(Some((Some(found.formatted_address), found.coordinates)))
        }
        _ => bail!("--lat and --lon must be given together"),
    }
}
