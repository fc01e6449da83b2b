use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};
use std::{fmt, str::FromStr};

use crate::{provider::ProviderError, repository::StorageError};

/// Opaque station identifier assigned by the station store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub i64);

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(StationId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Build coordinates from two optional columns; both must be present.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some(Self::new(lat, lon)),
            _ => None,
        }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180].
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub main: Option<String>,
    pub description: Option<String>,
    pub icon_code: Option<String>,
}

/// Current conditions as returned for a single unit system.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_deg: Option<f64>,
    pub conditions: Conditions,
    /// Upstream observation time, epoch seconds.
    pub observed_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperaturePair {
    pub celsius: Option<f64>,
    pub fahrenheit: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindSpeedPair {
    /// m/s
    pub metric: Option<f64>,
    /// mph
    pub imperial: Option<f64>,
}

/// A station's snapshot combining the metric and imperial fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReading {
    pub temperature: TemperaturePair,
    pub feels_like: TemperaturePair,
    pub humidity: Option<f64>,
    pub wind_speed: WindSpeedPair,
    pub wind_direction_degrees: Option<f64>,
    pub conditions: Conditions,
    pub observed_at: i64,
}

impl NormalizedReading {
    /// Combine two readings taken for the same station and instant.
    ///
    /// Unit-independent fields (humidity, wind direction, conditions,
    /// observation time) come from the metric reading only.
    pub fn merge(metric: Reading, imperial: Reading) -> Self {
        Self {
            temperature: TemperaturePair {
                celsius: metric.temp,
                fahrenheit: imperial.temp,
            },
            feels_like: TemperaturePair {
                celsius: metric.feels_like,
                fahrenheit: imperial.feels_like,
            },
            humidity: metric.humidity,
            wind_speed: WindSpeedPair {
                metric: metric.wind_speed,
                imperial: imperial.wind_speed,
            },
            wind_direction_degrees: metric.wind_deg,
            conditions: metric.conditions,
            observed_at: metric.observed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoLocation,
    NotDue,
    RefreshInProgress,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoLocation => "no_location",
            SkipReason::NotDue => "not_due",
            SkipReason::RefreshInProgress => "refresh_in_progress",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a refresh that was attempted did not complete.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Storage(StorageError),
    #[error("Unknown station {0}")]
    UnknownStation(StationId),
}

impl RefreshError {
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::Provider(e) => e.kind(),
            RefreshError::Storage(_) => "storage",
            RefreshError::UnknownStation(_) => "unknown_station",
        }
    }
}

impl From<StorageError> for RefreshError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => RefreshError::UnknownStation(id),
            other => RefreshError::Storage(other),
        }
    }
}

/// Result of one station refresh call. Returned, never stored.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Skipped {
        reason: SkipReason,
    },
    Updated {
        reading: NormalizedReading,
        updated_at: DateTime<Utc>,
    },
    Failed {
        #[serde(serialize_with = "serialize_refresh_error")]
        error: RefreshError,
    },
}

impl RefreshOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RefreshOutcome::Failed { .. })
    }
}

fn serialize_refresh_error<S: Serializer>(error: &RefreshError, s: S) -> Result<S::Ok, S::Error> {
    let mut st = s.serialize_struct("RefreshError", 2)?;
    st.serialize_field("kind", error.kind())?;
    st.serialize_field("message", &error.to_string())?;
    st.end()
}
