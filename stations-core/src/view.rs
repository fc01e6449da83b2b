//! Read-side rendering of stored snapshots in one display unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::BTreeMap, str::FromStr};

use crate::{
    model::StationId,
    policy::is_due,
    repository::{StationRepository, StorageError, StoredSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl DisplayUnit {
    fn temperature_label(&self) -> &'static str {
        match self {
            DisplayUnit::Celsius => "°C",
            DisplayUnit::Fahrenheit => "°F",
        }
    }

    fn speed_label(&self) -> &'static str {
        match self {
            DisplayUnit::Celsius => "m/s",
            DisplayUnit::Fahrenheit => "mph",
        }
    }
}

impl FromStr for DisplayUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "celsius" | "c" | "metric" => Ok(DisplayUnit::Celsius),
            "fahrenheit" | "f" | "imperial" => Ok(DisplayUnit::Fahrenheit),
            other => Err(format!("Unknown unit '{other}'. Use celsius or fahrenheit.")),
        }
    }
}

/// Accepts the same spellings as `FromStr`, so query strings and CLI
/// flags agree.
impl<'de> Deserialize<'de> for DisplayUnit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn icon_url(icon_code: &str) -> String {
    format!("https://openweathermap.org/img/wn/{icon_code}@2x.png")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub value: Option<f64>,
    pub unit: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConditionsView {
    pub main: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub icon_url: Option<String>,
}

/// What a visitor sees for one station.
///
/// A station that never refreshed has every field empty and
/// `needs_update` set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationWeatherView {
    pub temp: Option<Measurement>,
    pub feels_like: Option<Measurement>,
    pub humidity: Option<Measurement>,
    pub wind_speed: Option<Measurement>,
    pub wind_deg: Option<f64>,
    pub weather: ConditionsView,
    pub last_update: Option<DateTime<Utc>>,
    pub observed_at: Option<DateTime<Utc>>,
    pub needs_update: bool,
}

impl StationWeatherView {
    pub fn build(
        snapshot: Option<&StoredSnapshot>,
        unit: DisplayUnit,
        interval_hours: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let Some(snapshot) = snapshot else {
            return Self {
                temp: None,
                feels_like: None,
                humidity: None,
                wind_speed: None,
                wind_deg: None,
                weather: ConditionsView::default(),
                last_update: None,
                observed_at: None,
                needs_update: true,
            };
        };

        let reading = &snapshot.reading;
        let (temp, feels_like, wind) = match unit {
            DisplayUnit::Celsius => (
                reading.temperature.celsius,
                reading.feels_like.celsius,
                reading.wind_speed.metric,
            ),
            DisplayUnit::Fahrenheit => (
                reading.temperature.fahrenheit,
                reading.feels_like.fahrenheit,
                reading.wind_speed.imperial,
            ),
        };

        let conditions = &reading.conditions;

        Self {
            temp: Some(Measurement { value: temp, unit: unit.temperature_label() }),
            feels_like: Some(Measurement { value: feels_like, unit: unit.temperature_label() }),
            humidity: Some(Measurement { value: reading.humidity, unit: "%" }),
            wind_speed: Some(Measurement { value: wind, unit: unit.speed_label() }),
            wind_deg: reading.wind_direction_degrees,
            weather: ConditionsView {
                main: conditions.main.clone(),
                description: conditions.description.clone(),
                icon: conditions.icon_code.clone(),
                icon_url: conditions.icon_code.as_deref().map(icon_url),
            },
            last_update: Some(snapshot.last_update),
            observed_at: DateTime::from_timestamp(reading.observed_at, 0),
            needs_update: is_due(Some(snapshot.last_update), interval_hours, now),
        }
    }
}

/// Views for every known station, keyed by id. A station whose stored
/// reading cannot be read is listed with no data.
pub async fn all_station_views(
    repository: &dyn StationRepository,
    unit: DisplayUnit,
    interval_hours: f64,
    now: DateTime<Utc>,
) -> Result<BTreeMap<StationId, StationWeatherView>, StorageError> {
    let mut views = BTreeMap::new();

    for id in repository.station_ids().await? {
        let snapshot = match repository.snapshot(id).await {
            Ok(snapshot) => snapshot,
            Err(StorageError::NotFound(_)) => continue,
            Err(e) => {
                tracing::warn!(station_id = %id, "Showing station without data: {e}");
                None
            }
        };
        views.insert(
            id,
            StationWeatherView::build(snapshot.as_ref(), unit, interval_hours, now),
        );
    }

    Ok(views)
}
