//! Core library for weather stations.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The OpenWeather client and the refresh policy gating it
//! - Station storage and the single-station / bulk refresh engine
//! - Read-side station views and geocoding for station registration
//!
//! It is used by `stations-cli`, but can also be embedded in other services.

pub mod bulk;
pub mod clock;
pub mod config;
pub mod geocode;
pub mod model;
pub mod policy;
pub mod provider;
pub mod repository;
pub mod updater;
pub mod view;

pub use bulk::{BulkRefreshCoordinator, BulkSummary, StationFailure, run_schedule};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, ProviderConfig, RefreshSettings, ServerConfig};
pub use geocode::{GeocodeError, GeocodeResult, MapboxGeocoder};
pub use model::{
    Conditions, Coordinates, NormalizedReading, Reading, RefreshError, RefreshOutcome, SkipReason,
    StationId,
};
pub use provider::{ProviderError, ProviderId, UnitSystem, WeatherProvider};
pub use repository::{
    MemoryStationRepository, NewStation, SqliteStationRepository, Station, StationRepository,
    StorageError, StoredSnapshot,
};
pub use updater::StationWeatherUpdater;
pub use view::{DisplayUnit, StationWeatherView};
