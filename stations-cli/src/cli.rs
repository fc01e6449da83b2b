use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use inquire::{CustomType, Password, PasswordDisplayMode};
use std::time::Duration;

use stations_core::{
    BulkRefreshCoordinator, Config, NewStation, ProviderId, RefreshOutcome, StationId,
    StationRepository, StationWeatherView,
    config::{MAX_INTERVAL_HOURS, MIN_INTERVAL_HOURS},
    provider::openweather::OpenWeatherProvider,
    view::DisplayUnit,
};

use crate::{app, server};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "stations", version, about = "Weather stations refresh service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set API credentials and the refresh interval interactively.
    Configure,

    /// Manage registered stations.
    Station {
        #[command(subcommand)]
        command: StationCommand,
    },

    /// Refresh one station now (still subject to the refresh interval).
    Refresh {
        id: StationId,
    },

    /// Run one refresh pass over every station.
    RefreshAll,

    /// Show the stored weather for a station.
    Show {
        id: StationId,

        #[arg(long, default_value = "celsius")]
        unit: DisplayUnit,
    },

    /// Serve the refresh endpoint and run the scheduled refresh.
    Serve,
}

#[derive(Debug, Subcommand)]
pub enum StationCommand {
    /// Register a new station.
    Add {
        #[arg(long)]
        name: String,

        /// Street address; geocoded when no coordinates are given.
        #[arg(long)]
        address: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
    },

    /// List registered stations.
    List,

    /// Change a station's location.
    Locate {
        id: StationId,

        #[arg(long)]
        address: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::load()?;

        match self.command {
            Command::Configure => configure(config).await,
            Command::Station { command } => station(&config, command).await,
            Command::Refresh { id } => {
                let repo = app::open_repository(&config)?;
                let updater = app::build_updater(&config, repo)?;

                let outcome = updater.refresh(id).await;
                println!("{}", serde_json::to_string_pretty(&outcome)?);

                if let RefreshOutcome::Failed { error } = outcome {
                    bail!("Refresh of station {id} failed: {error}");
                }
                Ok(())
            }
            Command::RefreshAll => {
                let repo = app::open_repository(&config)?;
                let updater = app::build_updater(&config, repo)?;

                let summary = BulkRefreshCoordinator::new(updater).refresh_all().await?;
                println!(
                    "{} updated, {} skipped, {} failed",
                    summary.updated, summary.skipped, summary.failed
                );
                for failure in &summary.errors {
                    println!("  station {}: {}", failure.station_id, failure.error);
                }
                Ok(())
            }
            Command::Show { id, unit } => {
                let repo = app::open_repository(&config)?;
                let station = repo.station(id).await?;
                let snapshot = repo.snapshot(id).await?;

                let view = StationWeatherView::build(
                    snapshot.as_ref(),
                    unit,
                    app::view_interval_hours(&config)?,
                    chrono::Utc::now(),
                );

                println!("{} (#{})", station.name, station.id);
                if let Some(address) = &station.address {
                    println!("{address}");
                }
                println!("{}", serde_json::to_string_pretty(&view)?);
                Ok(())
            }
            Command::Serve => {
                let repo = app::open_repository(&config)?;
                let updater = app::build_updater(&config, repo)?;
                server::serve(updater, &config.server).await
            }
        }
    }
}

async fn station(config: &Config, command: StationCommand) -> anyhow::Result<()> {
    let repo = app::open_repository(config)?;

    match command {
        StationCommand::Add { name, address, lat, lon } => {
            let location = app::resolve_location(config, address, lat, lon).await?;
            let (address, coordinates) = match location {
                Some((address, coords)) => (address, Some(coords)),
                None => (None, None),
            };

            let id = repo
                .insert_station(NewStation { name, address, coordinates })
                .await?;
            println!("Station {id} registered");
        }
        StationCommand::List => {
            for id in repo.station_ids().await? {
                let station = repo.station(id).await?;
                let location = station
                    .coordinates
                    .map(|c| format!("{:.4}, {:.4}", c.latitude, c.longitude))
                    .unwrap_or_else(|| "no location".to_string());
                let updated = repo
                    .snapshot(id)
                    .await?
                    .map(|s| s.last_update.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());

                println!("{:>4}  {:<24} {:<22} updated: {}", id, station.name, location, updated);
            }
        }
        StationCommand::Locate { id, address, lat, lon } => {
            let Some((address, coords)) = app::resolve_location(config, address, lat, lon).await?
            else {
                bail!("Give --address or --lat/--lon");
            };

            repo.save_location(id, address, coords).await?;
            println!("Station {id} moved to {}, {}", coords.latitude, coords.longitude);
        }
    }

    Ok(())
}

async fn configure(mut config: Config) -> anyhow::Result<()> {
    let openweather_key = Password::new("OpenWeather API key:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .with_help_message("Leave empty to keep the current key")
        .prompt()?;
    if !openweather_key.trim().is_empty() {
        config.upsert_provider_api_key(ProviderId::OpenWeather, openweather_key.trim().to_string());
    }

    let mapbox_token = Password::new("Mapbox access token (optional):")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .with_help_message("Used to geocode station addresses; leave empty to skip")
        .prompt()?;
    if !mapbox_token.trim().is_empty() {
        config.upsert_provider_api_key(ProviderId::Mapbox, mapbox_token.trim().to_string());
    }

    config.refresh_interval_hours = CustomType::<f64>::new("Refresh interval in hours:")
        .with_default(config.refresh_interval_hours)
        .with_help_message("Half-hour steps, e.g. 0.5, 1, 1.5. Max: 24.")
        .with_validator(|value: &f64| {
            if (MIN_INTERVAL_HOURS..=MAX_INTERVAL_HOURS).contains(value) {
                Ok(inquire::validator::Validation::Valid)
            } else {
                Ok(inquire::validator::Validation::Invalid(
                    format!("Must be between {MIN_INTERVAL_HOURS} and {MAX_INTERVAL_HOURS}").into(),
                ))
            }
        })
        .prompt()?;

    if let Some(key) = config.provider_api_key(ProviderId::OpenWeather) {
        let provider = OpenWeatherProvider::new(
            key.to_string(),
            Duration::from_secs(config.http_timeout_secs.max(1)),
        )?;
        match provider.validate_api_key().await {
            Ok(true) => println!("OpenWeather API key accepted."),
            Ok(false) => println!("Warning: OpenWeather rejected the API key."),
            Err(e) => println!("Warning: could not verify the OpenWeather API key: {e}"),
        }
    }

    config.save().context("Failed to save configuration")?;
    println!("Configuration saved to {}", Config::config_file_path()?.display());
    Ok(())
}
