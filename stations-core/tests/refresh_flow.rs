//! End-to-end refresh tests against a mock OpenWeather server.
//!
//! Storage is a real SQLite file and time comes from a `ManualClock`, so the
//! interval gate is exercised without sleeping.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::{sync::Arc, time::Duration};
use stations_core::{
    BulkRefreshCoordinator, Coordinates, DisplayUnit, ManualClock, NewStation, RefreshOutcome,
    SkipReason, SqliteStationRepository, StationId, StationRepository, StationWeatherUpdater,
    provider::openweather::OpenWeatherProvider, view::all_station_views,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
}

fn current_body(temp: f64, feels_like: f64, wind_speed: f64) -> serde_json::Value {
    serde_json::json!({
        "lat": 44.43,
        "lon": 26.1,
        "timezone": "Europe/Bucharest",
        "current": {
            "dt": 1000,
            "temp": temp,
            "feels_like": feels_like,
            "humidity": 55,
            "wind_speed": wind_speed,
            "wind_deg": 180,
            "weather": [{"id": 800, "main": "Clear", "description": "clear sky", "icon": "01d"}]
        }
    })
}

async fn mount_healthy(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/onecall"))
        .and(query_param("units", "metric"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_body(20.0, 19.0, 3.0)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/onecall"))
        .and(query_param("units", "imperial"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_body(68.0, 66.0, 6.7)))
        .mount(server)
        .await;
}

struct Harness {
    dir: tempfile::TempDir,
    repo: Arc<SqliteStationRepository>,
    clock: Arc<ManualClock>,
    updater: Arc<StationWeatherUpdater>,
}

async fn harness(server: &MockServer, interval_hours: f64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(SqliteStationRepository::open(dir.path().join("stations.db")).unwrap());
    let clock = Arc::new(ManualClock::new(start()));
    let provider = OpenWeatherProvider::new("test_key".into(), Duration::from_secs(5))
        .unwrap()
        .with_base_url(format!("{}/onecall", server.uri()));

    let updater = Arc::new(StationWeatherUpdater::new(
        repo.clone(),
        Arc::new(provider),
        clock.clone(),
        interval_hours,
    ));

    Harness { dir, repo, clock, updater }
}

async fn add_station(repo: &SqliteStationRepository, name: &str, coords: Option<Coordinates>) -> StationId {
    repo.insert_station(NewStation {
        name: name.into(),
        address: None,
        coordinates: coords,
    })
    .await
    .unwrap()
}

/// Overwrite a station's stored reading with JSON of an older shape.
fn write_stale_shape_snapshot(h: &Harness, id: StationId, last_update: &str) {
    let conn = rusqlite::Connection::open(h.dir.path().join("stations.db")).unwrap();
    conn.execute(
        "UPDATE stations SET weather_snapshot = '{\"old\":1}', last_update = ?1 WHERE id = ?2",
        rusqlite::params![last_update, id.0],
    )
    .unwrap();
}

#[tokio::test]
async fn test_bucharest_station_lifecycle() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    let h = harness(&server, 1.0).await;
    let id = add_station(&h.repo, "Bucharest", Some(Coordinates::new(44.43, 26.10))).await;
    assert!(h.repo.snapshot(id).await.unwrap().is_none());

    // First refresh populates the snapshot.
    let outcome = h.updater.refresh(id).await;
    let RefreshOutcome::Updated { reading, updated_at } = outcome else {
        panic!("expected Updated, got {outcome:?}");
    };
    assert_eq!(updated_at, start());
    assert_eq!(reading.temperature.celsius, Some(20.0));
    assert_eq!(reading.temperature.fahrenheit, Some(68.0));
    assert_eq!(reading.feels_like.fahrenheit, Some(66.0));
    assert_eq!(reading.wind_speed.metric, Some(3.0));
    assert_eq!(reading.wind_speed.imperial, Some(6.7));
    assert_eq!(reading.humidity, Some(55.0));
    assert_eq!(reading.wind_direction_degrees, Some(180.0));
    assert_eq!(reading.conditions.main.as_deref(), Some("Clear"));
    assert_eq!(reading.observed_at, 1000);

    let first = h.repo.snapshot(id).await.unwrap().unwrap();
    assert_eq!(first.last_update, start());
    assert_eq!(first.reading, reading);

    // Thirty minutes later the interval has not elapsed.
    h.clock.advance(TimeDelta::minutes(30));
    assert!(matches!(
        h.updater.refresh(id).await,
        RefreshOutcome::Skipped { reason: SkipReason::NotDue }
    ));

    // Past the interval, upstream starts sending garbage.
    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"cod\": 500"))
        .mount(&server)
        .await;
    h.clock.set(start() + TimeDelta::minutes(61));

    let outcome = h.updater.refresh(id).await;
    let RefreshOutcome::Failed { error } = outcome else {
        panic!("expected Failed, got {outcome:?}");
    };
    assert_eq!(error.kind(), "malformed");
    assert_eq!(h.repo.snapshot(id).await.unwrap().unwrap(), first);
}

#[tokio::test]
async fn test_imperial_failure_keeps_previous_snapshot() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    let h = harness(&server, 1.0).await;
    let id = add_station(&h.repo, "Bucharest", Some(Coordinates::new(44.43, 26.10))).await;

    assert!(matches!(h.updater.refresh(id).await, RefreshOutcome::Updated { .. }));
    let before = h.repo.snapshot(id).await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .and(query_param("units", "metric"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_body(25.0, 24.0, 1.0)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("units", "imperial"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    h.clock.advance(TimeDelta::hours(2));

    let outcome = h.updater.refresh(id).await;
    let RefreshOutcome::Failed { error } = outcome else {
        panic!("expected Failed, got {outcome:?}");
    };
    assert_eq!(error.kind(), "upstream_status");
    assert_eq!(h.repo.snapshot(id).await.unwrap(), before);
}

#[tokio::test]
async fn test_station_without_latitude_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_body(1.0, 1.0, 1.0)))
        .expect(0)
        .mount(&server)
        .await;
    let h = harness(&server, 1.0).await;
    let id = add_station(&h.repo, "Draft", None).await;

    assert!(matches!(
        h.updater.refresh(id).await,
        RefreshOutcome::Skipped { reason: SkipReason::NoLocation }
    ));
}

#[tokio::test]
async fn test_bulk_refresh_isolates_failing_station() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("lat", "20"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    for (lat, units) in [("10", "metric"), ("10", "imperial"), ("30", "metric"), ("30", "imperial")] {
        Mock::given(method("GET"))
            .and(query_param("lat", lat))
            .and(query_param("units", units))
            .respond_with(ResponseTemplate::new(200).set_body_json(current_body(1.0, 1.0, 1.0)))
            .mount(&server)
            .await;
    }

    let h = harness(&server, 1.0).await;
    let a = add_station(&h.repo, "A", Some(Coordinates::new(10.0, 5.0))).await;
    let b = add_station(&h.repo, "B", Some(Coordinates::new(20.0, 5.0))).await;
    let c = add_station(&h.repo, "C", Some(Coordinates::new(30.0, 5.0))).await;

    let coordinator = BulkRefreshCoordinator::new(h.updater.clone());
    let summary = coordinator.refresh_all().await.unwrap();

    assert_eq!(summary.updated, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[0].station_id, b);
    assert!(h.repo.snapshot(a).await.unwrap().is_some());
    assert!(h.repo.snapshot(b).await.unwrap().is_none());
    assert!(h.repo.snapshot(c).await.unwrap().is_some());

    // Running again inside the interval only retries the failed station.
    let summary = coordinator.refresh_all().await.unwrap();
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_back_to_back_refresh_is_idempotent() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    let h = harness(&server, 0.5).await;
    let id = add_station(&h.repo, "Bucharest", Some(Coordinates::new(44.43, 26.10))).await;

    assert!(matches!(h.updater.refresh(id).await, RefreshOutcome::Updated { .. }));
    let after_first = h.repo.snapshot(id).await.unwrap();

    assert!(matches!(
        h.updater.refresh(id).await,
        RefreshOutcome::Skipped { reason: SkipReason::NotDue }
    ));
    assert_eq!(h.repo.snapshot(id).await.unwrap(), after_first);
}

#[tokio::test]
async fn test_undecodable_snapshot_is_replaced_on_next_due_refresh() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    let h = harness(&server, 1.0).await;
    let id = add_station(&h.repo, "Bucharest", Some(Coordinates::new(44.43, 26.10))).await;

    write_stale_shape_snapshot(&h, id, "2024-05-01T12:00:00Z");
    assert!(h.repo.snapshot(id).await.is_err());

    let outcome = h.updater.refresh(id).await;
    assert!(matches!(outcome, RefreshOutcome::Updated { .. }), "got {outcome:?}");

    let stored = h.repo.snapshot(id).await.unwrap().unwrap();
    assert_eq!(stored.last_update, start());
    assert_eq!(stored.reading.temperature.celsius, Some(20.0));
}

#[tokio::test]
async fn test_undecodable_snapshot_still_respects_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_body(1.0, 1.0, 1.0)))
        .expect(0)
        .mount(&server)
        .await;
    let h = harness(&server, 1.0).await;
    let id = add_station(&h.repo, "Bucharest", Some(Coordinates::new(44.43, 26.10))).await;

    write_stale_shape_snapshot(&h, id, "2024-05-01T12:30:00Z");

    assert!(matches!(
        h.updater.refresh(id).await,
        RefreshOutcome::Skipped { reason: SkipReason::NotDue }
    ));
}

#[tokio::test]
async fn test_listing_survives_one_undecodable_snapshot() {
    let server = MockServer::start().await;
    mount_healthy(&server).await;
    let h = harness(&server, 1.0).await;
    let broken = add_station(&h.repo, "A", Some(Coordinates::new(44.43, 26.10))).await;
    let healthy = add_station(&h.repo, "B", Some(Coordinates::new(44.43, 26.10))).await;

    assert!(matches!(h.updater.refresh(healthy).await, RefreshOutcome::Updated { .. }));
    write_stale_shape_snapshot(&h, broken, "2024-05-01T12:30:00Z");

    let views = all_station_views(h.repo.as_ref(), DisplayUnit::Celsius, 1.0, start())
        .await
        .unwrap();

    assert_eq!(views.len(), 2);
    assert!(views[&broken].temp.is_none());
    assert!(views[&broken].last_update.is_none());
    assert_eq!(views[&healthy].temp.as_ref().unwrap().value, Some(20.0));
    assert!(!views[&healthy].needs_update);
}
