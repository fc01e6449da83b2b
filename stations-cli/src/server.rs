use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::oneshot;

use stations_core::{
    BulkRefreshCoordinator, Clock, RefreshError, RefreshOutcome, ServerConfig, SkipReason, StationId,
    StationWeatherUpdater, StationWeatherView, StorageError, policy::tick_period,
    view::{DisplayUnit, all_station_views},
};

pub struct AppState {
    pub updater: Arc<StationWeatherUpdater>,
}

#[derive(Deserialize, Debug)]
struct UnitQuery {
    #[serde(default)]
    unit: DisplayUnit,
}

fn parse_station_id(raw: &str) -> Result<StationId, HttpResponse> {
    raw.parse().map_err(|_| {
        HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Invalid station id '{raw}'")
        }))
    })
}

fn outcome_response(outcome: &RefreshOutcome) -> HttpResponse {
    let mut response = match outcome {
        RefreshOutcome::Updated { .. } => HttpResponse::Ok(),
        RefreshOutcome::Skipped { reason: SkipReason::RefreshInProgress } => HttpResponse::Conflict(),
        RefreshOutcome::Skipped { .. } => HttpResponse::Ok(),
        RefreshOutcome::Failed { error: RefreshError::UnknownStation(_) } => HttpResponse::NotFound(),
        RefreshOutcome::Failed { .. } => HttpResponse::InternalServerError(),
    };
    response.json(outcome)
}

#[post("/stations/{id}/refresh")]
async fn refresh_station(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let id = match parse_station_id(&path) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let outcome = data.updater.refresh(id).await;
    tracing::info!(station_id = %id, outcome = outcome_status(&outcome), "Refresh requested");
    outcome_response(&outcome)
}

fn outcome_status(outcome: &RefreshOutcome) -> &'static str {
    match outcome {
        RefreshOutcome::Updated { .. } => "updated",
        RefreshOutcome::Skipped { reason } => reason.as_str(),
        RefreshOutcome::Failed { error } => error.kind(),
    }
}

#[get("/stations/{id}/weather")]
async fn station_weather(
    path: web::Path<String>,
    query: web::Query<UnitQuery>,
    data: web::Data<AppState>,
) -> impl Responder {
    let id = match parse_station_id(&path) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let updater = &data.updater;
    match updater.repository().snapshot(id).await {
        Ok(snapshot) => HttpResponse::Ok().json(StationWeatherView::build(
            snapshot.as_ref(),
            query.unit,
            updater.interval_hours(),
            updater.clock().now(),
        )),
        Err(StorageError::NotFound(_)) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Unknown station {id}")
        })),
        Err(e) => {
            tracing::error!(station_id = %id, "Failed to read snapshot: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/stations")]
async fn all_stations(query: web::Query<UnitQuery>, data: web::Data<AppState>) -> impl Responder {
    let updater = &data.updater;
    let views = all_station_views(
        updater.repository().as_ref(),
        query.unit,
        updater.interval_hours(),
        updater.clock().now(),
    )
    .await;

    match views {
        Ok(views) => HttpResponse::Ok().json(views),
        Err(e) => {
            tracing::error!("Failed to list station views: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(refresh_station)
        .service(station_weather)
        .service(all_stations);
}

/// Serve the HTTP surface and run the scheduled bulk refresh alongside it.
///
/// The schedule stops once the server has shut down.
pub async fn serve(updater: Arc<StationWeatherUpdater>, server: &ServerConfig) -> anyhow::Result<()> {
    let period = tick_period(updater.interval_hours());
    let coordinator = BulkRefreshCoordinator::new(updater.clone());

    let state = web::Data::new(AppState { updater });
    let http = HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
        .bind((server.bind_address.as_str(), server.bind_port))
        .with_context(|| format!("Failed to bind {}:{}", server.bind_address, server.bind_port))?;

    tracing::info!(
        address = %server.bind_address,
        port = server.bind_port,
        "Starting HTTP server"
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let schedule = tokio::spawn(stations_core::run_schedule(coordinator, period, async {
        let _ = stop_rx.await;
    }));

    let result = http.run().await;

    let _ = stop_tx.send(());
    if let Err(e) = schedule.await {
        tracing::error!("Scheduled refresh task ended abnormally: {e}");
    }

    result.map_err(Into::into)
}
