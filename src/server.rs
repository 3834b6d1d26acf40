//! The HTTP surface: run scenarios on demand.
//!
//! ## Endpoints
//!
//! | Method | Path       | Description                                  |
//! |--------|------------|----------------------------------------------|
//! | POST   | `/run`     | Run a scenario, return derived metrics       |
//! | GET    | `/healthz` | Liveness probe                               |
//!
//! The kernel is synchronous, so each run executes inside
//! `spawn_blocking`; results land in an in-memory SQLite database whose
//! queries produce the response payload.

use std::time::Instant;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{error, info};

use crate::config::{ConfigError, ScenarioConfig};
use crate::run_scenario;
use crate::store::{
    CpuUtilizationMetric, RequestsPerSecond, ResponseTime, RunStore, StoreError, TallyLine,
};

/// Build the scenario-running router.
pub fn build_router() -> Router {
    Router::new()
        .route("/run", post(run_handler))
        .route("/healthz", get(healthz))
}

#[derive(Serialize)]
struct RunResponse {
    ran_for: u64,
    traffic_pattern: String,
    tally_lines: Vec<TallyLine>,
    response_times: Vec<ResponseTime>,
    requests_per_second: Vec<RequestsPerSecond>,
    cpu_utilizations: Vec<CpuUtilizationMetric>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

enum ApiError {
    Config(ConfigError),
    Simulation(String),
    Internal(String),
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Config(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Config(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            ApiError::Simulation(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn run_handler(Json(config): Json<ScenarioConfig>) -> Result<Json<RunResponse>, ApiError> {
    config.validate()?;
    counter!("scalesim_runs_total").increment(1);

    let started = Instant::now();
    let report = tokio::task::spawn_blocking(move || run_scenario(&config))
        .await
        .map_err(|err| ApiError::Internal(format!("simulation task failed: {err}")))??;
    histogram!("scalesim_run_duration_seconds").record(started.elapsed().as_secs_f64());
    histogram!("scalesim_movements_completed").record(report.completed.len() as f64);
    histogram!("scalesim_movements_ignored").record(report.ignored.len() as f64);

    if let Some(message) = &report.error {
        counter!("scalesim_runs_failed_total").increment(1);
        error!(error = %message, "simulation ended on a fatal error");
        return Err(ApiError::Simulation(message.clone()));
    }

    info!(
        traffic_pattern = %report.traffic_pattern,
        completed = report.completed.len(),
        ignored = report.ignored.len(),
        wall_ms = started.elapsed().as_millis() as u64,
        "run finished"
    );

    let store = RunStore::open_in_memory().await?;
    let run_id = store.store_run(&report).await?;

    Ok(Json(RunResponse {
        ran_for: report.ran_for,
        traffic_pattern: report.traffic_pattern.clone(),
        tally_lines: store.tally_lines(run_id).await?,
        response_times: store.response_times(run_id).await?,
        requests_per_second: store.requests_per_second(run_id).await?,
        cpu_utilizations: store.cpu_utilizations(run_id).await?,
    }))
}
