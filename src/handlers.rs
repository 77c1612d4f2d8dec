use crate::config::Config;
use crate::errors::{AppError, ResultExt};
use crate::inventory::{normalize_inventory, InventorySource};
use crate::models::*;
use crate::pipeline::{run_appraisals, PipelineOptions};
use crate::results::{summarize, ResultSink};
use crate::run_state::RunTracker;
use crate::session::{Credentials, SessionDriver};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::any::Any;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Tracks the active (or last) appraisal run.
    pub runs: RunTracker,
    /// Where vehicles are read from.
    pub inventory: Arc<dyn InventorySource>,
    /// Where appraisals are written.
    pub sink: Arc<dyn ResultSink>,
    /// Opens portal browser sessions.
    pub driver: Arc<dyn SessionDriver>,
}

/// Routes for driving and observing appraisal runs.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start-run", post(start_run))
        .route("/status", get(run_status))
        .route("/results", get(run_results))
        .route("/inventory", get(inventory_preview))
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "vin-appraiser",
            "version": env!("CARGO_PKG_VERSION"),
            "run_active": state.runs.is_running()
        })),
    )
}

async fn load_vehicles(state: &AppState) -> Result<(usize, Vec<VehicleRecord>), AppError> {
    let rows = state.inventory.fetch_inventory().await.map_err(AppError::from)?;
    let vehicles = normalize_inventory(&rows, &state.config.vin_prefixes);
    Ok((rows.len(), vehicles))
}

/// Narrows the inventory to what the request asked for.
async fn select_vehicles(
    state: &AppState,
    request: &StartRunRequest,
    mut vehicles: Vec<VehicleRecord>,
) -> Result<Vec<VehicleRecord>, AppError> {
    if let Some(ref vins) = request.vins {
        let wanted: std::collections::HashSet<String> =
            vins.iter().map(|v| v.trim().to_uppercase()).collect();
        vehicles.retain(|v| wanted.contains(&v.vin));
    }

    if request.skip_appraised {
        let appraised = state
            .sink
            .appraised_vins()
            .await
            .map_err(AppError::from)
            .context("Failed to read existing appraisals")?;
        vehicles.retain(|v| !appraised.contains(&v.vin));
    }

    if let Some(limit) = request.limit {
        vehicles.truncate(limit);
    }

    Ok(vehicles)
}

/// Reads the optional `POST /start-run` body. Only an empty body means "no filters".
pub fn parse_start_request(body: &[u8]) -> Result<StartRunRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartRunRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))
}

/// POST /start-run
///
/// Loads the inventory and starts an appraisal run in the background.
///
/// # Returns
///
/// * `200` with the run id and vehicle count.
/// * `409` if a run is already active.
/// * `400` if the body is not a valid request or no vehicle matches it.
/// * `502` if the inventory could not be read.
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<StartRunResponse>, AppError> {
    let request = parse_start_request(&body)?;
    tracing::info!("POST /start-run - request: {:?}", request);

    // Claim the run slot first so concurrent starts cannot both load inventory.
    let ctx = state.runs.try_begin()?;

    let vehicles = match load_vehicles(&state)
        .await
        .context("Failed to load inventory")
    {
        Ok((_, vehicles)) => select_vehicles(&state, &request, vehicles).await,
        Err(e) => Err(e),
    };
    let vehicles = match vehicles {
        Ok(vehicles) if vehicles.is_empty() => {
            ctx.abort("No vehicles to process");
            return Err(AppError::BadRequest("No vehicles to process".to_string()));
        }
        Ok(vehicles) => vehicles,
        Err(e) => {
            ctx.abort(e.to_string());
            return Err(e);
        }
    };

    let run_id = ctx.run_id();
    let total = vehicles.len();
    let options = PipelineOptions {
        credentials: Credentials::from_config(&state.config),
        pause: state.config.vin_pause(),
    };
    let driver = state.driver.clone();
    let sink = state.sink.clone();

    tokio::spawn(async move {
        let status = run_appraisals(ctx, driver, sink, vehicles, options).await;
        tracing::info!(
            "Run {} done: {}/{} processed, {} saved, {} failed",
            run_id,
            status.processed,
            status.total,
            status.persisted,
            status.failed
        );
    });

    Ok(Json(StartRunResponse {
        status: "started".to_string(),
        run_id,
        total,
    }))
}

/// GET /status
///
/// Progress of the active run, or the final state of the last one.
pub async fn run_status(State(state): State<Arc<AppState>>) -> Json<RunStatusResponse> {
    Json(state.runs.snapshot())
}

/// GET /results
///
/// Per-VIN outcomes of the current or last run, grouped by profitability.
pub async fn run_results(State(state): State<Arc<AppState>>) -> Json<ResultsSummary> {
    Json(summarize(&state.runs.outcomes()))
}

/// GET /inventory
///
/// Previews which inventory rows a run would appraise.
pub async fn inventory_preview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InventoryPreview>, AppError> {
    let (total, vehicles) = load_vehicles(&state)
        .await
        .context("Failed to load inventory")?;
    tracing::info!(
        "Inventory preview: {} rows, {} appraisable",
        total,
        vehicles.len()
    );

    Ok(Json(InventoryPreview {
        total,
        valid: vehicles.len(),
        vehicles,
    }))
}

/// Turns a handler panic into the standard 500 JSON error.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::InternalError(format!("Handler panicked: {}", detail)).into_response()
}
