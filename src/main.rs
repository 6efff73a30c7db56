//! Report Engine - HTTP host for executing, charting, exporting and scheduling reports.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use report_engine::chart::ChartSeries;
use report_engine::config::{load_sources_from_dir, DefinitionStore, Settings};
use report_engine::schedule::{ScheduleRequest, ScheduleStatus, ScheduledReport};
use report_engine::source::http::HttpSource;
use report_engine::source::DataSourceSpec;
use report_engine::{
    ExecutionOptions, ExportOptions, ReportData, ReportDefinition, ReportEngine, ReportError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<ReportEngine>,
    definitions: Arc<DefinitionStore>,
    schedules: Arc<RwLock<HashMap<String, ScheduledReport>>>,
    settings: Arc<Settings>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "report_engine=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let http = HttpSource::from_env()?;
    if http.is_some() {
        info!("Remote row source enabled");
    }
    let catalog = load_sources_from_dir(&settings.sources_dir(), &settings.data_dir, http)?;
    info!("Loaded {} data sources", catalog.specs().len());

    let definitions = DefinitionStore::load_from_dir(&settings.reports_dir(), &catalog)?;
    info!("Loaded {} reports: {:?}", definitions.list().len(), definitions.list());

    let bind_addr = settings.bind_addr.clone();
    let state = AppState {
        engine: Arc::new(ReportEngine::new(catalog)),
        definitions: Arc::new(definitions),
        schedules: Arc::new(RwLock::new(HashMap::new())),
        settings: Arc::new(settings),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/sources", get(list_sources))
        .route("/reports", get(list_reports))
        .route("/reports/{id}", get(get_report).put(put_report).delete(delete_report))
        .route("/reports/{id}/execute", post(execute_report))
        .route("/reports/{id}/charts/{index}", post(project_chart))
        .route("/reports/{id}/export", post(export_report))
        .route("/schedules", post(create_schedule).get(list_schedules))
        .route("/schedules/{id}", get(get_schedule))
        .route("/schedules/{id}/advance", post(advance_schedule))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

type ApiError = (StatusCode, String);

fn report_error(err: ReportError) -> ApiError {
    let status = match &err {
        ReportError::Definition(_) | ReportError::ScheduleConfig(_) => StatusCode::BAD_REQUEST,
        ReportError::Source { .. } => StatusCode::BAD_GATEWAY,
        ReportError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    (status, err.to_string())
}

fn definition(state: &AppState, id: &str) -> Result<ReportDefinition, ApiError> {
    state
        .definitions
        .get(id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown report: {}", id)))
}

// ============================================================================
// Reports
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<DataSourceSpec>> {
    Json(state.engine.catalog().specs().into_iter().cloned().collect())
}

async fn list_reports(State(state): State<AppState>) -> Json<Vec<ReportDefinition>> {
    Json(state.definitions.all())
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReportDefinition>, ApiError> {
    definition(&state, &id).map(Json)
}

/// Create or replace a definition. It is checked against its data source first.
async fn put_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut definition): Json<ReportDefinition>,
) -> Result<Json<ReportDefinition>, ApiError> {
    definition.id = id;
    state
        .engine
        .validate(&definition)
        .map_err(|e| report_error(e.into()))?;
    info!("Stored report '{}' ({})", definition.id, definition.fingerprint());
    state.definitions.insert(definition.clone());
    Ok(Json(definition))
}

async fn delete_report(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.definitions.remove(&id) {
        info!("Removed report '{}'", id);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn execute_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(options): Json<ExecutionOptions>,
) -> Result<Json<ReportData>, ApiError> {
    let definition = definition(&state, &id)?;
    state
        .engine
        .execute(&definition, &options)
        .await
        .map(Json)
        .map_err(report_error)
}

async fn project_chart(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Json(options): Json<ExecutionOptions>,
) -> Result<Json<ChartSeries>, ApiError> {
    let definition = definition(&state, &id)?;
    let data = state
        .engine
        .execute(&definition, &options)
        .await
        .map_err(report_error)?;

    match state.engine.chart(&data, &definition, index) {
        None => Err((StatusCode::NOT_FOUND, format!("Report {} has no chart {}", id, index))),
        Some(Ok(series)) => Ok(Json(series)),
        Some(Err(e)) => Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string())),
    }
}

#[derive(Deserialize)]
struct ExportRequest {
    #[serde(flatten)]
    options: ExportOptions,
    #[serde(default)]
    execution: ExecutionOptions,
}

async fn export_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let definition = definition(&state, &id)?;
    let artifact = state
        .engine
        .export(&definition, &request.execution, &request.options)
        .await
        .map_err(report_error)?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.filename);
    let warnings = artifact.warnings.len().to_string();
    Ok((
        [
            (header::CONTENT_TYPE, artifact.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::HeaderName::from_static("x-export-warnings"), warnings),
        ],
        artifact.bytes,
    )
        .into_response())
}

// ============================================================================
// Schedules
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleView {
    #[serde(flatten)]
    schedule: ScheduledReport,
    status: ScheduleStatus,
    description: String,
}

impl ScheduleView {
    fn new(schedule: ScheduledReport) -> Self {
        Self {
            status: schedule.status(Utc::now()),
            description: schedule.describe(),
            schedule,
        }
    }
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(mut request): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleView>), ApiError> {
    definition(&state, &request.report_definition_id)?;
    if request.schedule_config.timezone.trim().is_empty() {
        request.schedule_config.timezone = state.settings.default_timezone.clone();
    }

    let schedule = ScheduledReport::create(request, Utc::now())
        .map_err(|e| report_error(e.into()))?;
    info!(
        "Created schedule {} for report '{}': {} (next run {})",
        schedule.id,
        schedule.report_definition_id,
        schedule.describe(),
        schedule.next_run()
    );

    state
        .schedules
        .write()
        .unwrap()
        .insert(schedule.id.clone(), schedule.clone());
    Ok((StatusCode::CREATED, Json(ScheduleView::new(schedule))))
}

async fn list_schedules(State(state): State<AppState>) -> Json<Vec<ScheduleView>> {
    let mut schedules: Vec<ScheduledReport> = state.schedules.read().unwrap().values().cloned().collect();
    schedules.sort_by_key(|s| s.next_run());
    Json(schedules.into_iter().map(ScheduleView::new).collect())
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleView>, StatusCode> {
    let schedules = state.schedules.read().unwrap();
    schedules
        .get(&id)
        .cloned()
        .map(ScheduleView::new)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Called by the dispatcher after it ran a schedule.
async fn advance_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleView>, ApiError> {
    let mut schedules = state.schedules.write().unwrap();
    let schedule = schedules
        .get_mut(&id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown schedule: {}", id)))?;
    schedule.advance(Utc::now()).map_err(|e| report_error(e.into()))?;
    Ok(Json(ScheduleView::new(schedule.clone())))
}
