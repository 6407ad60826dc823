//! API routes for analysis, history, catalog views, stats and export.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;

use crate::analysis::{AnalysisParams, Orchestrator};
use crate::catalog::CatalogCache;
use crate::config::Config;
use crate::error::EngineError;
use crate::models::{AnalysisResult, ExecutionMode, ProgressEvent, StrategyType};
use crate::storage::RunStore;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<RunStore>,
    pub catalog: Arc<CatalogCache>,
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/analysis", get(get_analysis).post(trigger_analysis))
        .route("/api/analysis/status", get(get_status))
        .route("/api/analysis/progress", get(progress_stream))
        .route("/api/analysis/rescore", post(rescore_analysis))
        .route("/api/analysis/strategies", get(get_strategies))
        .route("/api/history", get(get_history))
        .route("/api/history/:run_id", get(get_run_detail))
        .route("/api/history/:run_id/analysis", get(get_run_analysis))
        .route("/api/sets", get(get_sets))
        .route("/api/sets/:slug", get(get_set_detail))
        .route("/api/sets/:slug/history", get(get_set_history))
        .route("/api/stats", get(get_stats))
        .route("/api/stats/health", get(health_check))
        .route("/api/export", get(export_data))
        .route("/api/export/file", get(export_file))
        .route("/api/export/summary", get(export_summary))
        .with_state(state)
}

// ===== Analysis =====

#[derive(Debug, Default, Deserialize)]
struct AnalysisQuery {
    strategy: Option<String>,
    execution_mode: Option<String>,
    force_refresh: Option<bool>,
    test_mode: Option<bool>,
}

impl AnalysisQuery {
    fn strategy(&self, config: &Config) -> Result<StrategyType, ApiError> {
        match &self.strategy {
            Some(raw) => raw.parse().map_err(ApiError::BadRequest),
            None => Ok(config.default_strategy),
        }
    }

    fn execution_mode(&self, config: &Config) -> Result<ExecutionMode, ApiError> {
        match &self.execution_mode {
            Some(raw) => raw.parse().map_err(ApiError::BadRequest),
            None => Ok(config.default_execution_mode),
        }
    }

    fn params(&self, config: &Config) -> Result<AnalysisParams, ApiError> {
        Ok(AnalysisParams {
            strategy: self.strategy(config)?,
            execution_mode: self.execution_mode(config)?,
            force_refresh: self.force_refresh.unwrap_or(false),
            test_mode: self.test_mode.unwrap_or(false),
        })
    }
}

/// Return the latest run, rescored to the requested strategy/mode when they
/// differ, or synchronously run a fresh analysis.
async fn get_analysis(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let params = query.params(&state.config)?;

    if !params.force_refresh {
        if let Some(latest) = state.orchestrator.latest_result()? {
            let wants_other_view = (query.strategy.is_some() && latest.strategy != params.strategy)
                || (query.execution_mode.is_some()
                    && latest.execution_mode != params.execution_mode);
            if wants_other_view {
                let rescored = state
                    .orchestrator
                    .rescore(params.strategy, params.execution_mode)?;
                return Ok(Json(rescored));
            }
            return Ok(Json(latest));
        }
    }

    let result = state.orchestrator.run_blocking(params).await?;
    Ok(Json(result))
}

/// Trigger a background run: 202 when started, 409 when one is in flight.
async fn trigger_analysis(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let params = query.params(&state.config)?;
    state.orchestrator.trigger(params)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Analysis started",
            "status": "started",
        })),
    ))
}

async fn get_status(State(state): State<AppState>) -> Json<ProgressEvent> {
    Json(state.orchestrator.status())
}

/// Live progress stream.
///
/// Emits the current snapshot immediately, then every subsequent progress
/// event. A keep-alive comment goes out every 15 seconds between events.
/// After a terminal `completed` or `error` event the stream ends and the
/// connection closes.
async fn progress_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    struct StreamState {
        rx: broadcast::Receiver<ProgressEvent>,
        pending: Option<ProgressEvent>,
        done: bool,
    }

    let initial = state.orchestrator.status();
    let stream_state = StreamState {
        rx: state.orchestrator.subscribe(),
        pending: Some(initial),
        done: false,
    };

    let stream = futures_util::stream::unfold(stream_state, |mut s| async move {
        if s.done {
            return None;
        }
        let event = match s.pending.take() {
            Some(event) => event,
            None => loop {
                match s.rx.recv().await {
                    Ok(event) => break event,
                    // A slow consumer may drop intermediate progress ticks;
                    // the next event carries the current state anyway.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        };
        s.done = event.is_terminal();
        let sse_event = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Some((Ok(sse_event), s))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

#[derive(Debug, Default, Deserialize)]
struct RescoreQuery {
    strategy: Option<String>,
    execution_mode: Option<String>,
}

/// Rescore the latest run with a new strategy/mode; never touches upstream.
async fn rescore_analysis(
    State(state): State<AppState>,
    Query(query): Query<RescoreQuery>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let strategy = match &query.strategy {
        Some(raw) => raw.parse().map_err(ApiError::BadRequest)?,
        None => state.config.default_strategy,
    };
    let execution_mode = match &query.execution_mode {
        Some(raw) => raw.parse().map_err(ApiError::BadRequest)?,
        None => state.config.default_execution_mode,
    };

    let result = state.orchestrator.rescore(strategy, execution_mode)?;
    Ok(Json(result))
}

async fn get_strategies(State(state): State<AppState>) -> Json<serde_json::Value> {
    let strategies: Vec<serde_json::Value> = crate::analysis::scoring::all_profiles()
        .iter()
        .map(|p| {
            json!({
                "type": p.strategy.as_str(),
                "name": p.name,
                "description": p.description,
                "volatility_weight": p.volatility_weight,
                "trend_weight": p.trend_weight,
                "roi_weight": p.roi_weight,
                "min_volume_threshold": p.min_volume,
            })
        })
        .collect();

    Json(json!({
        "strategies": strategies,
        "default": state.config.default_strategy.as_str(),
    }))
}

// ===== History =====

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<usize>,
    page_size: Option<usize>,
}

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(10).clamp(1, 100);

    let (runs, total_runs) = state.store.list(page, page_size)?;
    Ok(Json(json!({
        "runs": runs,
        "total_runs": total_runs,
        "page": page,
        "page_size": page_size,
    })))
}

async fn get_run_detail(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<crate::models::RunDetail>, ApiError> {
    state
        .store
        .get(run_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {run_id} not found")))
}

async fn get_run_analysis(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<AnalysisResult>, ApiError> {
    state
        .store
        .get_full(run_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Full analysis for run {run_id} not found")))
}

// ===== Sets =====

#[derive(Debug, Deserialize)]
struct SetsQuery {
    sort_by: Option<String>,
    order: Option<String>,
}

async fn get_sets(
    State(state): State<AppState>,
    Query(query): Query<SetsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sort_by = query.sort_by.unwrap_or_else(|| "name".to_string());
    let order = query.order.unwrap_or_else(|| "asc".to_string());
    let descending = order.eq_ignore_ascii_case("desc");

    let mut sets = state.store.all_sets()?;
    match sort_by.as_str() {
        "slug" => sets.sort_by(|a, b| a.slug.cmp(&b.slug)),
        _ => sets.sort_by(|a, b| a.name.cmp(&b.name)),
    }
    if descending {
        sets.reverse();
    }

    Ok(Json(json!({
        "sets": sets,
        "total_sets": sets.len(),
        "sort_by": sort_by,
        "order": order,
    })))
}

async fn get_set_detail(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let history = state.store.set_history(&slug, 50)?;
    if history.is_empty() {
        return Err(ApiError::NotFound(format!("Set {slug} not found")));
    }

    // Decomposition comes from the catalog snapshot; sets recorded before the
    // current catalog generation simply have no parts listed.
    let cached = state.catalog.cached_sets();
    let definition = cached
        .as_ref()
        .and_then(|sets| sets.iter().find(|s| s.slug == slug));
    let name = definition
        .map(|d| d.name.clone())
        .unwrap_or_else(|| crate::market::wire::title_case_slug(&slug));
    let parts = definition.map(|d| d.parts.clone()).unwrap_or_default();

    let latest = &history[0];
    Ok(Json(json!({
        "slug": slug,
        "name": name,
        "current_price": latest.lowest_price,
        "current_profit": latest.profit_margin,
        "parts": parts,
        "history": history,
    })))
}

#[derive(Debug, Deserialize)]
struct SetHistoryQuery {
    days: Option<u32>,
}

async fn get_set_history(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<SetHistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let days = query.days.unwrap_or(30).clamp(1, 365);
    let history = state.store.profit_trends(&slug, days)?;
    if history.is_empty() {
        return Err(ApiError::NotFound(format!(
            "Set {slug} not found or has no history"
        )));
    }

    Ok(Json(json!({
        "slug": slug,
        "days": days,
        "data_points": history.len(),
        "history": history,
    })))
}

// ===== Stats =====

async fn get_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.store.stats()?;
    let cached_sets = state.catalog.cached_sets().map(|s| s.len());

    Ok(Json(json!({
        "database": stats,
        "analysis": {
            "cache_age_seconds": state.catalog.cache_age_secs(),
            "last_analysis": stats.last_run,
            "total_sets": cached_sets,
        },
    })))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "Set Arbitrage Analyzer API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ===== Export =====

async fn export_data(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.store.export_json()?))
}

/// Write the export file and serve it as a download.
async fn export_file(State(state): State<AppState>) -> Result<Response, ApiError> {
    let path = state.config.export_file_path();
    state.store.save_export(&path)?;
    let body = std::fs::read(&path)
        .map_err(|e| ApiError::Internal(format!("export file unreadable: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"market_data_export.json\"".to_string(),
            ),
        ],
        body,
    )
        .into_response())
}

async fn export_summary(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.store.stats()?;
    Ok(Json(json!({
        "total_runs": stats.total_runs,
        "total_records": stats.total_set_records,
        "database_size_bytes": stats.database_size_bytes,
        "first_run": stats.first_run,
        "last_run": stats.last_run,
        "export_available": stats.total_runs > 0,
    })))
}

// ===== Error handling =====

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict { detail: String, run_id: Option<i64> },
    Unavailable(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(msg) => ApiError::NotFound(msg),
            EngineError::Conflict { run_id } => ApiError::Conflict {
                detail: "Analysis already in progress".to_string(),
                run_id,
            },
            EngineError::RateLimited(_) | EngineError::Upstream(_) | EngineError::Timeout(_) => {
                ApiError::Unavailable(err.to_string())
            }
            EngineError::Parse(_)
            | EngineError::Invariant(_)
            | EngineError::Storage(_)
            | EngineError::Cancelled(_)
            | EngineError::Config(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::Conflict { detail, run_id } => (
                StatusCode::CONFLICT,
                Json(json!({ "detail": detail, "run_id": run_id })),
            )
                .into_response(),
            ApiError::Unavailable(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "detail": detail })),
            )
                .into_response(),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": detail })),
                )
                    .into_response()
            }
        }
    }
}
