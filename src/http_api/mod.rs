use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{Season, SeasonWeek, SyncStatus, persistence::DocumentStore};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn DocumentStore>,
    status: watch::Receiver<SyncStatus>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, status: watch::Receiver<SyncStatus>) -> Self {
        Self { store, status }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

#[derive(Debug)]
enum ApiError {
    MissingData(String),
    NotFound(String),
    Processing(String),
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    date: Option<String>,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    fn processing(message: impl Into<String>) -> Self {
        ApiError::Processing(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::MissingData(message) => (StatusCode::BAD_REQUEST, "MISSING_DATA", message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
            ApiError::Processing(message) => {
                warn!(%message, "request processing failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "PROCESSING_ERROR", message)
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync/status", get(sync_status))
        .route("/seasons/:id/weeks", get(list_weeks))
        .route("/seasons/:id/weeks/:number", get(get_week))
        .route("/seasons/:id/lookup", get(lookup_week))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http api listening");
    axum::serve(listener, app).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn sync_status(State(state): State<AppState>) -> Json<SyncStatus> {
    let status = state.status.borrow().clone();
    Json(status)
}

async fn load_season(state: &AppState, id: &str) -> Result<Season, ApiError> {
    let doc = state
        .store
        .get(id)
        .await
        .map_err(|err| ApiError::processing(err.to_string()))?
        .ok_or_else(|| ApiError::not_found(format!("season {id} not found")))?;
    Season::try_from(&doc).map_err(|err| ApiError::processing(err.to_string()))
}

async fn list_weeks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SeasonWeek>>, ApiError> {
    let season = load_season(&state, &id).await?;
    Ok(Json(season.season_weeks().cloned().collect()))
}

async fn get_week(
    State(state): State<AppState>,
    Path((id, number)): Path<(String, u32)>,
) -> Result<Json<SeasonWeek>, ApiError> {
    let season = load_season(&state, &id).await?;
    season
        .season_week_by_number(number)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("season {id} has no week {number}")))
}

async fn lookup_week(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<LookupParams>,
) -> Result<Json<SeasonWeek>, ApiError> {
    let raw = params
        .date
        .ok_or_else(|| ApiError::MissingData("query parameter 'date' is required".into()))?;
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::MissingData(format!("'{raw}' is not a YYYY-MM-DD date")))?;
    let season = load_season(&state, &id).await?;
    season
        .season_week(date)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("{date} is outside season {id}")))
}
