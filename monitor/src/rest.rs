use crate::advice::{request_farm_advice, request_weather};
use crate::agent::AgentRegistry;
use crate::dashboard::{DashboardService, DashboardSnapshot, SettingsUpdate};
use crate::errors::Error;
use crate::measurements::{fetch_in_window, fetch_recent, DEFAULT_RECENT_LIMIT};
use crate::model::{AdviceResult, MeasurementsResult, WeatherReport};
use crate::query::{MeasureName, TimeWindow};
use crate::store::TimeSeriesStore;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TimeSeriesStore>,
    pub agents: Arc<AgentRegistry>,
    pub dashboard: Arc<DashboardService>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    window: Option<String>,
    measure_name: Option<String>,
    limit: Option<u32>,
}

/// A reading sent either as text or as a bare JSON number
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Text(String),
    Number(serde_json::Number),
}

impl Reading {
    fn into_text(self) -> String {
        match self {
            Reading::Text(text) => text,
            Reading::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdviceRequest {
    temperature: Option<Reading>,
    humidity: Option<Reading>,
    #[serde(default)]
    time: String,
}

#[derive(Debug, Deserialize)]
pub struct WeatherRequest {
    city: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_text))
        .route("/health", get(health))
        .route("/api/v1/measurements/recent", get(get_recent))
        .route("/api/v1/measurements", get(get_in_window))
        .route("/api/v1/advice", post(post_advice))
        .route("/api/v1/weather", post(post_weather))
        .route("/api/v1/dashboard", get(get_dashboard))
        .route("/api/v1/dashboard/refresh", post(refresh_dashboard))
        .route("/api/v1/dashboard/settings", put(update_settings))
        .route("/api/v1/dashboard/toggle/table", post(toggle_table))
        .route("/api/v1/dashboard/toggle/advisor", post(toggle_advisor))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn dashboard_text(State(state): State<AppState>) -> String {
    state.dashboard.render_text().await
}

async fn get_recent(
    State(state): State<AppState>,
    Query(params): Query<RecentQuery>,
) -> Json<MeasurementsResult> {
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Json(fetch_recent(state.store.as_ref(), limit).await)
}

async fn get_in_window(
    State(state): State<AppState>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<MeasurementsResult>, AppError> {
    let window = match params.window.as_deref() {
        Some(token) => token.parse()?,
        None => TimeWindow::default(),
    };
    let measure_name = MeasureName::parse_optional(params.measure_name.as_deref())?;
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    if limit == 0 {
        return Err(Error::Validation("Limit must be a positive integer".to_string()).into());
    }

    Ok(Json(
        fetch_in_window(state.store.as_ref(), window, measure_name, limit).await,
    ))
}

async fn post_advice(
    State(state): State<AppState>,
    Json(request): Json<AdviceRequest>,
) -> Json<AdviceResult> {
    let temperature = request.temperature.map(Reading::into_text);
    let humidity = request.humidity.map(Reading::into_text);

    Json(
        request_farm_advice(
            &state.agents,
            temperature.as_deref(),
            humidity.as_deref(),
            &request.time,
        )
        .await,
    )
}

async fn post_weather(
    State(state): State<AppState>,
    Json(request): Json<WeatherRequest>,
) -> Json<WeatherReport> {
    Json(request_weather(&state.agents, &request.city).await)
}

async fn get_dashboard(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    Json(state.dashboard.snapshot().await)
}

async fn refresh_dashboard(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    state.dashboard.refresh().await;
    Json(state.dashboard.snapshot().await)
}

async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<DashboardSnapshot>, AppError> {
    state.dashboard.update_settings(update).await?;
    Ok(Json(state.dashboard.snapshot().await))
}

async fn toggle_table(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    state.dashboard.toggle_table().await;
    Json(state.dashboard.snapshot().await)
}

async fn toggle_advisor(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    state.dashboard.toggle_advisor().await;
    Json(state.dashboard.snapshot().await)
}

pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("API error: {}", self.error);
        }
        (self.status, self.error.to_string()).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            error: err.into(),
        }
    }
}
