//! # API Handlers
//!
//! Axum handlers for the datasource, the stateless model helpers and the
//! dashboards store.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use fq_core::{QueryModel, Variant};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dashboards::{CreateDashboardRequest, Dashboard, DashboardError, UpdateDashboardRequest};
use crate::datasource::{HealthResult, QueryDataRequest, QueryDataResponse};
use crate::AppState;

type ApiError = (StatusCode, String);

fn dashboard_error(e: DashboardError) -> ApiError {
    let status = match e {
        DashboardError::NotFound(_) | DashboardError::PanelNotFound { .. } => StatusCode::NOT_FOUND,
        DashboardError::Io(_) | DashboardError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

// =============================================================================
// Datasource
// =============================================================================

pub async fn query_data(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryDataRequest>,
) -> Json<QueryDataResponse> {
    Json(state.datasource.query_data(req).await)
}

pub async fn check_health(State(state): State<Arc<AppState>>) -> Json<HealthResult> {
    Json(state.datasource.check_health().await)
}

pub async fn list_collections(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, ApiError> {
    state
        .datasource
        .collections()
        .await
        .map(Json)
        .map_err(|e| {
            let status = StatusCode::from_u16(e.status()).unwrap_or(StatusCode::BAD_REQUEST);
            (status, e.to_string())
        })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub project_id: String,
    pub emulator: bool,
    pub dashboards: usize,
    pub quiet_period_ms: u64,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let ctx = state.datasource.context();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        project_id: ctx.project_id.clone(),
        emulator: ctx.emulator_host.is_some(),
        dashboards: state.dashboards.list().await.len(),
        quiet_period_ms: state.quiet_period.as_millis() as u64,
    })
}

// =============================================================================
// Model Helpers
// =============================================================================

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub variant: Variant,
    pub display: String,
    pub executable: bool,
    pub model: QueryModel,
}

impl From<QueryModel> for RenderResponse {
    fn from(model: QueryModel) -> Self {
        Self {
            variant: model.variant(),
            display: model.to_display_string(),
            executable: model.is_executable(),
            model,
        }
    }
}

/// Normalize a model and return its display text.
pub async fn render(Json(model): Json<QueryModel>) -> Json<RenderResponse> {
    Json(model.into())
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub model: QueryModel,
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

/// Apply one field edit to a model without a session.
pub async fn edit(Json(req): Json<EditRequest>) -> Result<Json<RenderResponse>, ApiError> {
    req.model
        .with_field_changed(&req.field, &req.value)
        .map(|model| Json(model.into()))
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

// =============================================================================
// Dashboards
// =============================================================================

pub async fn list_dashboards(State(state): State<Arc<AppState>>) -> Json<Vec<Dashboard>> {
    Json(state.dashboards.list().await)
}

pub async fn create_dashboard(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDashboardRequest>,
) -> Result<Json<Dashboard>, ApiError> {
    let dashboard = state.dashboards.create(req).await.map_err(dashboard_error)?;
    tracing::info!(id = %dashboard.id, "Created dashboard");
    Ok(Json(dashboard))
}

pub async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Dashboard>, ApiError> {
    state
        .dashboards
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| dashboard_error(DashboardError::NotFound(id)))
}

pub async fn update_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDashboardRequest>,
) -> Result<Json<Dashboard>, ApiError> {
    let dashboard = state
        .dashboards
        .update(&id, req)
        .await
        .map_err(dashboard_error)?;
    Ok(Json(dashboard))
}

pub async fn delete_dashboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.dashboards.delete(&id).await.map_err(dashboard_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_panel_query(
    State(state): State<Arc<AppState>>,
    Path((id, panel)): Path<(String, String)>,
) -> Result<Json<QueryModel>, ApiError> {
    state
        .dashboards
        .panel_query(&id, &panel)
        .await
        .map(Json)
        .map_err(dashboard_error)
}

pub async fn save_panel_query(
    State(state): State<Arc<AppState>>,
    Path((id, panel)): Path<(String, String)>,
    Json(model): Json<QueryModel>,
) -> Result<Json<Dashboard>, ApiError> {
    let dashboard = state
        .dashboards
        .save_panel_query(&id, &panel, model)
        .await
        .map_err(dashboard_error)?;
    Ok(Json(dashboard))
}
