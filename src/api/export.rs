//! Export API endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState};
use crate::models::{ExportLog, PagedResult};
use crate::services::export::{ExportRequest, ExportResult};

/// Build the export router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_export))
        .route("/history", get(get_history))
}

/// POST /api/v1/admin/export - Export data and store it as a backup file
async fn create_export(
    State(state): State<AppState>,
    Json(body): Json<ExportRequest>,
) -> Result<(StatusCode, Json<ExportResult>), ApiError> {
    let result = state.export_service.export(body).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /api/v1/admin/export/history - Paginated export logs
async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<ExportLog>>, ApiError> {
    let history = state.export_service.history(&query.params()).await?;
    Ok(Json(history))
}
