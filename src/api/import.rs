//! Import API endpoints
//!
//! Handles HTTP requests for import jobs:
//! - Submitting one entity type or a whole bundle
//! - Cancelling a running job
//! - Import history
//! - Downloading a job's report

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState};
use crate::api::progress;
use crate::models::{DataType, ImportLog, PagedResult, ReportFormat};
use crate::services::import::{ImportAccepted, ImportRequest};

/// Response for a cancellation request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub import_id: String,
    pub message: String,
}

/// Query for report downloads
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

/// Build the import router
///
/// Every dynamic segment is named `id`; for submissions it carries the data
/// type.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/history", get(get_history))
        .route("/progress/{id}", get(progress::get_progress))
        .route("/{id}", post(submit_import))
        .route("/{id}/cancel", post(cancel_import))
        .route("/{id}/report", get(get_report))
}

/// POST /api/v1/admin/import/{data_type} - Start an import job
///
/// `all` takes `{zipBase64 | bundle, options, filename}`, every other data
/// type takes `{data, format, options, filename}`.
async fn submit_import(
    State(state): State<AppState>,
    Path(data_type): Path<String>,
    Json(body): Json<ImportRequest>,
) -> Result<(StatusCode, Json<ImportAccepted>), ApiError> {
    let data_type: DataType = data_type.parse().map_err(ApiError::validation_error)?;
    let accepted = state.import_service.submit(data_type, body).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// POST /api/v1/admin/import/{id}/cancel - Stop a job after its current batch
async fn cancel_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    state.import_service.cancel(&id)?;
    Ok(Json(CancelResponse {
        success: true,
        message: "Cancellation requested".to_string(),
        import_id: id,
    }))
}

/// GET /api/v1/admin/import/history - Paginated import logs
async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PagedResult<ImportLog>>, ApiError> {
    let history = state.import_service.history(&query.params()).await?;
    Ok(Json(history))
}

/// GET /api/v1/admin/import/{id}/report?format=ndjson|csv - Stored report
async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let format = query
        .format
        .as_deref()
        .map(str::parse::<ReportFormat>)
        .transpose()
        .map_err(ApiError::validation_error)?;

    let report = state.import_service.report(&id, format).await?;
    Ok((
        [
            (header::CONTENT_TYPE, report.format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", report.filename),
            ),
        ],
        report.bytes,
    )
        .into_response())
}
