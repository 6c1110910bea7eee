//! Backup API endpoints
//!
//! Handles HTTP requests for stored artifacts:
//! - Listing, creating and deleting snapshots
//! - Downloading any tracked file with ETag revalidation
//! - Rolling back to a snapshot

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    cache_control_private, check_if_none_match, etag_for_hash, ApiError, AppState,
};
use crate::models::{BackupFile, BackupKind, ListParams, PagedResult};
use crate::services::backup::RollbackSummary;

/// Query for backup listings
#[derive(Debug, Deserialize)]
pub struct BackupListQuery {
    #[serde(default = "crate::api::common::default_page")]
    pub page: u32,
    #[serde(default = "crate::api::common::default_per_page", alias = "perPage")]
    pub per_page: u32,
    pub kind: Option<BackupKind>,
}

/// Request for creating a snapshot
#[derive(Debug, Default, Deserialize)]
pub struct SnapshotRequest {
    #[serde(default)]
    pub note: Option<String>,
}

/// Request for a rollback
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    pub backup_id: i64,
    #[serde(default)]
    pub confirm_rollback: bool,
    #[serde(default = "default_safety_backup")]
    pub create_safety_backup: bool,
}

fn default_safety_backup() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
    pub backup_id: i64,
}

/// Build the backups router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_backups).post(create_snapshot))
        .route("/rollback", post(rollback))
        .route("/{id}", delete(delete_backup))
        .route("/{id}/download", get(download_backup))
}

/// GET /api/v1/admin/backups - Paginated backup files, optionally by kind
async fn list_backups(
    State(state): State<AppState>,
    Query(query): Query<BackupListQuery>,
) -> Result<Json<PagedResult<BackupFile>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    let backups = state.backup_service.list_backups(&params, query.kind).await?;
    Ok(Json(backups))
}

/// POST /api/v1/admin/backups - Snapshot every pipeline table
async fn create_snapshot(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<BackupFile>), ApiError> {
    // An empty body is a snapshot without a note
    let request: SnapshotRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SnapshotRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::validation_error(e.to_string()))?
    };
    let note = request.note;
    let file = state.backup_service.create_snapshot(note).await?;
    Ok((StatusCode::CREATED, Json(file)))
}

/// DELETE /api/v1/admin/backups/{id}
async fn delete_backup(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.backup_service.delete_backup(id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        backup_id: id,
    }))
}

/// GET /api/v1/admin/backups/{id}/download - Decompressed file content
///
/// The ETag is the content hash, so a matching If-None-Match is answered
/// with 304 before the blob is read.
async fn download_backup(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file = state.backup_service.get(id).await?;
    if let Some(hash) = file.content_hash.as_deref() {
        if let Some(not_modified) = check_if_none_match(&headers, &etag_for_hash(hash)) {
            return Ok(not_modified);
        }
    }

    let download = state.backup_service.download(id).await?;
    let mut response = (
        [
            (header::CONTENT_TYPE, download.content_type.to_string()),
            (header::CACHE_CONTROL, cache_control_private(3600)),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.filename),
            ),
        ],
        download.bytes,
    )
        .into_response();

    if let Some(hash) = download.content_hash.as_deref() {
        if let Ok(value) = etag_for_hash(hash).parse() {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    Ok(response)
}

/// POST /api/v1/admin/backups/rollback - Restore a snapshot
async fn rollback(
    State(state): State<AppState>,
    Json(body): Json<RollbackRequest>,
) -> Result<Json<RollbackSummary>, ApiError> {
    let summary = state
        .backup_service
        .rollback(body.backup_id, body.confirm_rollback, body.create_safety_backup)
        .await?;
    Ok(Json(summary))
}
