//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The JSON error type and its mapping from service errors
//! - Admin bearer-token guard
//! - ETag and Cache-Control helpers for downloads

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::services::backup::BackupError;
use crate::services::export::ExportError;
use crate::services::import::ImportError;
use crate::services::progress::ProgressError;
use crate::services::{BackupService, ExportService, ImportService, ProgressStore};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: crate::db::DynDatabasePool,
    pub progress: ProgressStore,
    pub import_service: Arc<ImportService>,
    pub export_service: Arc<ExportService>,
    pub backup_service: Arc<BackupService>,
    /// Bearer tokens accepted on admin routes
    pub admin_tokens: Arc<Vec<String>>,
    /// Interval between SSE heartbeat events
    pub heartbeat: Duration,
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}: {}", self.error.code, self.error.message);
        }
        (status, Json(self)).into_response()
    }
}

impl From<ImportError> for ApiError {
    fn from(e: ImportError) -> Self {
        match e {
            ImportError::Format(_) | ImportError::InvalidRequest(_) => {
                ApiError::validation_error(e.to_string())
            }
            ImportError::NotFound(_) | ImportError::ReportNotFound(_) => {
                ApiError::not_found(e.to_string())
            }
            ImportError::AlreadyFinished(_) => ApiError::conflict(e.to_string()),
            ImportError::Backup(inner) => inner.into(),
            ImportError::InternalError(_) => ApiError::internal_error(e.to_string()),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::Format(_) => ApiError::validation_error(e.to_string()),
            ExportError::Backup(inner) => inner.into(),
            ExportError::InternalError(_) => ApiError::internal_error(e.to_string()),
        }
    }
}

impl From<BackupError> for ApiError {
    fn from(e: BackupError) -> Self {
        match e {
            BackupError::NotFound(_) => ApiError::not_found(e.to_string()),
            BackupError::Unavailable(id) => ApiError::with_details(
                "CONFLICT",
                e.to_string(),
                serde_json::json!({"backupId": id}),
            ),
            BackupError::ConfirmationRequired | BackupError::InvalidSnapshot(_) => {
                ApiError::validation_error(e.to_string())
            }
            BackupError::Storage(_) | BackupError::InternalError(_) => {
                ApiError::internal_error(e.to_string())
            }
        }
    }
}

impl From<ProgressError> for ApiError {
    fn from(e: ProgressError) -> Self {
        match e {
            ProgressError::NotFound(_) => ApiError::not_found(e.to_string()),
            ProgressError::Finalized(_) => ApiError::conflict(e.to_string()),
            _ => ApiError::internal_error(e.to_string()),
        }
    }
}

/// Extract the bearer token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Admin authorization middleware
///
/// With no configured tokens every admin request is rejected.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("Missing admin token"))?;

    if !state.admin_tokens.iter().any(|t| t == token) {
        return Err(ApiError::unauthorized("Invalid admin token"));
    }

    Ok(next.run(request).await)
}

// ============================================================================
// HTTP Cache Headers
// ============================================================================

/// Strong ETag from a stored content hash
pub fn etag_for_hash(hash: &str) -> String {
    format!("\"{}\"", hash)
}

/// Check if an If-None-Match value matches an ETag
pub fn etag_matches(request_etag: Option<&str>, response_etag: &str) -> bool {
    match request_etag {
        Some(etag) => etag.split(',').map(str::trim).any(|candidate| {
            candidate == "*" || candidate.trim_start_matches("W/") == response_etag.trim_start_matches("W/")
        }),
        None => false,
    }
}

/// Build Cache-Control header for private content
pub fn cache_control_private(max_age: u32) -> String {
    format!("private, max-age={}", max_age)
}

/// 304 response when If-None-Match matches
pub fn check_if_none_match(headers: &HeaderMap, etag: &str) -> Option<Response> {
    let if_none_match = headers.get(header::IF_NONE_MATCH)?.to_str().ok()?;
    if !etag_matches(Some(if_none_match), etag) {
        return None;
    }
    Some(
        (
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag.to_string()),
                (header::CACHE_CONTROL, cache_control_private(3600)),
            ],
        )
            .into_response(),
    )
}


#[cfg(test)]
mod cache_header_property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn etag_matches_itself(hash in "[0-9a-f]{8,64}") {
            let etag = etag_for_hash(&hash);
            prop_assert!(etag_matches(Some(&etag), &etag));
            prop_assert!(!etag_matches(None, &etag));
        }

        #[test]
        fn private_cache_control_never_public(max_age in 1u32..=86400u32) {
            let header = cache_control_private(max_age);
            let expected = format!("max-age={}", max_age);
            prop_assert!(header.contains("private") && !header.contains("public"));
            prop_assert!(header.contains(&expected));
        }
    }
}
