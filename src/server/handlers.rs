//! HTTP request handlers for the document API.
//!
//! # Endpoints
//!
//! - `POST /documents` - Ingest a container (body = raw bytes)
//! - `GET /documents/{id}` - Document metadata
//! - `GET /documents/{id}/ready` - Readiness and frame count
//! - `GET /documents/{id}/frames` - Frame indices
//! - `GET /documents/{id}/frames/{index}.jpg` - One frame
//! - `GET /documents/{id}/flattened` - Flattened cross-section (PNG)
//! - `GET /documents/{id}/eyes` - Left/right image groups
//! - `GET /documents/{id}/eyes/{side}` - Image keys of one eye
//! - `GET /documents/{id}/eyes/{side}/{n}` - The n-th image of one eye
//! - `GET /documents/{id}/images/{key}` - An image by key
//! - `GET /checksum` - Descriptor checksum for a remote object
//! - `GET /cache/status` - Cache occupancy
//! - `GET /support` - Decoder backends and readers
//! - `GET /health` - Health check

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::checksum::{Checksum, ChecksumSource, RemoteDescriptor};
use crate::error::{ExtractionError, FrameError, IngestError, ReaderError};
use crate::format::{EyeSide, SourceFile};
use crate::ingest::{
    CacheStatus, DocumentInfo, DocumentSummary, IngestRequest, IngestService, SupportReport,
};
use crate::store::{EyeTree, Readiness};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<IngestService>,

    /// Cache-Control max-age for frame images, in seconds
    pub cache_max_age: u32,
}

impl AppState {
    pub fn new(service: Arc<IngestService>) -> Self {
        Self {
            service,
            cache_max_age: 3600,
        }
    }

    pub fn with_cache_max_age(service: Arc<IngestService>, cache_max_age: u32) -> Self {
        Self {
            service,
            cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for `POST /documents`.
#[derive(Debug, Deserialize)]
pub struct IngestQueryParams {
    /// Original file name; drives format and laterality detection
    #[serde(default = "default_file_name")]
    pub name: String,

    #[serde(default)]
    pub document_id: Option<String>,

    /// Precomputed checksum (8 hex digits)
    #[serde(default)]
    pub checksum: Option<Checksum>,
}

fn default_file_name() -> String {
    "upload".to_string()
}

/// Path parameters for frame requests.
///
/// `filename` is `{index}` or `{index}.jpg`.
#[derive(Debug, Deserialize)]
pub struct FramePathParams {
    pub document_id: String,
    pub filename: String,
}

impl FramePathParams {
    pub fn index(&self) -> Result<u32, std::num::ParseIntError> {
        let index = self.filename.strip_suffix(".jpg").unwrap_or(&self.filename);
        index.parse()
    }
}

/// Query parameters for `GET /checksum`.
#[derive(Debug, Deserialize)]
pub struct ChecksumQueryParams {
    pub path: String,

    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub last_modified: Option<String>,

    #[serde(default)]
    pub frame: Option<u32>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "decode_failed")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Remediation hints for undecodable pixel data
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            status: Some(status.as_u16()),
            ..Self::new(error, message)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct FramesResponse {
    pub document_id: String,
    pub frames: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct EyeFramesResponse {
    pub document_id: String,
    pub side: EyeSide,
    pub frames: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChecksumResponse {
    pub checksum: Checksum,
    pub source: ChecksumSource,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Every error a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Ingest(IngestError),
    Frame(FrameError),
    BadRequest {
        error_type: &'static str,
        message: String,
    },
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Ingest(err)
    }
}

impl From<FrameError> for ApiError {
    fn from(err: FrameError) -> Self {
        ApiError::Frame(err)
    }
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest { error_type, .. } => (StatusCode::BAD_REQUEST, *error_type),

            ApiError::Ingest(err) => match err {
                IngestError::Reader(ReaderError::Unsupported { .. }) => {
                    (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format")
                }
                IngestError::Reader(ReaderError::Io(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
                IngestError::Reader(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_container"),
                IngestError::Extraction(_) => (StatusCode::UNPROCESSABLE_ENTITY, "decode_failed"),
                IngestError::Normalize(_) => (StatusCode::UNPROCESSABLE_ENTITY, "normalization_failed"),
                IngestError::EmptyVolume => (StatusCode::UNPROCESSABLE_ENTITY, "empty_volume"),
                IngestError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
                IngestError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },

            ApiError::Frame(err) => match err {
                FrameError::DocumentNotFound { .. } | FrameError::FrameNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "not_found")
                }
                FrameError::NotReady { .. } => (StatusCode::CONFLICT, "not_ready"),
                FrameError::NotDualEye { .. } => (StatusCode::BAD_REQUEST, "not_dual_eye"),
                FrameError::NotVolume { .. } => (StatusCode::BAD_REQUEST, "not_volume"),
                FrameError::NothingToFlatten { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "nothing_to_flatten")
                }
                FrameError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
                FrameError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Ingest(err) => err.to_string(),
            ApiError::Frame(err) => err.to_string(),
            ApiError::BadRequest { message, .. } => message.clone(),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            ApiError::Ingest(IngestError::Extraction(ExtractionError::Exhausted { suggestions, .. })) => {
                suggestions.clone()
            }
            _ => Vec::new(),
        }
    }
}

/// Logs 5xx at error, 404 at debug and other 4xx at warn.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();
        let message = self.message();

        if status.is_server_error() {
            error!(error_type, status = status.as_u16(), "Server error: {}", message);
        } else if status == StatusCode::NOT_FOUND {
            debug!(error_type, status = status.as_u16(), "Resource not found: {}", message);
        } else {
            warn!(error_type, status = status.as_u16(), "Client error: {}", message);
        }

        let mut body = ErrorResponse::with_status(error_type, message, status);
        body.suggestions = self.suggestions();

        (status, Json(body)).into_response()
    }
}

fn parse_side(side: &str) -> Result<EyeSide, ApiError> {
    EyeSide::parse(side).ok_or_else(|| ApiError::BadRequest {
        error_type: "invalid_side",
        message: format!("Invalid eye side: {} (expected L or R)", side),
    })
}

fn image_response(content_type: &str, cache_control: String, etag: Option<String>, data: Bytes) -> Response {
    let mut response = (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, cache_control),
        ],
        data,
    )
        .into_response();

    if let Some(value) = etag.and_then(|tag| tag.parse().ok()) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

// =============================================================================
// Handlers
// =============================================================================

/// Ingest a container.
///
/// # Endpoint
///
/// `POST /documents?name={file name}&document_id={id}&checksum={crc}`
///
/// The ingestion runs on its own task, so a client disconnect does not
/// abort it; the result still lands in both caches.
///
/// # Response
///
/// - `200 OK`: [`DocumentSummary`] (`cache_source` is `not_supported` for
///   formats that are not processed)
/// - `415`/`422`: the container could not be read or decoded
pub async fn ingest_handler(
    State(state): State<AppState>,
    Query(query): Query<IngestQueryParams>,
    body: Bytes,
) -> Result<Json<DocumentSummary>, ApiError> {
    let mut request = IngestRequest::new(SourceFile::new(query.name, body));
    request.document_id = query.document_id;
    request.checksum = query.checksum;

    let service = state.service.clone();
    let summary = tokio::spawn(async move { service.ingest(request).await })
        .await
        .map_err(|e| IngestError::Internal(e.to_string()))??;

    Ok(Json(summary))
}

/// `GET /documents/{id}`
pub async fn document_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentInfo>, ApiError> {
    Ok(Json(state.service.document_info(&document_id).await?))
}

/// `GET /documents/{id}/ready`
pub async fn ready_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Json<Readiness> {
    Json(state.service.is_ready(&document_id).await)
}

/// `GET /documents/{id}/frames`
pub async fn frames_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<FramesResponse>, ApiError> {
    let frames = state.service.frame_indices(&document_id).await?;
    Ok(Json(FramesResponse { document_id, frames }))
}

/// Serve one frame.
///
/// # Endpoint
///
/// `GET /documents/{id}/frames/{index}.jpg`
///
/// # Headers
///
/// - `Content-Type: image/jpeg`
/// - `Cache-Control: public, max-age={cache_max_age}, immutable`
/// - `ETag: "{checksum}-{index}"`
pub async fn frame_handler(
    State(state): State<AppState>,
    Path(params): Path<FramePathParams>,
) -> Result<Response, ApiError> {
    let index = params.index().map_err(|_| ApiError::BadRequest {
        error_type: "invalid_frame",
        message: format!("Invalid frame index: {}", params.filename),
    })?;

    let record = state.service.store().record(&params.document_id).await?;
    let data = state.service.get_frame(&params.document_id, index).await?;

    Ok(image_response(
        "image/jpeg",
        format!("public, max-age={}, immutable", state.cache_max_age),
        Some(format!("\"{}-{}\"", record.checksum, index)),
        data,
    ))
}

/// `GET /documents/{id}/flattened` - PNG, computed on first request.
pub async fn flattened_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Response, ApiError> {
    let data = state.service.get_flattened(&document_id).await?;
    Ok(image_response(
        "image/png",
        format!("private, max-age={}", state.cache_max_age),
        None,
        data,
    ))
}

/// `GET /documents/{id}/eyes`
pub async fn eyes_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<EyeTree>, ApiError> {
    Ok(Json(state.service.eye_tree(&document_id).await?))
}

/// `GET /documents/{id}/eyes/{side}` - keys of one eye, fundus first.
pub async fn eye_frames_handler(
    State(state): State<AppState>,
    Path((document_id, side)): Path<(String, String)>,
) -> Result<Json<EyeFramesResponse>, ApiError> {
    let side = parse_side(&side)?;
    let frames = state.service.list_eye_frames(&document_id, side).await?;
    Ok(Json(EyeFramesResponse {
        document_id,
        side,
        frames,
    }))
}

/// `GET /documents/{id}/eyes/{side}/{n}`
pub async fn eye_frame_handler(
    State(state): State<AppState>,
    Path((document_id, side, n)): Path<(String, String, usize)>,
) -> Result<Response, ApiError> {
    let side = parse_side(&side)?;
    let data = state.service.get_eye_frame(&document_id, side, n).await?;
    Ok(image_response(
        "image/jpeg",
        format!("public, max-age={}", state.cache_max_age),
        None,
        data,
    ))
}

/// `GET /documents/{id}/images/{key}`
pub async fn image_handler(
    State(state): State<AppState>,
    Path((document_id, key)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let data = state.service.get_aux_frame(&document_id, &key).await?;
    Ok(image_response(
        "image/jpeg",
        format!("public, max-age={}", state.cache_max_age),
        None,
        data,
    ))
}

/// `GET /checksum?path=&size=&last_modified=&frame=`
pub async fn checksum_handler(
    State(state): State<AppState>,
    Query(query): Query<ChecksumQueryParams>,
) -> Json<ChecksumResponse> {
    let descriptor = RemoteDescriptor {
        path: query.path,
        size: query.size,
        last_modified: query.last_modified,
        frame: query.frame,
    };
    let (checksum, source) = state.service.checksum_for_descriptor(&descriptor).await;
    Json(ChecksumResponse { checksum, source })
}

/// `GET /cache/status`
pub async fn cache_status_handler(State(state): State<AppState>) -> Json<CacheStatus> {
    Json(state.service.cache_status().await)
}

/// `GET /support`
pub async fn support_handler(State(state): State<AppState>) -> Json<SupportReport> {
    Json(state.service.support_status())
}

/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
