//! Router configuration for the document API.
//!
//! # Route Structure
//!
//! ```text
//! /health                                   - Health check
//! /documents                                - Ingest (POST)
//! /documents/{id}                           - Document metadata
//! /documents/{id}/ready                     - Readiness
//! /documents/{id}/frames[/{index}.jpg]      - Frames
//! /documents/{id}/flattened                 - Flattened cross-section
//! /documents/{id}/eyes[/{side}[/{n}]]       - Dual-eye groups
//! /documents/{id}/images/{key}              - Keyed images
//! /checksum, /cache/status, /support        - Service info
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use oct_streamer::{FrameCache, IngestService};
//! use oct_streamer::server::{create_router, RouterConfig};
//!
//! let service = Arc::new(IngestService::new(FrameCache::new("cache")));
//! let router = create_router(service, RouterConfig::new());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use http::header::{CONTENT_TYPE, ETAG};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    cache_status_handler, checksum_handler, document_handler, eye_frame_handler,
    eye_frames_handler, eyes_handler, flattened_handler, frame_handler, frames_handler,
    health_handler, image_handler, ingest_handler, ready_handler, support_handler, AppState,
};
use crate::ingest::IngestService;

/// Default upload limit: 2 GiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 2048 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age for images, in seconds
    pub cache_max_age: u32,

    /// Largest accepted upload body, in bytes
    pub max_upload_bytes: usize,

    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Any CORS origin, 1 hour max-age, 2 GiB uploads, tracing on.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Build the application router over a shared ingestion service.
pub fn create_router(service: Arc<IngestService>, config: RouterConfig) -> Router {
    let app_state = AppState::with_cache_max_age(service, config.cache_max_age);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/checksum", get(checksum_handler))
        .route("/cache/status", get(cache_status_handler))
        .route("/support", get(support_handler))
        .route(
            "/documents",
            post(ingest_handler).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route("/documents/{document_id}", get(document_handler))
        .route("/documents/{document_id}/ready", get(ready_handler))
        .route("/documents/{document_id}/frames", get(frames_handler))
        .route("/documents/{document_id}/frames/{filename}", get(frame_handler))
        .route("/documents/{document_id}/flattened", get(flattened_handler))
        .route("/documents/{document_id}/eyes", get(eyes_handler))
        .route("/documents/{document_id}/eyes/{side}", get(eye_frames_handler))
        .route("/documents/{document_id}/eyes/{side}/{n}", get(eye_frame_handler))
        .route("/documents/{document_id}/images/{key}", get(image_handler))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([ETAG])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
