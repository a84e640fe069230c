//! HTTP layer over the ingestion service.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   POST /documents          GET /documents/{id}/frames/{n}.jpg   │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │           routes            │  │
//! │  │ (requests, error → JSON) │  │ (router, CORS, body limit)  │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    ApiError, AppState, ChecksumResponse, ErrorResponse, EyeFramesResponse, FramesResponse,
    HealthResponse,
};
pub use routes::{create_router, RouterConfig, DEFAULT_MAX_UPLOAD_BYTES};
