//! API integration tests for ingestion, frame retrieval and error handling.
//!
//! Tests verify:
//! - Upload → frames → flattened round trip over HTTP
//! - Response codes and JSON error bodies for every failure class
//! - Image headers (content type, cache control, ETag)
//! - Service info endpoints

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use oct_streamer::format::{Extraction, ReaderSet, SourceFormat};
use oct_streamer::{create_router, DecoderRegistry, FrameCache, IngestService, RouterConfig};

use super::test_utils::{
    dual_eye_extraction, is_valid_jpeg, is_valid_png, native_container, undecodable_container,
    MockReader,
};

const CONTENT: &[u8] = b"uploaded container bytes";

/// Router with a DICOM volume reader, an E2E dual-eye reader and an FDA
/// reader whose pixel data cannot be decoded.
fn test_router(dir: &TempDir) -> Router {
    let readers = ReaderSet::new()
        .with_reader(Arc::new(MockReader::new(
            SourceFormat::Dicom,
            Extraction::Container(native_container(6, 32, 32)),
        )))
        .with_reader(Arc::new(MockReader::new(SourceFormat::E2e, dual_eye_extraction())))
        .with_reader(Arc::new(MockReader::new(
            SourceFormat::Fda,
            Extraction::Container(undecodable_container()),
        )));

    let service = IngestService::new(FrameCache::new(dir.path()))
        .with_readers(readers)
        .with_decoders(DecoderRegistry::empty());

    create_router(Arc::new(service), RouterConfig::new().with_tracing(false))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = get(router, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn upload(router: &Router, query: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/documents?{}", query))
        .body(Body::from(CONTENT))
        .unwrap();
    let (status, _, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

// =============================================================================
// Round Trip
// =============================================================================

#[tokio::test]
async fn test_upload_and_fetch_frames() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, summary) = upload(&router, "name=scan.dcm&document_id=doc-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["document_id"], "doc-1");
    assert_eq!(summary["frame_count"], 6);
    assert_eq!(summary["cache_source"], "fresh");
    assert_eq!(summary["format"], "dicom");
    assert_eq!(summary["compression"]["label"], "Uncompressed");

    let (status, ready) = get_json(&router, "/documents/doc-1/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["ready"], true);
    assert_eq!(ready["frame_count"], 6);

    let (status, frames) = get_json(&router, "/documents/doc-1/frames").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(frames["frames"].as_array().unwrap().len(), 6);

    let (status, headers, body) = get(&router, "/documents/doc-1/frames/3.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/jpeg");
    assert!(headers
        .get("cache-control")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("immutable"));
    let checksum = summary["checksum"].as_str().unwrap();
    assert_eq!(
        headers.get("etag").unwrap().to_str().unwrap(),
        format!("\"{}-3\"", checksum)
    );
    assert!(is_valid_jpeg(&body));

    // Bare index works too
    let (status, _, _) = get(&router, "/documents/doc-1/frames/3").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_document_metadata() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (_, summary) = upload(&router, "name=scan.dcm&document_id=doc-1").await;

    let (status, info) = get_json(&router, "/documents/doc-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["document_id"], "doc-1");
    assert_eq!(info["checksum"], summary["checksum"]);
    assert_eq!(info["format"], "dicom");
    assert_eq!(info["frame_count"], 6);
    assert!(info["created_at"].is_string());
    assert!(info.get("eyes").is_none());

    upload(&router, "name=visit.e2e&document_id=visit").await;
    let (_, info) = get_json(&router, "/documents/visit").await;
    assert_eq!(info["format"], "e2e");
    assert_eq!(info["eyes"]["right_eye"]["raw"][0], "R_fundus_0");

    let (status, error) = get_json(&router, "/documents/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "not_found");
}

#[tokio::test]
async fn test_second_upload_is_served_from_disk() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (_, first) = upload(&router, "name=scan.dcm").await;
    let (_, second) = upload(&router, "name=scan.dcm").await;

    assert_eq!(second["cache_source"], "disk");
    assert_eq!(second["checksum"], first["checksum"]);
    assert_ne!(second["document_id"], first["document_id"]);
}

#[tokio::test]
async fn test_flattened_endpoint() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    upload(&router, "name=scan.dcm&document_id=doc-1").await;

    let (status, headers, body) = get(&router, "/documents/doc-1/flattened").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "image/png");
    assert!(is_valid_png(&body));
}

// =============================================================================
// Dual-Eye Endpoints
// =============================================================================

#[tokio::test]
async fn test_eye_endpoints() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, summary) = upload(&router, "name=visit.e2e&document_id=visit").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["eyes"]["right_eye"]["raw"][0], "R_fundus_0");

    let (status, tree) = get_json(&router, "/documents/visit/eyes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tree["left_eye"]["tomography"].as_array().unwrap().len(), 2);

    let (status, left) = get_json(&router, "/documents/visit/eyes/L").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(left["frames"][0], "L_oct_original_0");

    let (status, _, body) = get(&router, "/documents/visit/eyes/left/1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(is_valid_jpeg(&body));

    let (status, _, body) = get(&router, "/documents/visit/images/R_fundus_0").await;
    assert_eq!(status, StatusCode::OK);
    assert!(is_valid_jpeg(&body));

    let (status, error) = get_json(&router, "/documents/visit/eyes/up").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalid_side");

    let (status, error) = get_json(&router, "/documents/visit/flattened").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "not_volume");
}

#[tokio::test]
async fn test_eye_endpoints_reject_volumes() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    upload(&router, "name=scan.dcm&document_id=doc-1").await;

    let (status, error) = get_json(&router, "/documents/doc-1/eyes").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "not_dual_eye");
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_unknown_document_is_404() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, error) = get_json(&router, "/documents/missing/frames/0.jpg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "not_found");
    assert_eq!(error["status"], 404);

    let (status, ready) = get_json(&router, "/documents/missing/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["ready"], false);
}

#[tokio::test]
async fn test_missing_frame_is_404() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    upload(&router, "name=scan.dcm&document_id=doc-1").await;

    let (status, error) = get_json(&router, "/documents/doc-1/frames/60.jpg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "not_found");
}

#[tokio::test]
async fn test_invalid_frame_index_is_400() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, error) = get_json(&router, "/documents/doc-1/frames/abc.jpg").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "invalid_frame");
}

#[tokio::test]
async fn test_undecodable_upload_is_422_with_suggestions() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, error) = upload(&router, "name=scan.fda").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["error"], "decode_failed");
    assert!(!error["suggestions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_upload_reports_not_supported() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, summary) = upload(&router, "name=notes.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["cache_source"], "not_supported");
    assert_eq!(summary["frame_count"], 0);
    assert!(summary["format"].is_null());
}

#[tokio::test]
async fn test_upload_body_limit() {
    let dir = TempDir::new().unwrap();
    let service = IngestService::new(FrameCache::new(dir.path()))
        .with_readers(ReaderSet::new())
        .with_decoders(DecoderRegistry::empty());
    let router = create_router(
        Arc::new(service),
        RouterConfig::new().with_max_upload_bytes(8).with_tracing(false),
    );

    let request = Request::builder()
        .method("POST")
        .uri("/documents?name=scan.dcm")
        .body(Body::from(CONTENT))
        .unwrap();
    let (status, _, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

// =============================================================================
// Service Info
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, health) = get_json(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_checksum_endpoint_memoizes_path() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    let (status, first) = get_json(&router, "/checksum?path=remote/scan.dcm&size=1024").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["source"], "generated");
    assert_eq!(first["checksum"].as_str().unwrap().len(), 8);

    let (_, second) = get_json(&router, "/checksum?path=remote/scan.dcm&size=2048").await;
    assert_eq!(second["source"], "cached");
    assert_eq!(second["checksum"], first["checksum"]);
}

#[tokio::test]
async fn test_cache_status_and_support() {
    let dir = TempDir::new().unwrap();
    let router = test_router(&dir);

    upload(&router, "name=scan.dcm").await;

    let (status, cache) = get_json(&router, "/cache/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache["entries"], 1);
    assert_eq!(cache["partitions"]["dicom"], 1);

    let (status, support) = get_json(&router, "/support").await;
    assert_eq!(status, StatusCode::OK);
    assert!(support["backends"].as_array().unwrap().is_empty());
    assert_eq!(support["readers"].as_array().unwrap().len(), 3);
    assert!(support["supported_compressions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "Uncompressed"));
}
