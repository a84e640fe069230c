//! End-to-end ingestion tests.
//!
//! Tests verify:
//! - Container decoding through the strategy chain into JPEG frames
//! - Reuse of persisted frames across service instances
//! - Decode exhaustion and reader failures
//! - Dual-eye grouping and keyed image lookup
//! - Coalescing of concurrent ingestions

use std::time::Duration;

use ndarray::Array2;
use tempfile::TempDir;

use oct_streamer::error::{ExtractionError, FrameError, IngestError, ReaderError};
use oct_streamer::format::{EyeSide, Extraction, SampleVolume, SourceFormat};
use oct_streamer::{checksum_of_bytes, CacheSource};

use super::test_utils::{
    dual_eye_extraction, gradient_volume, is_valid_jpeg, jpeg_dimensions, native_container,
    request, service_with, undecodable_container, MockReader,
};

// =============================================================================
// Single Volumes
// =============================================================================

#[tokio::test]
async fn test_ingest_native_container() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(
        SourceFormat::Dicom,
        Extraction::Container(native_container(10, 64, 64)),
    );
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("scan.dcm")).await.unwrap();

    assert_eq!(summary.frame_count, 10);
    assert_eq!(summary.cache_source, CacheSource::Fresh);
    assert_eq!(summary.format, Some(SourceFormat::Dicom));
    assert_eq!(summary.checksum, checksum_of_bytes(b"synthetic container bytes"));

    let compression = summary.compression.expect("compression info");
    assert_eq!(compression.label, "Uncompressed");
    assert!(!compression.is_compressed);
    assert_eq!(compression.strategy, "direct");

    let indices = service.frame_indices(&summary.document_id).await.unwrap();
    assert_eq!(indices, (0..10).collect::<Vec<u32>>());

    for index in [0, 5, 9] {
        let frame = service.get_frame(&summary.document_id, index).await.unwrap();
        assert!(is_valid_jpeg(&frame));
        assert_eq!(jpeg_dimensions(&frame), (64, 64));
    }

    let readiness = service.is_ready(&summary.document_id).await;
    assert!(readiness.ready);
    assert_eq!(readiness.frame_count, 10);
}

#[tokio::test]
async fn test_ingest_one_frame_stack() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(SourceFormat::Fda, Extraction::Samples(gradient_volume(1, 64, 48)));
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("scan.fda")).await.unwrap();
    assert_eq!(summary.frame_count, 1);

    let frame = service.get_frame(&summary.document_id, 0).await.unwrap();
    assert!(is_valid_jpeg(&frame));
    assert_eq!(jpeg_dimensions(&frame), (48, 64));

    // Reloaded from disk with the same shape
    let restarted = service_with(&dir, &reader);
    let again = restarted.ingest(request("scan.fda")).await.unwrap();
    assert_eq!(again.cache_source, CacheSource::Disk);
    assert_eq!(again.frame_count, 1);
}

#[tokio::test]
async fn test_ingest_plain_image() {
    let dir = TempDir::new().unwrap();
    let image = Array2::from_shape_fn((30, 50), |(y, x)| (y * 50 + x) as i16).into_dyn();
    let reader = MockReader::new(SourceFormat::Fda, Extraction::Samples(SampleVolume::I16(image)));
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("fundus.fda")).await.unwrap();
    assert_eq!(summary.frame_count, 1);

    let frame = service.get_frame(&summary.document_id, 0).await.unwrap();
    assert!(is_valid_jpeg(&frame));
    assert_eq!(jpeg_dimensions(&frame), (50, 30));
    assert!(service.get_flattened(&summary.document_id).await.is_ok());
}

#[tokio::test]
async fn test_missing_frame_and_document() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(SourceFormat::Fda, Extraction::Samples(gradient_volume(3, 16, 16)));
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("scan.fda")).await.unwrap();

    assert!(matches!(
        service.get_frame(&summary.document_id, 3).await,
        Err(FrameError::FrameNotFound { .. })
    ));
    assert!(matches!(
        service.get_frame("unknown", 0).await,
        Err(FrameError::DocumentNotFound { .. })
    ));
    assert!(!service.is_ready("unknown").await.ready);
}

#[tokio::test]
async fn test_second_service_reuses_disk_cache() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(
        SourceFormat::Dicom,
        Extraction::Container(native_container(10, 64, 64)),
    );

    let first = service_with(&dir, &reader)
        .ingest(request("scan.dcm"))
        .await
        .unwrap();
    assert_eq!(first.cache_source, CacheSource::Fresh);

    // A new process: empty frame store, same cache root
    let restarted = service_with(&dir, &reader);
    let second = restarted.ingest(request("scan.dcm")).await.unwrap();

    assert_eq!(second.cache_source, CacheSource::Disk);
    assert_eq!(second.frame_count, 10);
    assert_eq!(second.checksum, first.checksum);
    assert_eq!(reader.calls(), 1);

    let frame = restarted.get_frame(&second.document_id, 9).await.unwrap();
    assert!(is_valid_jpeg(&frame));
}

#[tokio::test]
async fn test_explicit_document_id_is_republished() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(SourceFormat::Fda, Extraction::Samples(gradient_volume(2, 8, 8)));
    let service = service_with(&dir, &reader);

    let first = service
        .ingest(request("scan.fda").with_document_id("patient-1"))
        .await
        .unwrap();
    let second = service
        .ingest(request("scan.fda").with_document_id("patient-1"))
        .await
        .unwrap();

    assert_eq!(first.document_id, "patient-1");
    assert_eq!(second.document_id, "patient-1");
    assert_eq!(second.cache_source, CacheSource::Disk);
    assert_eq!(service.store().len().await, 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_exhausted_decode_reports_suggestions() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(
        SourceFormat::Dicom,
        Extraction::Container(undecodable_container()),
    );
    let service = service_with(&dir, &reader);

    let err = service
        .ingest(request("lossless.dcm").with_document_id("broken"))
        .await
        .unwrap_err();

    match err {
        IngestError::Extraction(ExtractionError::Exhausted {
            encoding_label,
            attempts,
            suggestions,
        }) => {
            assert_eq!(encoding_label, "JPEG Lossless");
            assert_eq!(attempts.len(), 2);
            assert!(suggestions.iter().any(|s| s.contains("gdcmconv")));
        }
        other => panic!("expected exhausted extraction, got {:?}", other),
    }

    // Nothing published, nothing cached
    assert!(!service.is_ready("broken").await.ready);
    assert_eq!(service.cache().stats().entries, 0);
}

#[tokio::test]
async fn test_reader_failure_propagates() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::failing(
        SourceFormat::E2e,
        ReaderError::Malformed("truncated header".to_string()),
    );
    let service = service_with(&dir, &reader);

    let err = service.ingest(request("visit.e2e")).await.unwrap_err();
    assert!(matches!(err, IngestError::Reader(ReaderError::Malformed(_))));
    assert_eq!(service.store().len().await, 0);
}

#[tokio::test]
async fn test_fds_is_never_processed() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(SourceFormat::Fds, Extraction::Samples(gradient_volume(2, 8, 8)));
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("scan.fds")).await.unwrap();
    assert_eq!(summary.cache_source, CacheSource::NotSupported);
    assert_eq!(summary.frame_count, 0);
    assert_eq!(reader.calls(), 0);
}

// =============================================================================
// Dual-Eye Documents
// =============================================================================

#[tokio::test]
async fn test_dual_eye_grouping() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(SourceFormat::E2e, dual_eye_extraction());
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("visit.e2e")).await.unwrap();
    assert_eq!(summary.cache_source, CacheSource::Fresh);
    assert_eq!(summary.frame_count, 3);

    let eyes = summary.eyes.expect("eye tree");
    assert_eq!(eyes.right_eye.raw, vec!["R_fundus_0".to_string()]);
    assert_eq!(
        eyes.left_eye.tomography,
        vec!["L_oct_original_0".to_string(), "L_oct_flattened_0".to_string()]
    );

    let left = service
        .list_eye_frames(&summary.document_id, EyeSide::Left)
        .await
        .unwrap();
    assert_eq!(left.len(), 2);

    let original = service
        .get_eye_frame(&summary.document_id, EyeSide::Left, 0)
        .await
        .unwrap();
    let keyed = service
        .get_aux_frame(&summary.document_id, "L_oct_original_0")
        .await
        .unwrap();
    assert_eq!(original, keyed);
    assert!(is_valid_jpeg(&original));

    let fundus = service
        .get_aux_frame(&summary.document_id, "R_fundus_0")
        .await
        .unwrap();
    assert_eq!(jpeg_dimensions(&fundus), (32, 32));

    assert!(service
        .get_eye_frame(&summary.document_id, EyeSide::Right, 5)
        .await
        .is_err());
    assert!(matches!(
        service.get_flattened(&summary.document_id).await,
        Err(FrameError::NotVolume { .. })
    ));
}

#[tokio::test]
async fn test_dual_eye_cache_hit_restores_groups() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(SourceFormat::E2e, dual_eye_extraction());

    let first = service_with(&dir, &reader)
        .ingest(request("visit.e2e"))
        .await
        .unwrap();

    let restarted = service_with(&dir, &reader);
    let second = restarted.ingest(request("visit.e2e")).await.unwrap();

    assert_eq!(second.cache_source, CacheSource::Disk);
    assert_eq!(second.eyes, first.eyes);
    assert_eq!(reader.calls(), 1);
    assert!(restarted
        .get_aux_frame(&second.document_id, "L_oct_flattened_0")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_volume_has_no_eye_groups() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(SourceFormat::Fda, Extraction::Samples(gradient_volume(2, 8, 8)));
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("scan.fda")).await.unwrap();
    assert!(summary.eyes.is_none());
    assert!(matches!(
        service.eye_tree(&summary.document_id).await,
        Err(FrameError::NotDualEye { .. })
    ));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_ingests_decode_once() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(
        SourceFormat::Dicom,
        Extraction::Container(native_container(4, 32, 32)),
    )
    .with_delay(Duration::from_millis(50));
    let service = std::sync::Arc::new(service_with(&dir, &reader));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .ingest(request("scan.dcm").with_document_id(format!("doc-{}", i)))
                    .await
            })
        })
        .collect();

    for handle in handles {
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.frame_count, 4);
    }

    assert_eq!(reader.calls(), 1);
    for i in 0..4 {
        let id = format!("doc-{}", i);
        assert!(service.is_ready(&id).await.ready);
    }
}
