//! Flattened cross-section tests.
//!
//! Tests verify:
//! - The engine straightens a curved boundary
//! - Flattened PNGs are memoized per document
//! - Every fallback source (middle slice, re-read container, cached frame)

use ndarray::Array2;
use tempfile::TempDir;

use oct_streamer::flatten::{ContrastMethod, FlattenConfig, FlatteningEngine};
use oct_streamer::format::{Extraction, SourceFormat};
use oct_streamer::CacheSource;

use super::test_utils::{
    curved_band_volume, gradient_volume, is_valid_png, native_container, request, service_with,
    MockReader,
};

/// Dark above a parabolic boundary, bright below it.
fn curved_boundary(rows: usize, cols: usize) -> Array2<u8> {
    let centre = cols as f64 / 2.0;
    Array2::from_shape_fn((rows, cols), |(y, x)| {
        let dx = (x as f64 - centre) / centre;
        let boundary = rows as f64 * 0.3 + rows as f64 * 0.2 * (1.0 - dx * dx);
        if y as f64 >= boundary {
            200
        } else {
            0
        }
    })
}

/// Spread of the first bright row across columns that have one.
fn boundary_spread(image: &Array2<u8>) -> usize {
    let rows: Vec<usize> = image
        .columns()
        .into_iter()
        .filter_map(|column| column.iter().position(|&v| v > 127))
        .collect();
    let min = rows.iter().copied().min().unwrap_or(0);
    let max = rows.iter().copied().max().unwrap_or(0);
    max - min
}

// =============================================================================
// Engine
// =============================================================================

#[test]
fn test_engine_straightens_curved_boundary() {
    let image = curved_boundary(64, 64);
    assert!(boundary_spread(&image) >= 10);

    let engine = FlatteningEngine::new(
        FlattenConfig::default().with_contrast(ContrastMethod::PercentileStretch {
            low: 0.0,
            high: 100.0,
        }),
    );
    let flat = engine.flatten(image.view().into_dyn());

    assert_eq!(flat.dim(), (64, 64));
    assert!(boundary_spread(&flat) <= 3, "spread {}", boundary_spread(&flat));
}

#[test]
fn test_engine_survives_blank_slice() {
    let blank = Array2::<u8>::zeros((32, 32));
    let flat = FlatteningEngine::default().flatten(blank.view().into_dyn());
    assert_eq!(flat.dim(), (32, 32));
}

// =============================================================================
// Service
// =============================================================================

#[tokio::test]
async fn test_flattened_from_middle_slice_is_memoized() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(
        SourceFormat::Fda,
        Extraction::Samples(curved_band_volume(9, 64, 64)),
    );
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("scan.fda")).await.unwrap();

    let first = service.get_flattened(&summary.document_id).await.unwrap();
    assert!(is_valid_png(&first));
    let img = image::load_from_memory(&first).unwrap();
    assert_eq!((img.width(), img.height()), (64, 64));

    let second = service.get_flattened(&summary.document_id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(reader.calls(), 1);
}

#[tokio::test]
async fn test_flattened_single_frame_rereads_container() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(
        SourceFormat::Dicom,
        Extraction::Container(native_container(1, 48, 40)),
    );
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("single.dcm")).await.unwrap();
    assert_eq!(summary.frame_count, 1);

    let flat = service.get_flattened(&summary.document_id).await.unwrap();
    assert!(is_valid_png(&flat));
    let img = image::load_from_memory(&flat).unwrap();
    assert_eq!((img.width(), img.height()), (40, 48));
    assert_eq!(reader.calls(), 2);
}

#[tokio::test]
async fn test_flattened_after_disk_hit() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(
        SourceFormat::Fda,
        Extraction::Samples(gradient_volume(5, 32, 32)),
    );

    service_with(&dir, &reader)
        .ingest(request("scan.fda"))
        .await
        .unwrap();

    let restarted = service_with(&dir, &reader);
    let summary = restarted.ingest(request("scan.fda")).await.unwrap();
    assert_eq!(summary.cache_source, CacheSource::Disk);

    let flat = restarted.get_flattened(&summary.document_id).await.unwrap();
    assert!(is_valid_png(&flat));
}

#[tokio::test]
async fn test_flattened_unknown_document() {
    let dir = TempDir::new().unwrap();
    let reader = MockReader::new(SourceFormat::Fda, Extraction::Samples(gradient_volume(2, 8, 8)));
    let service = service_with(&dir, &reader);

    assert!(service.get_flattened("missing").await.is_err());
}
