//! Persistent frame cache behaviour seen through the ingestion service.
//!
//! Tests verify:
//! - Corrupt, incomplete and expired entries are rebuilt instead of served
//! - Startup eviction and cache status reporting
//! - Path memo interplay with descriptor checksums

use std::fs;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use oct_streamer::cache::{frame_file_name, read_metadata, write_metadata};
use oct_streamer::format::{Extraction, SourceFormat};
use oct_streamer::{CacheSource, ChecksumSource, RemoteDescriptor};

use super::test_utils::{native_container, request, service_with, MockReader};

fn dicom_reader() -> MockReader {
    MockReader::new(
        SourceFormat::Dicom,
        Extraction::Container(native_container(10, 64, 64)),
    )
}

// =============================================================================
// Self-Healing Entries
// =============================================================================

#[tokio::test]
async fn test_corrupt_metadata_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let reader = dicom_reader();

    let first = service_with(&dir, &reader)
        .ingest(request("scan.dcm"))
        .await
        .unwrap();

    let service = service_with(&dir, &reader);
    let entry = service.cache().entry_path(SourceFormat::Dicom, first.checksum);
    fs::write(entry.join("metadata.json"), b"{ not json").unwrap();

    let second = service.ingest(request("scan.dcm")).await.unwrap();
    assert_eq!(second.cache_source, CacheSource::Fresh);
    assert_eq!(second.frame_count, 10);
    assert_eq!(reader.calls(), 2);

    // The rebuilt entry is valid again
    let third = service_with(&dir, &reader)
        .ingest(request("scan.dcm"))
        .await
        .unwrap();
    assert_eq!(third.cache_source, CacheSource::Disk);
    assert_eq!(reader.calls(), 2);
}

#[tokio::test]
async fn test_missing_frame_file_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let reader = dicom_reader();

    let first = service_with(&dir, &reader)
        .ingest(request("scan.dcm"))
        .await
        .unwrap();

    let service = service_with(&dir, &reader);
    let entry = service.cache().entry_path(SourceFormat::Dicom, first.checksum);
    fs::remove_file(entry.join(frame_file_name(4))).unwrap();

    let second = service.ingest(request("scan.dcm")).await.unwrap();
    assert_eq!(second.cache_source, CacheSource::Fresh);
    assert!(entry.join(frame_file_name(4)).is_file());
}

#[tokio::test]
async fn test_expired_entry_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let reader = dicom_reader();

    let first = service_with(&dir, &reader)
        .ingest(request("scan.dcm"))
        .await
        .unwrap();

    let service = service_with(&dir, &reader);
    let entry = service.cache().entry_path(SourceFormat::Dicom, first.checksum);
    let mut metadata = read_metadata(&entry).unwrap();
    metadata.cached_at = Utc::now() - chrono::Duration::days(8);
    write_metadata(&entry, &metadata).unwrap();

    let second = service.ingest(request("scan.dcm")).await.unwrap();
    assert_eq!(second.cache_source, CacheSource::Fresh);
    assert_eq!(reader.calls(), 2);

    let refreshed = read_metadata(&entry).unwrap();
    assert!(Utc::now() - refreshed.cached_at < chrono::Duration::hours(1));
}

// =============================================================================
// Eviction and Status
// =============================================================================

#[tokio::test]
async fn test_evict_expired_removes_old_entries() {
    let dir = TempDir::new().unwrap();
    let reader = dicom_reader();
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("scan.dcm")).await.unwrap();
    assert_eq!(service.evict_expired().await, 0);

    let entry = service.cache().entry_path(SourceFormat::Dicom, summary.checksum);
    let mut metadata = read_metadata(&entry).unwrap();
    metadata.cached_at = Utc::now() - chrono::Duration::days(30);
    write_metadata(&entry, &metadata).unwrap();

    assert_eq!(service.evict_expired().await, 1);
    assert!(!entry.exists());
}

#[tokio::test]
async fn test_cache_status_counts_entries() {
    let dir = TempDir::new().unwrap();
    let reader = dicom_reader();
    let service = service_with(&dir, &reader);

    service.ingest(request("scan.dcm")).await.unwrap();

    let status = service.cache_status().await;
    assert_eq!(status.entries, 1);
    assert_eq!(status.partitions.get("dicom"), Some(&1));
    assert!(status.total_bytes > 0);
    assert_eq!(status.documents, 1);
    assert_eq!(status.checksum_memo, 1);
    assert_eq!(status.ttl_hours, 168);
}

#[tokio::test]
async fn test_cache_write_leaves_no_staging_dirs() {
    let dir = TempDir::new().unwrap();
    let reader = dicom_reader().with_delay(Duration::from_millis(10));
    let service = service_with(&dir, &reader);

    service.ingest(request("scan.dcm")).await.unwrap();

    let partition = dir.path().join("dicom");
    let names: Vec<String> = fs::read_dir(&partition)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 1);
    assert!(!names[0].starts_with('.'));
}

// =============================================================================
// Checksum Memo
// =============================================================================

#[tokio::test]
async fn test_ingest_remembers_path_checksum() {
    let dir = TempDir::new().unwrap();
    let reader = dicom_reader();
    let service = service_with(&dir, &reader);

    let summary = service.ingest(request("scan.dcm")).await.unwrap();

    let (checksum, source) = service
        .checksum_for_descriptor(&RemoteDescriptor::new("scan.dcm").with_size(999))
        .await;
    assert_eq!(checksum, summary.checksum);
    assert_eq!(source, ChecksumSource::Cached);

    let (_, source) = service
        .checksum_for_descriptor(&RemoteDescriptor::new("other.dcm"))
        .await;
    assert_eq!(source, ChecksumSource::Generated);
}
