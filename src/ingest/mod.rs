//! Ingestion pipeline and document queries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            IngestService                              │
//! │                                                                       │
//! │  ingest(): checksum ─► FrameCache::get ──hit──────────────┐           │
//! │                              │ miss                        │           │
//! │                              ▼                             ▼           │
//! │            VolumeReader ─► DecoderRegistry ─► normalize ─► FrameStore  │
//! │                              (if container)      │                     │
//! │                                                  ├─► FrameEncoder      │
//! │                                                  └─► FrameCache::put   │
//! │                                                                       │
//! │  get_flattened(): overlay ─► middle slice ─► raw container ─► frame   │
//! │                                     └────► FlatteningEngine ─► PNG     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrent ingestions of the same content are coalesced: one task builds
//! the frames, the others wait and publish the shared result under their own
//! document ids.

mod service;

pub use service::IngestService;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::checksum::Checksum;
use crate::decode::SupportStatus;
use crate::format::{EyeSide, SourceFile, SourceFormat};
use crate::store::{DocumentContent, DocumentRecord, EyeTree};

// =============================================================================
// Requests and Summaries
// =============================================================================

/// One container to ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Id to publish under; a fresh UUID when absent
    pub document_id: Option<String>,

    pub source: SourceFile,

    /// Precomputed checksum, e.g. a descriptor checksum for a remote object
    pub checksum: Option<Checksum>,
}

impl IngestRequest {
    pub fn new(source: SourceFile) -> Self {
        Self {
            document_id: None,
            source,
            checksum: None,
        }
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// Where an ingestion's frames came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    /// Loaded from the persistent frame cache
    Disk,

    /// Extracted and encoded by this ingestion
    Fresh,

    /// Format recognised but not processed, or not recognised at all
    NotSupported,
}

/// How the source pixel data was encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressionInfo {
    pub label: String,
    pub is_compressed: bool,

    /// Decode strategy that produced the samples
    pub strategy: String,
}

/// Result of an ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub checksum: Checksum,
    pub format: Option<SourceFormat>,
    pub frame_count: usize,
    pub cache_source: CacheSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eyes: Option<EyeTree>,
}

/// Metadata of a published document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub document_id: String,
    pub checksum: Checksum,
    pub format: SourceFormat,
    pub created_at: DateTime<Utc>,
    pub frame_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eyes: Option<EyeTree>,

    /// Source bytes are held for re-deriving the flattened view
    pub retains_source: bool,
}

impl From<&DocumentRecord> for DocumentInfo {
    fn from(record: &DocumentRecord) -> Self {
        let (eyes, retains_source) = match &record.content {
            DocumentContent::Volume(volume) => (None, volume.raw_container.is_some()),
            DocumentContent::DualEye(frames) => (Some(frames.eyes.clone()), false),
        };
        Self {
            document_id: record.document_id.clone(),
            checksum: record.checksum,
            format: record.format,
            created_at: record.created_at,
            frame_count: record.frame_count(),
            eyes,
            retains_source,
        }
    }
}

// =============================================================================
// Status Reports
// =============================================================================

/// Persistent and in-memory cache occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub cache_dir: String,
    pub ttl_hours: u64,
    pub entries: usize,
    pub total_bytes: u64,
    pub partitions: std::collections::BTreeMap<String, usize>,

    /// Documents held in memory
    pub documents: usize,

    /// Path → checksum memo entries
    pub checksum_memo: usize,
}

/// Decoder backends plus the formats a reader is registered for.
#[derive(Debug, Clone, Serialize)]
pub struct SupportReport {
    #[serde(flatten)]
    pub decoders: SupportStatus,

    pub readers: Vec<SourceFormat>,
}

// =============================================================================
// Dual-Eye Keys
// =============================================================================

/// Key of the `index`-th fundus photograph.
pub fn fundus_key(side: EyeSide, index: usize) -> String {
    format!("{}_fundus_{}", side.code(), index)
}

/// Key of the unflattened middle B-scan of the `index`-th tomogram.
pub fn oct_original_key(side: EyeSide, index: usize) -> String {
    format!("{}_oct_original_{}", side.code(), index)
}

/// Key of the flattened middle B-scan of the `index`-th tomogram.
pub fn oct_flattened_key(side: EyeSide, index: usize) -> String {
    format!("{}_oct_flattened_{}", side.code(), index)
}
