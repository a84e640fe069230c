//! # OCT Streamer
//!
//! Ingestion and frame serving for ophthalmic imaging containers (DICOM,
//! Topcon FDA/FDS, Heidelberg E2E).
//!
//! A container is checksummed, routed to a format reader, decoded through an
//! ordered chain of pixel decoders and normalized to 8-bit frames. Encoded
//! frames are held in memory for the life of the process and published to a
//! content-addressed disk cache so the same file never has to be decoded twice.
//! Retinal cross-sections can be flattened on demand along the detected
//! boundary curve.
//!
//! ## Features
//!
//! - **Content-addressed caching**: CRC32 checksums key a per-format disk cache
//!   that self-heals when an entry is stale or incomplete
//! - **Decoder fallbacks**: optional JPEG and JPEG 2000 backends, RLE
//!   transcoding, then direct extraction
//! - **Coalesced ingestion**: concurrent uploads of the same content decode once
//! - **Dual-eye documents**: fundus photographs and tomograms grouped by eye
//! - **Surface flattening**: boundary detection, quadratic fit and CLAHE
//!
//! ## Architecture
//!
//! - [`checksum`] - content and descriptor checksums, path memo
//! - [`mod@format`] - format detection, container model and the reader seam
//! - [`decode`] - pixel decoding strategy chain
//! - [`raster`] - normalization to 8-bit and frame encoding
//! - [`flatten`] - surface flattening engine
//! - [`store`] - in-memory frame store
//! - [`cache`] - persistent frame cache
//! - [`ingest`] - ingestion pipeline and document queries
//! - [`server`] - Axum-based HTTP adapter
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use oct_streamer::{FrameCache, IngestRequest, IngestService, SourceFile};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = IngestService::new(FrameCache::new("cache"));
//!     let bytes = std::fs::read("scan.dcm").unwrap();
//!
//!     let summary = service
//!         .ingest(IngestRequest::new(SourceFile::new("scan.dcm", bytes)))
//!         .await
//!         .unwrap();
//!     println!("{} frames, checksum {}", summary.frame_count, summary.checksum);
//! }
//! ```

pub mod cache;
pub mod checksum;
pub mod config;
pub mod decode;
pub mod error;
pub mod flatten;
pub mod format;
pub mod ingest;
pub mod raster;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheMetadata, CacheStats, CachedFrames, FrameCache, SourceDescriptor};
pub use checksum::{
    checksum_of_bytes, checksum_of_descriptor, Checksum, ChecksumService, ChecksumSource,
    RemoteDescriptor,
};
pub use config::{ChecksumConfig, Cli, Command, EvictConfig, ServeConfig};
pub use decode::{Decoded, DecoderRegistry, SupportStatus};
pub use error::{
    DecodeError, EncodeError, ExtractionError, FlattenError, FrameError, IngestError,
    NormalizeError, ReaderError,
};
pub use flatten::{FlattenConfig, FlatteningEngine};
pub use format::{
    detect_format, EyeSide, Extraction, RawContainer, ReaderSet, SampleVolume, SourceFile,
    SourceFormat, VolumeReader,
};
pub use ingest::{CacheSource, DocumentInfo, DocumentSummary, IngestRequest, IngestService};
pub use raster::{normalize, FrameEncoder, WindowHint};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use store::{EyeTree, FrameStore, Readiness};
