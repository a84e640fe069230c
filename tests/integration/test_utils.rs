//! Test utilities for integration tests.
//!
//! This module provides a call-counting mock reader and helpers that build
//! synthetic volumes, containers and services over a temporary cache root.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ndarray::{ArrayD, IxDyn};
use tempfile::TempDir;

use oct_streamer::decode::transfer_syntax::{EXPLICIT_VR_LITTLE_ENDIAN, JPEG_LOSSLESS};
use oct_streamer::error::ReaderError;
use oct_streamer::format::{
    DualEyeExtraction, EyeImage, EyeSide, EyeVolume, Extraction, PixelData, RawContainer,
    ReaderSet, SampleLayout, SampleVolume, SourceFile, SourceFormat, VolumeReader,
};
use oct_streamer::{DecoderRegistry, FrameCache, IngestRequest, IngestService};

// =============================================================================
// Mock Reader with Call Tracking
// =============================================================================

/// A reader that returns a canned extraction and counts how often it ran.
///
/// Clones share the counter, so a test can keep one handle while the service
/// owns another.
#[derive(Clone)]
pub struct MockReader {
    format: SourceFormat,
    outcome: Result<Extraction, ReaderError>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl MockReader {
    pub fn new(format: SourceFormat, extraction: Extraction) -> Self {
        Self {
            format,
            outcome: Ok(extraction),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(format: SourceFormat, error: ReaderError) -> Self {
        Self {
            format,
            outcome: Err(error),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VolumeReader for MockReader {
    fn format(&self) -> SourceFormat {
        self.format
    }

    async fn read(&self, _source: &SourceFile) -> Result<Extraction, ReaderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

// =============================================================================
// Synthetic Data
// =============================================================================

/// A `[frames, rows, cols]` 16-bit volume with a gradient per frame.
pub fn gradient_volume(frames: usize, rows: usize, cols: usize) -> SampleVolume {
    SampleVolume::U16(ArrayD::from_shape_fn(IxDyn(&[frames, rows, cols]), |idx| {
        (idx[0] * 500 + idx[1] * 20 + idx[2]) as u16
    }))
}

/// A `[frames, rows, cols]` volume whose B-scans carry a bright curved band,
/// like a retinal layer sagging towards the image centre.
pub fn curved_band_volume(frames: usize, rows: usize, cols: usize) -> SampleVolume {
    let centre = cols as f64 / 2.0;
    SampleVolume::U16(ArrayD::from_shape_fn(IxDyn(&[frames, rows, cols]), |idx| {
        let dx = (idx[2] as f64 - centre) / centre;
        let boundary = rows as f64 * 0.3 + rows as f64 * 0.2 * (1.0 - dx * dx);
        let depth = idx[1] as f64 - boundary;
        if (0.0..6.0).contains(&depth) {
            4000
        } else if depth >= 6.0 {
            1200 + (idx[2] as u16 % 7) * 10
        } else {
            100
        }
    }))
}

/// A fundus-like 8-bit image.
pub fn fundus_image(rows: usize, cols: usize) -> SampleVolume {
    SampleVolume::U8(ArrayD::from_shape_fn(IxDyn(&[rows, cols]), |idx| {
        ((idx[0] * 3 + idx[1] * 5) % 256) as u8
    }))
}

/// A dual-eye extraction: one right fundus and one left tomogram.
pub fn dual_eye_extraction() -> Extraction {
    Extraction::DualEye(DualEyeExtraction {
        fundus: vec![EyeImage {
            laterality: Some(EyeSide::Right),
            samples: fundus_image(32, 32),
        }],
        tomograms: vec![EyeVolume {
            laterality: Some(EyeSide::Left),
            volume: curved_band_volume(5, 64, 64),
        }],
    })
}

/// An uncompressed 8-bit multi-frame container.
pub fn native_container(frames: usize, rows: usize, cols: usize) -> RawContainer {
    let bytes: Vec<u8> = (0..frames * rows * cols).map(|i| (i % 251) as u8).collect();
    RawContainer {
        transfer_syntax: EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
        layout: SampleLayout::gray8(frames, rows, cols),
        pixel_data: PixelData::Native(Bytes::from(bytes)),
        window: None,
    }
}

/// A JPEG Lossless container whose fragment is not a valid codestream.
pub fn undecodable_container() -> RawContainer {
    RawContainer {
        transfer_syntax: JPEG_LOSSLESS.to_string(),
        layout: SampleLayout::gray8(1, 16, 16),
        pixel_data: PixelData::Encapsulated(vec![Bytes::from_static(b"\xff\xd8\xff\xc3garbage")]),
        window: None,
    }
}

// =============================================================================
// Services
// =============================================================================

/// A service over `dir` with only `reader` registered and no codec backends.
pub fn service_with(dir: &TempDir, reader: &MockReader) -> IngestService {
    IngestService::new(FrameCache::new(dir.path()))
        .with_readers(ReaderSet::new().with_reader(Arc::new(reader.clone())))
        .with_decoders(DecoderRegistry::empty())
}

/// An ingestion request for `name` with fixed content.
pub fn request(name: &str) -> IngestRequest {
    request_with(name, b"synthetic container bytes")
}

pub fn request_with(name: &str, content: &'static [u8]) -> IngestRequest {
    IngestRequest::new(SourceFile::new(name, Bytes::from_static(content)))
}

// =============================================================================
// Image Checks
// =============================================================================

/// Check that data starts with the JPEG SOI marker and ends with EOI.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[..2] == [0xFF, 0xD8] && data[data.len() - 2..] == [0xFF, 0xD9]
}

/// Check the PNG signature.
pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
}

/// Decode a JPEG and return its dimensions.
pub fn jpeg_dimensions(data: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(data).expect("valid image");
    (img.width(), img.height())
}
