//! Container model shared by readers and the decoder chain.
//!
//! A reader turns source bytes into an [`Extraction`]:
//!
//! ```text
//!   SourceFile ──► VolumeReader ──► Extraction::Container(RawContainer) ──► DecoderRegistry
//!                                 ├► Extraction::Samples(SampleVolume)
//!                                 └► Extraction::DualEye { fundus, tomograms }
//! ```
//!
//! Readers for proprietary containers live outside this crate and plug in
//! through [`VolumeReader`]. Sample arrays are `ndarray` arrays laid out as
//! `[frames, rows, columns]` (or `[rows, columns]` for a single frame), with
//! a trailing channel axis when there is more than one sample per pixel.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ndarray::{ArrayD, Axis, IxDyn};

use crate::error::{DecodeError, ReaderError};
use crate::raster::WindowHint;

use super::detect::{EyeSide, SourceFormat};

// =============================================================================
// Source
// =============================================================================

/// Raw bytes of an uploaded or downloaded container plus its file name.
#[derive(Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

// =============================================================================
// Sample Layout
// =============================================================================

/// Declared geometry of the pixel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    pub frames: usize,
    pub rows: usize,
    pub columns: usize,
    pub samples_per_pixel: usize,
    pub bits_allocated: u16,
    pub signed: bool,
}

impl SampleLayout {
    /// 8-bit unsigned grayscale layout.
    pub fn gray8(frames: usize, rows: usize, columns: usize) -> Self {
        Self {
            frames,
            rows,
            columns,
            samples_per_pixel: 1,
            bits_allocated: 8,
            signed: false,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_allocated as usize).div_ceil(8)
    }

    pub fn samples_per_frame(&self) -> usize {
        self.rows * self.columns * self.samples_per_pixel
    }

    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * self.bytes_per_sample()
    }

    /// Array shape for the whole payload.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(4);
        if self.frames > 1 {
            shape.push(self.frames);
        }
        shape.push(self.rows);
        shape.push(self.columns);
        if self.samples_per_pixel > 1 {
            shape.push(self.samples_per_pixel);
        }
        shape
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.frames == 0 || self.rows == 0 || self.columns == 0 || self.samples_per_pixel == 0 {
            return Err(DecodeError::InvalidLayout(format!(
                "empty geometry {}x{}x{} with {} samples per pixel",
                self.frames, self.rows, self.columns, self.samples_per_pixel
            )));
        }
        if !matches!(self.bits_allocated, 8 | 16 | 32) {
            return Err(DecodeError::InvalidLayout(format!(
                "unsupported bits allocated: {}",
                self.bits_allocated
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Pixel Data
// =============================================================================

/// Pixel payload as found in the container.
#[derive(Clone)]
pub enum PixelData {
    /// Uncompressed samples
    Native(Bytes),

    /// Compressed fragments (one per frame, or all fragments of one frame)
    Encapsulated(Vec<Bytes>),
}

impl PixelData {
    pub fn is_encapsulated(&self) -> bool {
        matches!(self, PixelData::Encapsulated(_))
    }

    /// Group encapsulated fragments into one compressed buffer per frame.
    ///
    /// Single-frame payloads may be split over several fragments, which are
    /// concatenated. Multi-frame payloads need exactly one fragment per frame.
    pub fn frame_fragments(&self, frames: usize) -> Result<Vec<Cow<'_, [u8]>>, DecodeError> {
        let fragments = match self {
            PixelData::Encapsulated(fragments) => fragments,
            PixelData::Native(_) => {
                return Err(DecodeError::InvalidLayout(
                    "pixel data is not encapsulated".to_string(),
                ))
            }
        };

        let non_empty: Vec<&Bytes> = fragments.iter().filter(|f| !f.is_empty()).collect();

        if non_empty.len() == frames {
            return Ok(non_empty.into_iter().map(|f| Cow::Borrowed(f.as_ref())).collect());
        }

        if frames == 1 && !non_empty.is_empty() {
            let joined: Vec<u8> = non_empty.iter().flat_map(|f| f.iter().copied()).collect();
            return Ok(vec![Cow::Owned(joined)]);
        }

        Err(DecodeError::FragmentMismatch {
            fragments: non_empty.len(),
            frames,
        })
    }

    pub fn byte_len(&self) -> usize {
        match self {
            PixelData::Native(bytes) => bytes.len(),
            PixelData::Encapsulated(fragments) => fragments.iter().map(Bytes::len).sum(),
        }
    }
}

impl fmt::Debug for PixelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelData::Native(bytes) => write!(f, "Native({} bytes)", bytes.len()),
            PixelData::Encapsulated(fragments) => {
                write!(f, "Encapsulated({} fragments)", fragments.len())
            }
        }
    }
}

/// A parsed container whose pixel data still needs decoding.
#[derive(Debug, Clone)]
pub struct RawContainer {
    /// Transfer syntax UID declared by the container
    pub transfer_syntax: String,

    pub layout: SampleLayout,

    pub pixel_data: PixelData,

    /// Display window from container metadata, if any
    pub window: Option<WindowHint>,
}

// =============================================================================
// Sample Volume
// =============================================================================

/// Decoded samples in their native type.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleVolume {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    I16(ArrayD<i16>),
    U32(ArrayD<u32>),
    I32(ArrayD<i32>),
    F32(ArrayD<f32>),
}

/// Apply an expression to whichever array a [`SampleVolume`] holds.
macro_rules! with_samples {
    ($volume:expr, $array:ident => $body:expr) => {
        match $volume {
            SampleVolume::U8($array) => $body,
            SampleVolume::U16($array) => $body,
            SampleVolume::I16($array) => $body,
            SampleVolume::U32($array) => $body,
            SampleVolume::I32($array) => $body,
            SampleVolume::F32($array) => $body,
        }
    };
}
pub(crate) use with_samples;

impl SampleVolume {
    pub fn shape(&self) -> &[usize] {
        with_samples!(self, array => array.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        with_samples!(self, array => array.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_type(&self) -> &'static str {
        match self {
            SampleVolume::U8(_) => "u8",
            SampleVolume::U16(_) => "u16",
            SampleVolume::I16(_) => "i16",
            SampleVolume::U32(_) => "u32",
            SampleVolume::I32(_) => "i32",
            SampleVolume::F32(_) => "f32",
        }
    }

    /// Widen every sample to `f64`.
    pub fn to_f64(&self) -> ArrayD<f64> {
        with_samples!(self, array => array.mapv(|v| v as f64))
    }

    /// Sub-volume at `index` along the leading axis, or `None` when out of range.
    pub fn frame(&self, index: usize) -> Option<SampleVolume> {
        if self.ndim() < 2 || index >= self.shape()[0] {
            return None;
        }
        Some(match self {
            SampleVolume::U8(a) => SampleVolume::U8(a.index_axis(Axis(0), index).to_owned()),
            SampleVolume::U16(a) => SampleVolume::U16(a.index_axis(Axis(0), index).to_owned()),
            SampleVolume::I16(a) => SampleVolume::I16(a.index_axis(Axis(0), index).to_owned()),
            SampleVolume::U32(a) => SampleVolume::U32(a.index_axis(Axis(0), index).to_owned()),
            SampleVolume::I32(a) => SampleVolume::I32(a.index_axis(Axis(0), index).to_owned()),
            SampleVolume::F32(a) => SampleVolume::F32(a.index_axis(Axis(0), index).to_owned()),
        })
    }

    /// Reshape to `shape` if the element count matches.
    pub fn into_shape(self, shape: &[usize]) -> Result<Self, DecodeError> {
        let err = |e: ndarray::ShapeError| DecodeError::InvalidLayout(e.to_string());
        Ok(match self {
            SampleVolume::U8(a) => SampleVolume::U8(a.into_shape_with_order(IxDyn(shape)).map_err(err)?),
            SampleVolume::U16(a) => SampleVolume::U16(a.into_shape_with_order(IxDyn(shape)).map_err(err)?),
            SampleVolume::I16(a) => SampleVolume::I16(a.into_shape_with_order(IxDyn(shape)).map_err(err)?),
            SampleVolume::U32(a) => SampleVolume::U32(a.into_shape_with_order(IxDyn(shape)).map_err(err)?),
            SampleVolume::I32(a) => SampleVolume::I32(a.into_shape_with_order(IxDyn(shape)).map_err(err)?),
            SampleVolume::F32(a) => SampleVolume::F32(a.into_shape_with_order(IxDyn(shape)).map_err(err)?),
        })
    }
}

// =============================================================================
// Extraction Results
// =============================================================================

/// A fundus (en-face) photograph.
#[derive(Debug, Clone)]
pub struct EyeImage {
    /// Laterality reported by the container, if it reports one
    pub laterality: Option<EyeSide>,

    /// `[rows, columns]` or `[rows, columns, channels]`
    pub samples: SampleVolume,
}

/// A tomography volume: axis 0 indexes B-scans.
#[derive(Debug, Clone)]
pub struct EyeVolume {
    pub laterality: Option<EyeSide>,
    pub volume: SampleVolume,
}

/// Images pulled from a dual-eye container.
#[derive(Debug, Clone, Default)]
pub struct DualEyeExtraction {
    pub fundus: Vec<EyeImage>,
    pub tomograms: Vec<EyeVolume>,
}

/// What a reader produced.
#[derive(Debug, Clone)]
pub enum Extraction {
    /// Pixel data that still needs the decoder chain
    Container(RawContainer),

    /// Already-decoded single volume, `[frames, rows, columns]` or `[rows, columns]`
    Samples(SampleVolume),

    /// Left/right fundus and tomography images
    DualEye(DualEyeExtraction),
}

// =============================================================================
// Readers
// =============================================================================

/// Parses one container format.
#[async_trait]
pub trait VolumeReader: Send + Sync {
    /// Format this reader handles.
    fn format(&self) -> SourceFormat;

    /// Parse the container.
    async fn read(&self, source: &SourceFile) -> Result<Extraction, ReaderError>;
}

/// Readers keyed by the format they handle.
#[derive(Clone, Default)]
pub struct ReaderSet {
    readers: HashMap<SourceFormat, Arc<dyn VolumeReader>>,
}

impl ReaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Readers compiled into this crate.
    pub fn builtin() -> Self {
        #[allow(unused_mut)]
        let mut set = Self::new();
        #[cfg(feature = "dicom")]
        set.register(Arc::new(super::dicom::DicomReader::new()));
        set
    }

    pub fn with_reader(mut self, reader: Arc<dyn VolumeReader>) -> Self {
        self.register(reader);
        self
    }

    /// Register a reader, replacing any previous one for the same format.
    pub fn register(&mut self, reader: Arc<dyn VolumeReader>) {
        self.readers.insert(reader.format(), reader);
    }

    pub fn get(&self, format: SourceFormat) -> Option<Arc<dyn VolumeReader>> {
        self.readers.get(&format).cloned()
    }

    pub fn formats(&self) -> Vec<SourceFormat> {
        let mut formats: Vec<SourceFormat> = self.readers.keys().copied().collect();
        formats.sort_by_key(|f| f.tag());
        formats
    }
}

// =============================================================================
// Tests
// =============================================================================
