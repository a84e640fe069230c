//! Frame image encoding.
//!
//! Normalized frames are stored and served as JPEG; the flattened
//! cross-section is stored as PNG so its contrast survives untouched.
//!
//! # Design Decisions
//!
//! - **One quality per service**: every frame of every document is encoded
//!   at the configured quality, so cache entries are interchangeable.
//!
//! - **No resizing**: frames keep the container's native geometry.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Axis};

use crate::error::EncodeError;

/// Default JPEG quality (1-100) for stored frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Frame Encoder
// =============================================================================

/// Encodes 8-bit rasters to JPEG/PNG and decodes stored frames back.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::with_quality(DEFAULT_JPEG_QUALITY)
    }

    /// Create an encoder; `quality` is clamped to 1-100.
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a `[rows, columns]` or `[rows, columns, channels]` raster as JPEG.
    pub fn encode_jpeg(&self, raster: ArrayViewD<'_, u8>) -> Result<Bytes, EncodeError> {
        let img = to_dynamic(raster)?;

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);
        let result = match img {
            DynamicImage::ImageLuma8(gray) => encoder.encode_image(&gray),
            DynamicImage::ImageRgb8(rgb) => encoder.encode_image(&rgb),
            // JPEG has no alpha channel
            other => encoder.encode_image(&other.to_rgb8()),
        };
        result.map_err(|e| EncodeError::Encode {
            message: e.to_string(),
        })?;

        Ok(Bytes::from(output))
    }

    /// Encode a grayscale image as PNG.
    pub fn encode_png(&self, image: ArrayView2<'_, u8>) -> Result<Bytes, EncodeError> {
        let img = DynamicImage::ImageLuma8(gray_image(image)?);

        let mut output = Vec::new();
        img.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
            .map_err(|e| EncodeError::Encode {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }

    /// Decode a stored frame (JPEG or PNG) to grayscale.
    pub fn decode_gray(&self, data: &[u8]) -> Result<Array2<u8>, EncodeError> {
        let img = image::load_from_memory(data).map_err(|e| EncodeError::Decode {
            message: e.to_string(),
        })?;
        gray_array(img.to_luma8())
    }

    /// `(width, height)` of a stored frame.
    pub fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), EncodeError> {
        let reader = image::ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| EncodeError::Decode {
                message: e.to_string(),
            })?;

        reader.into_dimensions().map_err(|e| EncodeError::Decode {
            message: e.to_string(),
        })
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Raster Conversions
// =============================================================================

/// Convert an `ndarray` raster to an image buffer.
fn to_dynamic(raster: ArrayViewD<'_, u8>) -> Result<DynamicImage, EncodeError> {
    let shape = raster.shape().to_vec();
    let pixels: Vec<u8> = raster.iter().copied().collect();
    let shape_err = || EncodeError::Shape(shape.clone());

    let (height, width, channels) = match shape.as_slice() {
        [h, w] => (*h, *w, 1),
        [h, w, c] => (*h, *w, *c),
        _ => return Err(shape_err()),
    };
    let (width, height) = (
        u32::try_from(width).map_err(|_| shape_err())?,
        u32::try_from(height).map_err(|_| shape_err())?,
    );

    let img = match channels {
        1 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        _ => None,
    };

    img.ok_or_else(shape_err)
}

/// Copy a 2-D array into a grayscale image buffer.
pub fn gray_image(view: ArrayView2<'_, u8>) -> Result<GrayImage, EncodeError> {
    let (height, width) = view.dim();
    let shape_err = || EncodeError::Shape(vec![height, width]);
    let pixels: Vec<u8> = view.iter().copied().collect();

    GrayImage::from_raw(
        u32::try_from(width).map_err(|_| shape_err())?,
        u32::try_from(height).map_err(|_| shape_err())?,
        pixels,
    )
    .ok_or_else(shape_err)
}

/// Move a grayscale image buffer into a `[rows, columns]` array.
pub fn gray_array(img: GrayImage) -> Result<Array2<u8>, EncodeError> {
    let (width, height) = img.dimensions();
    Array2::from_shape_vec((height as usize, width as usize), img.into_raw())
        .map_err(|_| EncodeError::Shape(vec![height as usize, width as usize]))
}

/// Split a normalized volume into per-frame rasters.
///
/// With `frames > 1`, axis 0 indexes frames; otherwise the whole array is a
/// single frame.
pub fn split_frames(volume: &ArrayD<u8>, frames: usize) -> Vec<ArrayD<u8>> {
    if frames > 1 && volume.ndim() >= 3 {
        volume.axis_iter(Axis(0)).map(|frame| frame.to_owned()).collect()
    } else {
        vec![volume.clone()]
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Check whether a JPEG quality is within 1-100.
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp a JPEG quality into 1-100.
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn gradient(height: usize, width: usize) -> Array2<u8> {
        Array2::from_shape_fn((height, width), |(y, x)| ((x + y) * 4 % 256) as u8)
    }

    #[test]
    fn test_jpeg_round_trip_dimensions() {
        let encoder = FrameEncoder::new();
        let frame = gradient(24, 40);

        let jpeg = encoder.encode_jpeg(frame.view().into_dyn()).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(encoder.dimensions(&jpeg).unwrap(), (40, 24));

        let decoded = encoder.decode_gray(&jpeg).unwrap();
        assert_eq!(decoded.dim(), (24, 40));
    }

    #[test]
    fn test_png_is_lossless() {
        let encoder = FrameEncoder::new();
        let frame = gradient(16, 16);

        let png = encoder.encode_png(frame.view()).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        assert_eq!(encoder.decode_gray(&png).unwrap(), frame);
    }

    #[test]
    fn test_rgb_jpeg() {
        let encoder = FrameEncoder::with_quality(80);
        let frame = Array3::from_elem((8, 8, 3), 200u8);
        assert!(encoder.encode_jpeg(frame.view().into_dyn()).is_ok());
    }

    #[test]
    fn test_unsupported_shape() {
        let encoder = FrameEncoder::new();
        let frame = Array4::<u8>::zeros((2, 2, 2, 2));
        assert!(matches!(
            encoder.encode_jpeg(frame.view().into_dyn()),
            Err(EncodeError::Shape(_))
        ));
    }

    #[test]
    fn test_split_frames() {
        let volume = Array3::<u8>::zeros((5, 4, 3)).into_dyn();
        let frames = split_frames(&volume, 5);
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0].shape(), &[4, 3]);

        let single = Array2::<u8>::zeros((4, 3)).into_dyn();
        assert_eq!(split_frames(&single, 1).len(), 1);
    }

    #[test]
    fn test_quality_helpers() {
        assert_eq!(FrameEncoder::with_quality(0).quality(), 1);
        assert_eq!(FrameEncoder::with_quality(150).quality(), 100);
        assert!(is_valid_quality(95));
        assert!(!is_valid_quality(0));
    }
}
