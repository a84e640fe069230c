//! 8-bit rasters: normalization of decoded samples and frame image encoding.
//!
//! # Architecture
//!
//! ```text
//! SampleVolume ──► normalize() ──► ArrayD<u8> ──► split_frames() ──► FrameEncoder ──► JPEG / PNG
//!      ▲                ▲
//!  decoder chain    WindowHint (container metadata)
//! ```

pub mod encoder;
pub mod normalize;

pub use encoder::{
    clamp_quality, gray_array, gray_image, is_valid_quality, split_frames, FrameEncoder,
    DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use normalize::{normalize, normalize_array, Sample, WindowHint, FLAT_FILL};
