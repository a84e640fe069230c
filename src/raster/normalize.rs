//! Sample normalization to 8-bit.
//!
//! The primary path windows the samples when the container supplies a
//! center/width pair and min-max rescales otherwise. If the primary path
//! fails (an unusable window or non-finite samples), a float64 min-max
//! rescale over the finite samples is used instead. A flat input maps to
//! mid-gray everywhere.

use ndarray::{ArrayD, ArrayViewD};
use tracing::debug;

use crate::error::NormalizeError;
use crate::format::{with_samples, SampleVolume};

/// Value used for every pixel of a flat (max == min) input.
pub const FLAT_FILL: u8 = 128;

// =============================================================================
// Window Hint
// =============================================================================

/// Display window supplied by container metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowHint {
    pub center: f64,
    pub width: f64,
}

impl WindowHint {
    pub fn new(center: f64, width: f64) -> Self {
        Self { center, width }
    }

    /// Build a hint from possibly multi-valued metadata.
    ///
    /// Both values must be present; the first element of each is used.
    pub fn from_values(center: Option<&[f64]>, width: Option<&[f64]>) -> Option<Self> {
        let center = *center?.first()?;
        let width = *width?.first()?;
        Some(Self { center, width })
    }

    /// `(lower, upper)` bounds of the window.
    fn bounds(&self) -> Result<(f64, f64), NormalizeError> {
        if !self.center.is_finite() || !self.width.is_finite() || self.width <= 0.0 {
            return Err(NormalizeError::InvalidWindow {
                center: self.center,
                width: self.width,
            });
        }
        let half = self.width / 2.0;
        Ok((self.center - half, self.center + half))
    }
}

// =============================================================================
// Sample Trait
// =============================================================================

/// Numeric sample types the normalizer and flattening engine accept.
pub trait Sample: Copy + Send + Sync + 'static {
    /// Already an 8-bit display value; no rescale needed.
    const IS_BYTE: bool = false;

    fn to_f64(self) -> f64;
}

macro_rules! impl_sample {
    ($($ty:ty),*) => {
        $(
            impl Sample for $ty {
                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_sample!(u16, i16, u32, i32, f32, f64);

impl Sample for u8 {
    const IS_BYTE: bool = true;

    fn to_f64(self) -> f64 {
        self as f64
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize a decoded volume to 8-bit, preserving its shape.
pub fn normalize(
    volume: &SampleVolume,
    window: Option<WindowHint>,
) -> Result<ArrayD<u8>, NormalizeError> {
    with_samples!(volume, array => normalize_array(array.view(), window))
}

/// Normalize any sample array to 8-bit, preserving its shape.
pub fn normalize_array<T: Sample>(
    samples: ArrayViewD<'_, T>,
    window: Option<WindowHint>,
) -> Result<ArrayD<u8>, NormalizeError> {
    match primary(&samples, window) {
        Ok(normalized) => Ok(normalized),
        Err(NormalizeError::EmptyArray) => Err(NormalizeError::EmptyArray),
        Err(err) => {
            debug!(error = %err, "Primary normalization failed, using float rescale");
            float_rescale(&samples)
        }
    }
}

fn primary<T: Sample>(
    samples: &ArrayViewD<'_, T>,
    window: Option<WindowHint>,
) -> Result<ArrayD<u8>, NormalizeError> {
    if samples.is_empty() {
        return Err(NormalizeError::EmptyArray);
    }

    if let Some(window) = window {
        let (lower, upper) = window.bounds()?;
        return Ok(samples.mapv(|v| to_byte(v.to_f64().clamp(lower, upper), lower, upper)));
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in samples.iter() {
        let v = v.to_f64();
        if !v.is_finite() {
            return Err(NormalizeError::NonFiniteSamples);
        }
        min = min.min(v);
        max = max.max(v);
    }

    Ok(rescale(samples, min, max))
}

/// Min-max rescale over finite samples only; non-finite samples become 0.
fn float_rescale<T: Sample>(samples: &ArrayViewD<'_, T>) -> Result<ArrayD<u8>, NormalizeError> {
    if samples.is_empty() {
        return Err(NormalizeError::EmptyArray);
    }

    let (min, max) = samples
        .iter()
        .map(|v| v.to_f64())
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .ok_or(NormalizeError::NoFiniteSamples)?;

    Ok(rescale(samples, min, max))
}

fn rescale<T: Sample>(samples: &ArrayViewD<'_, T>, min: f64, max: f64) -> ArrayD<u8> {
    if max > min {
        samples.mapv(|v| {
            let v = v.to_f64();
            if v.is_finite() {
                to_byte(v, min, max)
            } else {
                0
            }
        })
    } else {
        ArrayD::from_elem(samples.raw_dim(), FLAT_FILL)
    }
}

/// Map `value` in `[lower, upper]` onto `0..=255`, truncating.
fn to_byte(value: f64, lower: f64, upper: f64) -> u8 {
    ((value - lower) / (upper - lower) * 255.0) as u8
}

// =============================================================================
// Tests
// =============================================================================
