//! Surface flattening for tomographic cross-sections.
//!
//! The engine straightens the dominant tissue boundary of a B-scan:
//!
//! ```text
//! slice ─► grayscale u8 ─► ROI rows ─► blur ─► |d/dy| ─► argmax per column
//!                                                              │
//!        contrast ◄─ realign columns ◄─ smoothed curve ◄───────┘
//!                                        (quadratic fit, median fallback)
//! ```
//!
//! [`FlatteningEngine::flatten`] never fails. Any error along the way yields
//! the normalized, unflattened slice instead so a bad curve never blocks
//! display.

pub mod contrast;
pub mod curve;
pub mod roi;

use image::imageops;
use ndarray::{Array2, ArrayView2, ArrayViewD, Axis, Ix2};
use tracing::{debug, warn};

use crate::error::FlattenError;
use crate::raster::{gray_array, gray_image, normalize_array, Sample};

pub use contrast::{clahe, percentile, percentile_stretch};
pub use curve::{detect_curve, fit_quadratic, median, median_filter, realign_columns, vertical_gradient};
pub use roi::{detect_roi, fallback_roi, RowRange};

/// Default width of the median fallback filter.
pub const DEFAULT_MEDIAN_KERNEL: usize = 151;

/// Default CLAHE clip limit.
pub const DEFAULT_CLIP_LIMIT: f64 = 2.0;

/// Default CLAHE tile grid (tiles per side).
pub const DEFAULT_CLAHE_GRID: usize = 8;

/// Index of the representative slice of a `count`-frame volume.
pub fn middle_index(count: usize) -> usize {
    count / 2
}

// =============================================================================
// Configuration
// =============================================================================

/// Final contrast step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContrastMethod {
    /// CLAHE, falling back to the default percentile stretch on small images
    Clahe { clip_limit: f64, grid: usize },

    /// Linear stretch between two percentiles
    PercentileStretch { low: f64, high: f64 },
}

impl Default for ContrastMethod {
    fn default() -> Self {
        ContrastMethod::Clahe {
            clip_limit: DEFAULT_CLIP_LIMIT,
            grid: DEFAULT_CLAHE_GRID,
        }
    }
}

/// Tuning knobs for the flattening pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlattenConfig {
    /// Cumulative-intensity fraction where the ROI starts
    pub roi_low: f64,

    /// Cumulative-intensity fraction where the ROI ends
    pub roi_high: f64,

    /// Rows added on both sides of the ROI
    pub roi_margin: usize,

    /// Gaussian sigma for pre-smoothing
    pub blur_sigma: f32,

    /// Median filter width used when the quadratic fit fails
    pub median_kernel: usize,

    pub contrast: ContrastMethod,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            roi_low: 0.05,
            roi_high: 0.70,
            roi_margin: 10,
            blur_sigma: 0.5,
            median_kernel: DEFAULT_MEDIAN_KERNEL,
            contrast: ContrastMethod::default(),
        }
    }
}

impl FlattenConfig {
    pub fn with_median_kernel(mut self, kernel: usize) -> Self {
        self.median_kernel = kernel;
        self
    }

    pub fn with_contrast(mut self, contrast: ContrastMethod) -> Self {
        self.contrast = contrast;
        self
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Gradient-based boundary flattening.
#[derive(Debug, Clone, Default)]
pub struct FlatteningEngine {
    config: FlattenConfig,
}

impl FlatteningEngine {
    pub fn new(config: FlattenConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FlattenConfig {
        &self.config
    }

    /// Flatten a cross-section, falling back to the unflattened slice.
    ///
    /// Accepts `[rows, columns]`, `[rows, columns, channels]` (up to four
    /// channels) or a `[frames, rows, columns]` stack, of which the middle
    /// frame is used.
    pub fn flatten<T: Sample>(&self, slice: ArrayViewD<'_, T>) -> Array2<u8> {
        match self.try_flatten(slice.view()) {
            Ok(flat) => flat,
            Err(err) => {
                warn!(error = %err, shape = ?slice.shape(), "Flattening failed, serving unflattened slice");
                to_gray(slice.view()).unwrap_or_else(|err| {
                    warn!(error = %err, "Unflattened fallback failed, serving blank slice");
                    Array2::zeros(spatial_dims(slice.shape()))
                })
            }
        }
    }

    /// The fallible pipeline behind [`flatten`](Self::flatten).
    pub fn try_flatten<T: Sample>(&self, slice: ArrayViewD<'_, T>) -> Result<Array2<u8>, FlattenError> {
        let config = &self.config;
        let gray = to_gray(slice)?;

        let roi = detect_roi(gray.view(), config.roi_low, config.roi_high, config.roi_margin);
        debug!(start = roi.start, end = roi.end, "Detected ROI");

        let blurred = gray_array(imageops::blur(&gray_image(gray.view())?, config.blur_sigma))?;
        let gradient = vertical_gradient(blurred.view());
        let raw_curve = detect_curve(gradient.view(), roi);

        let curve = match fit_quadratic(&raw_curve) {
            Ok(curve) => curve,
            Err(err) => {
                debug!(error = %err, kernel = config.median_kernel, "Quadratic fit failed, using median filter");
                median_filter(&raw_curve, config.median_kernel)
            }
        };

        let realigned = realign_columns(gray.view(), &curve);
        Ok(self.enhance(realigned.view()))
    }

    fn enhance(&self, image: ArrayView2<'_, u8>) -> Array2<u8> {
        match self.config.contrast {
            ContrastMethod::Clahe { clip_limit, grid } => clahe(image, clip_limit, grid)
                .unwrap_or_else(|| percentile_stretch(image, 2.0, 98.0)),
            ContrastMethod::PercentileStretch { low, high } => percentile_stretch(image, low, high),
        }
    }
}

/// `[rows, columns]` of an input, used to size a blank fallback.
fn spatial_dims(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (0, 0),
        [n] => (1, *n),
        [rows, cols] => (*rows, *cols),
        [rows, cols, c] if *c <= 4 => (*rows, *cols),
        [_, rows, cols, ..] => (*rows, *cols),
    }
}

/// Reduce a slice to a single 8-bit channel.
///
/// Byte input passes through (rounded after channel mixing); anything else
/// is min-max rescaled.
pub fn to_gray<T: Sample>(slice: ArrayViewD<'_, T>) -> Result<Array2<u8>, FlattenError> {
    let shape = slice.shape().to_vec();

    let (plane, mixed): (Array2<f64>, bool) = match shape.as_slice() {
        [_, _] => {
            let plane = slice
                .into_dimensionality::<Ix2>()
                .map_err(|_| FlattenError::Shape(shape.clone()))?;
            (plane.mapv(|v| v.to_f64()), false)
        }
        [rows, cols, channels] if (1..=4).contains(channels) => {
            let (rows, cols, channels) = (*rows, *cols, *channels);
            let plane = Array2::from_shape_fn((rows, cols), |(y, x)| {
                let px = |c: usize| slice[[y, x, c]].to_f64();
                match channels {
                    1 => px(0),
                    3 | 4 => 0.299 * px(0) + 0.587 * px(1) + 0.114 * px(2),
                    n => (0..n).map(px).sum::<f64>() / n as f64,
                }
            });
            (plane, channels > 1)
        }
        [frames, _, _] if *frames > 0 => {
            let middle = slice.index_axis(Axis(0), middle_index(*frames));
            return to_gray(middle);
        }
        _ => return Err(FlattenError::Shape(shape.clone())),
    };

    if plane.is_empty() {
        return Err(FlattenError::Shape(shape));
    }

    if T::IS_BYTE {
        let round: fn(f64) -> f64 = if mixed { f64::round } else { f64::trunc };
        return Ok(plane.mapv(|v| round(v).clamp(0.0, 255.0) as u8));
    }

    let normalized = normalize_array(plane.view().into_dyn(), None)?;
    normalized
        .into_dimensionality::<Ix2>()
        .map_err(|_| FlattenError::Shape(shape))
}

// =============================================================================
// Tests
// =============================================================================
