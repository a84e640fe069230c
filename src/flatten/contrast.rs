//! Contrast enhancement for flattened cross-sections.
//!
//! CLAHE follows the usual tile scheme: the image is cut into a `grid x grid`
//! set of tiles, each tile gets a clipped histogram-equalization LUT, and
//! every pixel blends the LUTs of its four nearest tile centers.

use ndarray::{Array2, ArrayView2};

const BINS: usize = 256;

/// Contrast-limited adaptive histogram equalization.
///
/// Returns `None` when the image is smaller than the tile grid, in which case
/// callers fall back to [`percentile_stretch`].
pub fn clahe(image: ArrayView2<'_, u8>, clip_limit: f64, grid: usize) -> Option<Array2<u8>> {
    let (height, width) = image.dim();
    if grid == 0 || height < grid || width < grid {
        return None;
    }

    let tile_h = height.div_ceil(grid);
    let tile_w = width.div_ceil(grid);
    let area = tile_h * tile_w;

    // Pixels past the image edge (when the grid does not divide evenly) are
    // read from the mirrored interior.
    let fetch = |y: usize, x: usize| image[[mirror(y, height), mirror(x, width)]];

    let clip = if clip_limit > 0.0 {
        ((clip_limit * area as f64 / BINS as f64) as usize).max(1)
    } else {
        usize::MAX
    };
    let scale = (BINS - 1) as f64 / area as f64;

    let mut luts = vec![[0u8; BINS]; grid * grid];
    for ty in 0..grid {
        for tx in 0..grid {
            let mut hist = [0usize; BINS];
            for y in ty * tile_h..(ty + 1) * tile_h {
                for x in tx * tile_w..(tx + 1) * tile_w {
                    hist[fetch(y, x) as usize] += 1;
                }
            }
            clip_histogram(&mut hist, clip);

            let lut = &mut luts[ty * grid + tx];
            let mut running = 0usize;
            for (bin, count) in hist.iter().enumerate() {
                running += count;
                lut[bin] = (running as f64 * scale).round().min(255.0) as u8;
            }
        }
    }

    let neighbours = |pos: usize, tile: usize| {
        let f = pos as f64 / tile as f64 - 0.5;
        let lower = f.floor();
        let weight = f - lower;
        let lower = lower as isize;
        let first = lower.max(0) as usize;
        let second = ((lower + 1).max(0) as usize).min(grid - 1);
        (first.min(grid - 1), second, weight)
    };

    let mut out = Array2::<u8>::zeros((height, width));
    for y in 0..height {
        let (ty1, ty2, ya) = neighbours(y, tile_h);
        for x in 0..width {
            let (tx1, tx2, xa) = neighbours(x, tile_w);
            let v = image[[y, x]] as usize;

            let top = luts[ty1 * grid + tx1][v] as f64 * (1.0 - xa)
                + luts[ty1 * grid + tx2][v] as f64 * xa;
            let bottom = luts[ty2 * grid + tx1][v] as f64 * (1.0 - xa)
                + luts[ty2 * grid + tx2][v] as f64 * xa;

            out[[y, x]] = (top * (1.0 - ya) + bottom * ya).round().clamp(0.0, 255.0) as u8;
        }
    }

    Some(out)
}

fn mirror(index: usize, len: usize) -> usize {
    if index < len {
        index
    } else {
        (2 * (len - 1)).saturating_sub(index).min(len - 1)
    }
}

/// Clip every bin at `clip` and spread the excess evenly, leftovers spaced
/// across the histogram.
fn clip_histogram(hist: &mut [usize; BINS], clip: usize) {
    let mut excess = 0;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }

    let batch = excess / BINS;
    let mut residual = excess - batch * BINS;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (BINS / residual).max(1);
        let mut bin = 0;
        while bin < BINS && residual > 0 {
            hist[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }
}

/// Linearly interpolated percentile over all pixels.
pub fn percentile(image: ArrayView2<'_, u8>, q: f64) -> f64 {
    let mut values: Vec<u8> = image.iter().copied().collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();

    let rank = (q / 100.0).clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    values[lo] as f64 + (values[hi] as f64 - values[lo] as f64) * frac
}

/// Stretch the `low`..`high` percentile range onto `0..=255`.
///
/// An image whose percentiles coincide is returned unchanged.
pub fn percentile_stretch(image: ArrayView2<'_, u8>, low: f64, high: f64) -> Array2<u8> {
    let lo = percentile(image, low);
    let hi = percentile(image, high);
    if hi <= lo {
        return image.to_owned();
    }
    image.mapv(|v| ((v as f64 - lo) / (hi - lo) * 255.0).clamp(0.0, 255.0) as u8)
}
