//! Boundary curve detection, smoothing and column realignment.

use ndarray::{Array2, ArrayView2};

use crate::error::FlattenError;

use super::roi::RowRange;

// =============================================================================
// Gradient
// =============================================================================

/// Mirror an out-of-range index back into `0..len` without repeating the edge.
fn reflect_101(index: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let last = len as isize - 1;
    let reflected = if index < 0 {
        -index
    } else if index > last {
        2 * last - index
    } else {
        index
    };
    reflected.clamp(0, last) as usize
}

/// Absolute 3x3 Sobel derivative along rows, min-max scaled to `0..=255`.
pub fn vertical_gradient(image: ArrayView2<'_, u8>) -> Array2<u8> {
    let (height, width) = image.dim();
    let mut magnitude = Array2::<f64>::zeros((height, width));

    for y in 0..height {
        let above = reflect_101(y as isize - 1, height);
        let below = reflect_101(y as isize + 1, height);
        for x in 0..width {
            let mut sum = 0.0;
            for (dx, weight) in [(-1isize, 1.0), (0, 2.0), (1, 1.0)] {
                let col = reflect_101(x as isize + dx, width);
                sum += weight * (image[[below, col]] as f64 - image[[above, col]] as f64);
            }
            magnitude[[y, x]] = sum.abs();
        }
    }

    let max = magnitude.iter().copied().fold(0.0, f64::max);
    let min = magnitude.iter().copied().fold(f64::INFINITY, f64::min);
    if max <= min {
        return Array2::zeros((height, width));
    }
    magnitude.mapv(|v| ((v - min) / (max - min) * 255.0) as u8)
}

/// Row of strongest gradient per column, searched inside `roi`.
///
/// Columns with an empty search range report `roi.start`.
pub fn detect_curve(gradient: ArrayView2<'_, u8>, roi: RowRange) -> Vec<f64> {
    let end = roi.end.min(gradient.nrows());

    gradient
        .columns()
        .into_iter()
        .map(|column| {
            let mut best = roi.start;
            let mut best_value = None;
            for row in roi.start..end {
                let value = column[row];
                if best_value.map_or(true, |b| value > b) {
                    best = row;
                    best_value = Some(value);
                }
            }
            best as f64
        })
        .collect()
}

// =============================================================================
// Smoothing
// =============================================================================

/// Least-squares parabola through `(i, curve[i])`, evaluated at every `i`.
pub fn fit_quadratic(curve: &[f64]) -> Result<Vec<f64>, FlattenError> {
    let n = curve.len();
    if n < 3 {
        return Err(FlattenError::Fit(format!("{} points for a degree-2 fit", n)));
    }
    if curve.iter().any(|v| !v.is_finite()) {
        return Err(FlattenError::Fit("non-finite curve values".to_string()));
    }

    // Center and scale x to keep the normal equations well conditioned
    let mean = (n - 1) as f64 / 2.0;
    let scale = mean.max(1.0);
    let t = |i: usize| (i as f64 - mean) / scale;

    let mut powers = [0.0f64; 5];
    let mut rhs = [0.0f64; 3];
    for (i, &y) in curve.iter().enumerate() {
        let ti = t(i);
        let mut p = 1.0;
        for k in 0..5 {
            powers[k] += p;
            if k < 3 {
                rhs[k] += p * y;
            }
            p *= ti;
        }
    }

    let mut system = [
        [powers[0], powers[1], powers[2], rhs[0]],
        [powers[1], powers[2], powers[3], rhs[1]],
        [powers[2], powers[3], powers[4], rhs[2]],
    ];
    let coeffs = solve_3x3(&mut system)?;

    Ok((0..n)
        .map(|i| {
            let ti = t(i);
            coeffs[0] + coeffs[1] * ti + coeffs[2] * ti * ti
        })
        .collect())
}

/// Gaussian elimination with partial pivoting on an augmented 3x4 matrix.
fn solve_3x3(m: &mut [[f64; 4]; 3]) -> Result<[f64; 3], FlattenError> {
    for col in 0..3 {
        let pivot = (col..3)
            .max_by(|&a, &b| m[a][col].abs().total_cmp(&m[b][col].abs()))
            .unwrap_or(col);
        if m[pivot][col].abs() < 1e-12 {
            return Err(FlattenError::Fit("singular normal equations".to_string()));
        }
        m.swap(col, pivot);

        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| m[row][k] * x[k]).sum();
        x[row] = (m[row][3] - tail) / m[row][row];
    }
    Ok(x)
}

/// Sliding median of odd width `kernel`; the window shrinks at the edges.
pub fn median_filter(curve: &[f64], kernel: usize) -> Vec<f64> {
    let half = kernel.max(1) / 2;
    (0..curve.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(curve.len());
            median(&curve[lo..hi])
        })
        .collect()
}

/// Median with the mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// =============================================================================
// Realignment
// =============================================================================

/// Shift every column so `curve` lands on its median row.
///
/// Positive shifts move content down, negative shifts move it up. Exposed
/// rows stay zero; a shift of the full height or more blanks the column.
pub fn realign_columns(image: ArrayView2<'_, u8>, curve: &[f64]) -> Array2<u8> {
    let (height, width) = image.dim();
    let mut out = Array2::<u8>::zeros((height, width));
    let reference = median(curve).round() as i64;
    let rows = height as i64;

    for (col, &point) in curve.iter().enumerate().take(width) {
        let shift = reference - point.round() as i64;
        if shift.abs() >= rows {
            continue;
        }
        let source = image.column(col);
        let mut target = out.column_mut(col);
        if shift >= 0 {
            let s = shift as usize;
            for row in s..height {
                target[row] = source[row - s];
            }
        } else {
            let s = (-shift) as usize;
            for row in 0..height - s {
                target[row] = source[row + s];
            }
        }
    }

    out
}

// =============================================================================
// Tests
// =============================================================================
