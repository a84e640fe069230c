//! Row range that most likely holds the tissue boundary.

use ndarray::{ArrayView2, Axis};

/// Half-open row range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

impl RowRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pick the ROI from the cumulative row-intensity profile.
///
/// The range starts at the first row where the cumulative sum reaches `low`
/// of the total and ends where it reaches `high`, each widened by `margin`
/// rows. The end is clamped to `height - 1`.
pub fn detect_roi(image: ArrayView2<'_, u8>, low: f64, high: f64, margin: usize) -> RowRange {
    let height = image.nrows();
    let row_sums: Vec<u64> = image
        .axis_iter(Axis(0))
        .map(|row| row.iter().map(|&v| v as u64).sum())
        .collect();

    let mut cumulative = Vec::with_capacity(height);
    let mut running = 0u64;
    for sum in row_sums {
        running += sum;
        cumulative.push(running);
    }

    let total = running as f64;
    let first_reaching = |fraction: f64| {
        cumulative
            .iter()
            .position(|&c| c as f64 >= fraction * total)
    };

    match (first_reaching(low), first_reaching(high)) {
        (Some(start), Some(end)) => RowRange {
            start: start.saturating_sub(margin),
            end: (end + margin).min(height.saturating_sub(1)),
        },
        _ => fallback_roi(height),
    }
}

/// Rows `height / 6 .. 2 * height / 3`.
pub fn fallback_roi(height: usize) -> RowRange {
    RowRange {
        start: height / 6,
        end: (height * 2 / 3).min(height.saturating_sub(1)),
    }
}
