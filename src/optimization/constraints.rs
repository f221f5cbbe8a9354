use nalgebra::{DMatrix, DVector};

use crate::keyframe::Keyframe;
use crate::polynomial::{basis_row, derivative_coefficients};

/// Place a per-segment row into the stacked decision vector of a run
fn embed(width: usize, segment: usize, row: &DVector<f64>) -> DVector<f64> {
    let mut full = DVector::<f64>::zeros(width);
    full.rows_mut(segment * row.len(), row.len()).copy_from(row);
    full
}

fn stack(rows: Vec<(DVector<f64>, f64)>, width: usize) -> (DMatrix<f64>, DVector<f64>) {
    let mut a = DMatrix::<f64>::zeros(rows.len(), width);
    let mut b = DVector::<f64>::zeros(rows.len());
    for (i, (row, value)) in rows.into_iter().enumerate() {
        a.row_mut(i).copy_from(&row.transpose());
        b[i] = value;
    }
    (a, b)
}

/// Boundary equality constraints of a run of segments
///
/// Segment `j` runs from `keyframes[j]` to `keyframes[j + 1]`. Every finite desired value of
/// derivative orders `0..derivative_order` becomes a fixed-value row; unconstrained entries
/// produce no row. Interior keyframes bind both adjacent segments unless `continuity` is set,
/// in which case they bind the left segment only and continuity rows for every derivative
/// order tie the two segments together.
/// # Arguments
/// * `derivative_order` - Number of derivative orders considered, starting at position
/// * `order` - Polynomial order n
/// * `keyframes` - Boundary keyframes of the run, one more than the number of segments
/// * `continuity` - Add derivative continuity rows at interior keyframes
/// # Returns
/// * `(A, b)` with one row per constraint and `segments * (order + 1)` columns
pub fn fixed_constraints(
    derivative_order: usize,
    order: usize,
    keyframes: &[Keyframe],
    continuity: bool,
) -> (DMatrix<f64>, DVector<f64>) {
    let segments = keyframes.len().saturating_sub(1);
    let width = segments * (order + 1);
    let durations: Vec<f64> = keyframes.windows(2).map(|w| w[1].time - w[0].time).collect();
    let mut rows = Vec::new();
    for (j, keyframe) in keyframes.iter().enumerate() {
        for d in 0..derivative_order {
            let Some(value) = keyframe.desired(d) else {
                continue;
            };
            if j > 0 {
                let end = basis_row(order, d, 1.0, durations[j - 1]);
                rows.push((embed(width, j - 1, &end), value));
            }
            if j < segments && (j == 0 || !continuity) {
                let start = basis_row(order, d, 0.0, durations[j]);
                rows.push((embed(width, j, &start), value));
            }
        }
        if continuity && j > 0 && j < segments {
            for d in 0..derivative_order {
                let end = embed(width, j - 1, &basis_row(order, d, 1.0, durations[j - 1]));
                let start = embed(width, j, &basis_row(order, d, 0.0, durations[j]));
                rows.push((end - start, 0.0));
            }
        }
    }
    stack(rows, width)
}

/// Terminal velocity inequality of a run, `-v(1) <= 0`
///
/// Built from the first-derivative row of the derivative coefficient table, scaled to the last
/// segment's real duration and negated.
/// # Arguments
/// * `order` - Polynomial order n
/// * `segments` - Number of segments in the run
/// * `duration` - Real duration of the last segment
pub fn terminal_velocity_inequality(
    order: usize,
    segments: usize,
    duration: f64,
) -> (DMatrix<f64>, DVector<f64>) {
    let table = derivative_coefficients(order, 1);
    let velocity: DVector<f64> = table.row(1).transpose() / duration;
    let row = embed(segments * (order + 1), segments - 1, &(-velocity));
    stack(vec![(row, 0.0)], segments * (order + 1))
}
