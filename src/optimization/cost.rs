use nalgebra::DMatrix;

use crate::polynomial::falling_factorial;

/// Smoothness cost matrix of one segment
///
/// Integrates the squared `derivative_order`-th real-time derivative of the monomial basis
/// (highest degree first) over nondimensional time [0, 1] and scales the result to the real
/// duration `t1 - t0`, so that `c' Q c` equals the integral over the segment in seconds.
/// # Arguments
/// * `order` - Polynomial order n
/// * `derivative_order` - Minimized derivative order r
/// * `t0` - Segment start time
/// * `t1` - Segment end time
/// # Returns
/// * A symmetric positive semidefinite `(order + 1) x (order + 1)` matrix
/// # Example
/// ```
/// use hybrid_load_traj::optimization::cost_matrix;
/// let q = cost_matrix(7, 4, 0.0, 1.0);
/// // integral of (d^4/dt^4 t^4)^2 over [0, 1]
/// assert_eq!(q[(3, 3)], 576.0);
/// ```
pub fn cost_matrix(order: usize, derivative_order: usize, t0: f64, t1: f64) -> DMatrix<f64> {
    let duration = t1 - t0;
    let scale = duration.powi(1 - 2 * derivative_order as i32);
    DMatrix::from_fn(order + 1, order + 1, |i, j| {
        let (di, dj) = (order - i, order - j);
        if di < derivative_order || dj < derivative_order {
            return 0.0;
        }
        let power = (di + dj - 2 * derivative_order + 1) as f64;
        falling_factorial(di, derivative_order) * falling_factorial(dj, derivative_order) / power
            * scale
    })
}

/// Stack square blocks along the diagonal
pub fn block_diagonal(blocks: &[DMatrix<f64>]) -> DMatrix<f64> {
    let size: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut result = DMatrix::<f64>::zeros(size, size);
    let mut offset = 0;
    for block in blocks {
        let n = block.nrows();
        result.view_mut((offset, offset), (n, n)).copy_from(block);
        offset += n;
    }
    result
}
