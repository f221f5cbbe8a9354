//! Polynomial segments in nondimensional time
//!
//! Segments use the monomial basis with the highest degree first, over the nondimensional time
//! `tau` in [0, 1]. A segment spanning a real duration `T` maps `tau = (t - t0) / T`, so the k-th
//! real-time derivative is the k-th `tau` derivative divided by `T^k`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::keyframe::Mode;
use crate::TrajectoryError;

/// Falling factorial `degree! / (degree - k)!`, zero when `k > degree`
pub(crate) fn falling_factorial(degree: usize, k: usize) -> f64 {
    if k > degree {
        return 0.0;
    }
    ((degree - k + 1)..=degree).map(|v| v as f64).product()
}

/// Derivative coefficient table of the monomial basis
///
/// Row `k` holds, for every coefficient (highest degree first), the factor that the k-th
/// derivative applies to it. Evaluated at `tau = 1` the k-th derivative of a polynomial is the
/// dot product of row `k` with its coefficients.
/// # Arguments
/// * `order` - Polynomial order n
/// * `derivative_order` - Highest derivative order in the table
/// # Returns
/// * A `(derivative_order + 1) x (order + 1)` matrix
/// # Example
/// ```
/// use hybrid_load_traj::polynomial::derivative_coefficients;
/// let table = derivative_coefficients(3, 2);
/// // d/dt of [t^3, t^2, t, 1]
/// assert_eq!(table.row(1).iter().copied().collect::<Vec<_>>(), vec![3.0, 2.0, 1.0, 0.0]);
/// ```
pub fn derivative_coefficients(order: usize, derivative_order: usize) -> DMatrix<f64> {
    DMatrix::from_fn(derivative_order + 1, order + 1, |k, j| {
        falling_factorial(order - j, k)
    })
}

/// Row vector mapping coefficients to the real-time `derivative` of a segment at `tau`
/// # Arguments
/// * `order` - Polynomial order n
/// * `derivative` - Derivative order
/// * `tau` - Nondimensional time
/// * `duration` - Real duration of the segment in seconds
pub fn basis_row(order: usize, derivative: usize, tau: f64, duration: f64) -> DVector<f64> {
    let scale = duration.powi(derivative as i32).recip();
    DVector::from_fn(order + 1, |j, _| {
        let degree = order - j;
        if degree < derivative {
            0.0
        } else {
            falling_factorial(degree, derivative) * tau.powi((degree - derivative) as i32) * scale
        }
    })
}

/// A polynomial segment of the load or quadrotor trajectory
/// # Example
/// ```
/// use hybrid_load_traj::{Mode, PolynomialSegment};
/// // x(tau) = 2 tau^2 + 1 over two seconds
/// let segment = PolynomialSegment::new(vec![2.0, 0.0, 1.0], 2.0, Mode::Taut);
/// let state = segment.evaluate(1.0, 2);
/// assert_eq!(state[0], 3.0);
/// assert_eq!(state[1], 2.0);
/// assert_eq!(state[2], 1.0);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolynomialSegment {
    /// Coefficients, highest degree first
    pub coefficients: Vec<f64>,
    /// Real duration spanned by `tau` in [0, 1], in seconds
    pub duration: f64,
    /// Mode that produced the segment
    pub mode: Mode,
}

impl PolynomialSegment {
    pub fn new(coefficients: Vec<f64>, duration: f64, mode: Mode) -> Self {
        Self {
            coefficients,
            duration,
            mode,
        }
    }

    /// Polynomial order n
    pub fn order(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Evaluate the segment and its real-time derivatives
    /// # Arguments
    /// * `tau` - Nondimensional time in [0, 1]
    /// * `max_derivative` - Highest derivative order returned
    /// # Returns
    /// * Values of derivative orders `0..=max_derivative`
    pub fn evaluate(&self, tau: f64, max_derivative: usize) -> Vec<f64> {
        let coefficients = DVector::from_column_slice(&self.coefficients);
        (0..=max_derivative)
            .map(|k| basis_row(self.order(), k, tau, self.duration).dot(&coefficients))
            .collect()
    }

    /// Closed-form free-fall segment `x(t) = -g t^2 / 2 + v t + x0`
    ///
    /// Coefficients are stored in tau, so the evaluated acceleration equals `-g` up to a few
    /// units of rounding from the `T^2` scaling rather than bit for bit.
    /// # Arguments
    /// * `order` - Polynomial order n, at least 2
    /// * `gravity` - Gravitational acceleration in m/s^2
    /// * `duration` - Flight time in seconds
    /// * `position` - Load position at release
    /// * `velocity` - Load velocity at release
    /// # Example
    /// ```
    /// use hybrid_load_traj::PolynomialSegment;
    /// let segment = PolynomialSegment::free_fall(7, 9.8, 2.0, 1.0, 3.0);
    /// assert_eq!(segment.coefficients[..5], [0.0; 5]);
    /// assert!((segment.evaluate(0.3, 2)[2] + 9.8).abs() < 1e-12);
    /// ```
    pub fn free_fall(
        order: usize,
        gravity: f64,
        duration: f64,
        position: f64,
        velocity: f64,
    ) -> Self {
        let mut coefficients = vec![0.0; order + 1];
        coefficients[order - 2] = -0.5 * gravity * duration * duration;
        coefficients[order - 1] = velocity * duration;
        coefficients[order] = position;
        Self::new(coefficients, duration, Mode::Slack)
    }
}

/// Evaluate a run of consecutive segments at a real time
///
/// Segment `j` spans `keyframe_times[j]..keyframe_times[j + 1]`; the final keyframe time is
/// included in the last segment.
/// # Arguments
/// * `time` - Real time in seconds
/// * `segments` - Consecutive segments of one run
/// * `keyframe_times` - Boundary times, one more than the number of segments
/// * `max_derivative` - Highest derivative order returned
/// # Errors
/// * If the time lies outside the run or the boundary count does not match
pub fn evaluate_at(
    time: f64,
    segments: &[PolynomialSegment],
    keyframe_times: &[f64],
    max_derivative: usize,
) -> Result<Vec<f64>, TrajectoryError> {
    if segments.is_empty() || keyframe_times.len() != segments.len() + 1 {
        return Err(TrajectoryError::InvalidInput(format!(
            "{} segments need {} keyframe times, got {}",
            segments.len(),
            segments.len() + 1,
            keyframe_times.len()
        )));
    }
    let (first, last) = (keyframe_times[0], keyframe_times[segments.len()]);
    if !(first..=last).contains(&time) {
        return Err(TrajectoryError::InvalidInput(format!(
            "Time {} is outside the run [{}, {}]",
            time, first, last
        )));
    }
    let index = keyframe_times[1..segments.len()]
        .iter()
        .position(|&t| time < t)
        .unwrap_or(segments.len() - 1);
    let (t0, t1) = (keyframe_times[index], keyframe_times[index + 1]);
    let tau = (time - t0) / (t1 - t0);
    Ok(segments[index].evaluate(tau, max_derivative))
}
