//! Keyframes and cable modes
//!
//! A keyframe pins the load's desired position and derivatives at a time, together with the
//! desired cable tension. The tension decides whether the cable stays taut or goes slack.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TrajectoryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// Cable mode of the hybrid system
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Cable under tension, load trajectory optimized directly
    Taut,
    /// Cable tension is zero, load in free-fall
    Slack,
}

impl Mode {
    /// Numeric code used in mode logs (1 = taut, 2 = slack)
    /// # Example
    /// ```
    /// use hybrid_load_traj::Mode;
    /// assert_eq!(Mode::Taut.code(), 1);
    /// assert_eq!(Mode::Slack.code(), 2);
    /// ```
    pub fn code(self) -> u8 {
        match self {
            Mode::Taut => 1,
            Mode::Slack => 2,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Taut => write!(f, "taut"),
            Mode::Slack => write!(f, "slack"),
        }
    }
}

/// Desired load state and cable tension at one instant
/// # Example
/// ```
/// use hybrid_load_traj::Keyframe;
/// let keyframe = Keyframe::new(1.0, vec![Some(5.0), None, None, None], 0.0);
/// assert_eq!(keyframe.desired(0), Some(5.0));
/// assert_eq!(keyframe.desired(1), None);
/// assert!(keyframe.is_slack(1e-9));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Desired time in seconds
    pub time: f64,
    /// Desired position and derivatives, index = derivative order, `None` = unconstrained
    pub desired: Vec<Option<f64>>,
    /// Desired cable tension in newtons
    pub tension: f64,
}

impl Keyframe {
    pub fn new(time: f64, desired: Vec<Option<f64>>, tension: f64) -> Self {
        Self {
            time,
            desired,
            tension,
        }
    }

    /// Desired value of the given derivative order, `None` when unconstrained.
    /// Non-finite values are treated as unconstrained.
    pub fn desired(&self, derivative: usize) -> Option<f64> {
        self.desired
            .get(derivative)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }

    /// Whether the cable goes slack at this keyframe
    /// # Arguments
    /// * `epsilon` - Tension magnitude at or below which the cable counts as slack
    pub fn is_slack(&self, epsilon: f64) -> bool {
        self.tension.abs() <= epsilon
    }
}

/// Build keyframes from column-major planner inputs
/// # Arguments
/// * `times` - Keyframe times, length m+1
/// * `desired_states` - r × (m+1) matrix, row = derivative order, non-finite = unconstrained
/// * `tensions` - Desired tensions, length m+1
/// # Errors
/// * If the column counts disagree
/// # Example
/// ```
/// use hybrid_load_traj::keyframe::keyframes_from_columns;
/// use nalgebra::DMatrix;
/// let desired = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, f64::INFINITY]);
/// let keyframes = keyframes_from_columns(&[0.0, 1.0], &desired, &[1.0, 1.0]).unwrap();
/// assert_eq!(keyframes[1].desired(1), None);
/// ```
pub fn keyframes_from_columns(
    times: &[f64],
    desired_states: &DMatrix<f64>,
    tensions: &[f64],
) -> Result<Vec<Keyframe>, TrajectoryError> {
    if times.len() != desired_states.ncols() || times.len() != tensions.len() {
        return Err(TrajectoryError::InvalidInput(format!(
            "{} keyframe times, {} desired state columns and {} tensions do not match",
            times.len(),
            desired_states.ncols(),
            tensions.len()
        )));
    }
    Ok(times
        .iter()
        .zip(tensions)
        .enumerate()
        .map(|(j, (&time, &tension))| {
            let desired = desired_states
                .column(j)
                .iter()
                .map(|&v| v.is_finite().then_some(v))
                .collect();
            Keyframe::new(time, desired, tension)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tension_tolerance() {
        let keyframe = Keyframe::new(0.0, vec![Some(0.0)], 1e-12);
        assert!(keyframe.is_slack(1e-9));
        assert!(!keyframe.is_slack(0.0));
        let keyframe = Keyframe::new(0.0, vec![Some(0.0)], -1e-3);
        assert!(!keyframe.is_slack(1e-9));
    }

    #[test]
    fn test_non_finite_desired_is_unconstrained() {
        let keyframe = Keyframe::new(0.0, vec![Some(f64::NAN), Some(2.0)], 1.0);
        assert_eq!(keyframe.desired(0), None);
        assert_eq!(keyframe.desired(1), Some(2.0));
        assert_eq!(keyframe.desired(7), None);
    }

    #[test]
    fn test_keyframes_from_columns_rejects_mismatch() {
        let desired = DMatrix::<f64>::zeros(4, 3);
        assert!(keyframes_from_columns(&[0.0, 1.0], &desired, &[1.0, 0.0]).is_err());
    }

    #[test]
    fn test_keyframes_from_yaml() {
        let keyframes: Vec<Keyframe> = serde_yaml::from_str(
            r#"
            - time: 0.0
              desired: [0.0, 0.0, ~, ~]
              tension: 1.0
            - time: 1.0
              desired: [5.0]
              tension: 0.0
            "#,
        )
        .unwrap();
        assert_eq!(keyframes.len(), 2);
        assert_eq!(keyframes[0].desired(1), Some(0.0));
        assert_eq!(keyframes[0].desired(2), None);
        assert!(keyframes[1].is_slack(1e-9));
    }
}
