//! Slack-mode transition
//!
//! When tension is lost the load follows a ballistic arc, `x(t) = -g t^2 / 2 + v t + x0`, along
//! an axis pointing against gravity. The quadrotor flies a minimum-snap segment that starts one
//! cable length above the load and re-engages the cable at the next keyframe with a velocity
//! chosen by momentum matching.

use crate::config::{PlannerConfig, SLACK_QUAD_DERIVATIVE, SLACK_QUAD_ORDER};
use crate::keyframe::{Keyframe, Mode};
use crate::optimization::{cost_matrix, fixed_constraints, QpProblem, QuadraticProgramSolver};
use crate::polynomial::{evaluate_at, PolynomialSegment};
use crate::TrajectoryError;

/// Segments produced by one slack transition
#[derive(Clone, Debug)]
pub struct FreeFallSegments {
    /// Closed-form free-fall segment of the load
    pub load: PolynomialSegment,
    /// Minimum-snap segment of the quadrotor
    pub quad: PolynomialSegment,
    /// Flight time of the load in seconds
    pub flight_time: f64,
}

/// Flight time of a ballistic arc covering `displacement`
///
/// Solves `-g t^2 / 2 + v t - d = 0`. With the axis pointing against gravity the larger root is
/// the crossing on the descending branch of the arc, which is taken as the re-engagement time.
/// # Arguments
/// * `keyframe` - Keyframe index used in error reports
/// * `gravity` - Gravitational acceleration in m/s^2
/// * `velocity` - Load velocity at release
/// * `displacement` - Displacement to the re-engagement position
/// # Errors
/// * `ComplexFlightTime` if the discriminant is negative
/// * `DegenerateFlightTime` if the larger root is not positive
/// # Example
/// ```
/// use hybrid_load_traj::hybrid::flight_time;
/// // thrown up at 9.8 m/s, back at the release height after 2 s
/// let t = flight_time(1, 9.8, 9.8, 0.0).unwrap();
/// assert!((t - 2.0).abs() < 1e-12);
/// ```
pub fn flight_time(
    keyframe: usize,
    gravity: f64,
    velocity: f64,
    displacement: f64,
) -> Result<f64, TrajectoryError> {
    let (a, b, c) = (-0.5 * gravity, velocity, -displacement);
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return Err(TrajectoryError::ComplexFlightTime {
            keyframe,
            discriminant,
        });
    }
    let root = discriminant.sqrt();
    let t = ((-b + root) / (2.0 * a)).max((-b - root) / (2.0 * a));
    if !(t > 0.0) {
        return Err(TrajectoryError::DegenerateFlightTime {
            keyframe,
            flight_time: t,
        });
    }
    Ok(t)
}

/// Quadrotor velocity just before re-engagement
///
/// The cable re-engages as a perfectly inelastic impact: quadrotor and load leave with the
/// desired load velocity `v_des`, so `m_q v_q + m_l v_arrival = (m_q + m_l) v_des`. An
/// unconstrained desired velocity means no impulse, `v_des = v_arrival`.
/// # Example
/// ```
/// use hybrid_load_traj::hybrid::reengagement_velocity;
/// assert_eq!(reengagement_velocity(Some(0.0), -10.0, 0.1), 1.0);
/// assert_eq!(reengagement_velocity(None, -10.0, 0.1), -10.0);
/// ```
pub fn reengagement_velocity(
    desired_load_velocity: Option<f64>,
    arrival_velocity: f64,
    mass_ratio: f64,
) -> f64 {
    match desired_load_velocity {
        Some(v) => v + mass_ratio * (v - arrival_velocity),
        None => arrival_velocity,
    }
}

/// Slack-mode transition at a tension-loss keyframe
pub struct FreeFallTransition<'a> {
    config: &'a PlannerConfig,
    solver: &'a dyn QuadraticProgramSolver,
}

impl<'a> FreeFallTransition<'a> {
    pub fn new(config: &'a PlannerConfig, solver: &'a dyn QuadraticProgramSolver) -> Self {
        Self { config, solver }
    }

    /// Build the load and quadrotor segments of the slack phase starting at `keyframe`
    /// # Arguments
    /// * `keyframes` - All keyframes of the trajectory
    /// * `keyframe` - Index of the keyframe where tension is lost
    /// * `release` - Terminal segment of the taut run ending at `keyframe`
    /// # Errors
    /// * `InvalidInput` if there is no next keyframe with a desired position
    /// * `ComplexFlightTime` / `DegenerateFlightTime` for unreachable re-engagement positions
    /// * QP errors of the quadrotor segment, reported in slack mode
    pub fn transition(
        &self,
        keyframes: &[Keyframe],
        keyframe: usize,
        release: &PolynomialSegment,
    ) -> Result<FreeFallSegments, TrajectoryError> {
        if keyframe == 0 || keyframe + 1 >= keyframes.len() {
            return Err(TrajectoryError::InvalidInput(format!(
                "Keyframe {} has no taut run before it or no re-engagement keyframe after it",
                keyframe
            )));
        }
        let physics = &self.config.physics;
        let next = &keyframes[keyframe + 1];
        let target = next.desired(0).ok_or_else(|| {
            TrajectoryError::InvalidInput(format!(
                "Keyframe {} needs a desired position for re-engagement",
                keyframe + 1
            ))
        })?;

        let release_time = keyframes[keyframe].time;
        let window = [keyframes[keyframe - 1].time, release_time];
        let state = evaluate_at(
            release_time,
            std::slice::from_ref(release),
            &window,
            SLACK_QUAD_DERIVATIVE - 1,
        )?;
        let (position, velocity) = (state[0], state[1]);

        let duration = flight_time(keyframe, physics.gravity, velocity, target - position)?;
        let arrival_velocity = velocity - physics.gravity * duration;
        let quad_velocity =
            reengagement_velocity(next.desired(1), arrival_velocity, physics.mass_ratio());
        log::debug!(
            "Keyframe {}: {:.4} s free fall from {:.4} m at {:.4} m/s, quad catch at {:.4} m/s",
            keyframe,
            duration,
            position,
            velocity,
            quad_velocity
        );

        let mut initial: Vec<Option<f64>> = state.iter().copied().map(Some).collect();
        initial[0] = Some(position + physics.cable_length);
        let boundary = [
            Keyframe::new(0.0, initial, 0.0),
            Keyframe::new(
                duration,
                vec![
                    Some(target + physics.cable_length),
                    Some(quad_velocity),
                    None,
                    None,
                ],
                0.0,
            ),
        ];
        let (a_eq, b_eq) = fixed_constraints(
            SLACK_QUAD_DERIVATIVE,
            SLACK_QUAD_ORDER,
            &boundary,
            false,
        );
        let hessian = cost_matrix(SLACK_QUAD_ORDER, SLACK_QUAD_DERIVATIVE, 0.0, duration)
            * self.config.cost_weight;
        let solution = self
            .solver
            .solve(&QpProblem::equality_constrained(hessian, a_eq, b_eq))
            .map_err(|e| e.at_keyframe(keyframe, Mode::Slack))?;

        // pad the high-degree end so every segment carries order + 1 coefficients
        let padding = self.config.order.saturating_sub(SLACK_QUAD_ORDER);
        let coefficients = std::iter::repeat(0.0)
            .take(padding)
            .chain(solution.iter().copied())
            .collect();
        Ok(FreeFallSegments {
            load: PolynomialSegment::free_fall(
                self.config.order,
                physics.gravity,
                duration,
                position,
                velocity,
            ),
            quad: PolynomialSegment::new(coefficients, duration, Mode::Slack),
            flight_time: duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::ActiveSetSolver;

    const EPS: f64 = 1e-6;

    fn scenario(final_position: f64, final_velocity: Option<f64>) -> Vec<Keyframe> {
        vec![
            Keyframe::new(0.0, vec![Some(0.0), Some(0.0), Some(0.0), Some(0.0)], 1.0),
            Keyframe::new(1.0, vec![Some(5.0), None, None, None], 0.0),
            Keyframe::new(
                2.0,
                vec![Some(final_position), final_velocity, Some(0.0), Some(0.0)],
                1.0,
            ),
        ]
    }

    /// Release segment reaching 5 m at 17.5 m/s after one second
    fn release() -> PolynomialSegment {
        PolynomialSegment::new(
            vec![-0.25, 1.75, -5.25, 8.75, 0.0, 0.0, 0.0, 0.0],
            1.0,
            Mode::Taut,
        )
    }

    fn transition(
        config: &PlannerConfig,
        keyframes: &[Keyframe],
    ) -> Result<FreeFallSegments, TrajectoryError> {
        let solver = ActiveSetSolver::new(config.solver.clone());
        FreeFallTransition::new(config, &solver).transition(keyframes, 1, &release())
    }

    #[test]
    fn test_flight_time_takes_larger_root() {
        // -4.9 t^2 + 17.5 t - 5 = 0
        let t = flight_time(1, 9.8, 17.5, 5.0).unwrap();
        let expected = (17.5 + (17.5f64.powi(2) - 2.0 * 9.8 * 5.0).sqrt()) / 9.8;
        assert!((t - expected).abs() < 1e-12);
        assert!(t > 3.0);
    }

    #[test]
    fn test_flight_time_errors() {
        assert!(matches!(
            flight_time(3, 9.8, 1.0, 10.0),
            Err(TrajectoryError::ComplexFlightTime { keyframe: 3, .. })
        ));
        assert!(matches!(
            flight_time(2, 9.8, 0.0, 0.0),
            Err(TrajectoryError::DegenerateFlightTime { keyframe: 2, .. })
        ));
    }

    #[test]
    fn test_reengagement_momentum_balance() {
        let (m_q, m_l) = (1.0, 0.1);
        let (v_arrival, v_des) = (-14.0, 0.5);
        let v_q = reengagement_velocity(Some(v_des), v_arrival, m_l / m_q);
        assert!((m_q * v_q + m_l * v_arrival - (m_q + m_l) * v_des).abs() < 1e-12);
    }

    #[test]
    fn test_transition_segments() {
        let config = PlannerConfig::default();
        let segments = transition(&config, &scenario(10.0, Some(0.0))).unwrap();
        let g = config.physics.gravity;
        let t = segments.flight_time;
        assert_eq!(segments.load.coefficients.len(), 8);
        assert_eq!(segments.quad.coefficients.len(), 8);
        assert_eq!(segments.load.mode, Mode::Slack);
        assert_eq!(segments.quad.mode, Mode::Slack);
        assert_eq!(segments.load.duration, t);

        // load: ballistic arc from the release state to the next keyframe
        let start = segments.load.evaluate(0.0, 1);
        assert!((start[0] - 5.0).abs() < EPS);
        assert!((start[1] - 17.5).abs() < EPS);
        let end = segments.load.evaluate(1.0, 1);
        assert!((end[0] - 10.0).abs() < EPS);
        let arrival = 17.5 - g * t;
        assert!((end[1] - arrival).abs() < EPS);
        for tau in [0.0, 0.3, 0.7, 1.0] {
            assert!((segments.load.evaluate(tau, 2)[2] + g).abs() < 1e-9);
        }

        // quad: starts one cable length above the load with the load's derivatives
        let quad_start = segments.quad.evaluate(0.0, 3);
        let load_release = release().evaluate(1.0, 3);
        assert!((quad_start[0] - 6.0).abs() < EPS);
        for d in 1..4 {
            assert!((quad_start[d] - load_release[d]).abs() < EPS);
        }
        let quad_end = segments.quad.evaluate(1.0, 1);
        assert!((quad_end[0] - 11.0).abs() < EPS);
        let expected = reengagement_velocity(Some(0.0), arrival, 0.1);
        assert!((quad_end[1] - expected).abs() < EPS);
    }

    #[test]
    fn test_transition_pads_higher_orders() {
        let config = PlannerConfig {
            order: 9,
            ..Default::default()
        };
        let mut release = release().coefficients;
        release.splice(0..0, [0.0, 0.0]);
        let release = PolynomialSegment::new(release, 1.0, Mode::Taut);
        let solver = ActiveSetSolver::new(config.solver.clone());
        let segments = FreeFallTransition::new(&config, &solver)
            .transition(&scenario(10.0, None), 1, &release)
            .unwrap();
        assert_eq!(segments.load.coefficients.len(), 10);
        assert_eq!(segments.quad.coefficients.len(), 10);
        assert_eq!(segments.quad.coefficients[..2], [0.0, 0.0]);
        // no desired velocity at re-engagement: the quad matches the load's arrival
        let arrival = segments.load.evaluate(1.0, 1)[1];
        assert!((segments.quad.evaluate(1.0, 1)[1] - arrival).abs() < EPS);
    }

    #[test]
    fn test_unreachable_target() {
        let config = PlannerConfig::default();
        assert!(matches!(
            transition(&config, &scenario(100.0, Some(0.0))),
            Err(TrajectoryError::ComplexFlightTime { keyframe: 1, .. })
        ));
    }

    #[test]
    fn test_missing_reengagement_position() {
        let config = PlannerConfig::default();
        let mut keyframes = scenario(10.0, Some(0.0));
        keyframes[2].desired[0] = None;
        assert!(matches!(
            transition(&config, &keyframes),
            Err(TrajectoryError::InvalidInput(_))
        ));
    }
}
