use crate::config::PlannerConfig;
use crate::keyframe::{Keyframe, Mode};
use crate::optimization::{
    block_diagonal, cost_matrix, fixed_constraints, terminal_velocity_inequality, QpProblem,
    QuadraticProgramSolver,
};
use crate::polynomial::PolynomialSegment;
use crate::TrajectoryError;

/// Minimum-derivative optimizer for one taut run of keyframes
///
/// Inter-segment derivative continuity is only enforced when
/// [`PlannerConfig::enforce_continuity`] is set. With the default configuration the
/// sub-segments of a run meet only where a keyframe fixes a value, so unconstrained derivatives
/// may jump at interior keyframes.
pub struct TautSegmentOptimizer<'a> {
    config: &'a PlannerConfig,
    solver: &'a dyn QuadraticProgramSolver,
}

impl<'a> TautSegmentOptimizer<'a> {
    pub fn new(config: &'a PlannerConfig, solver: &'a dyn QuadraticProgramSolver) -> Self {
        Self { config, solver }
    }

    /// Optimize the load trajectory over keyframes `start..=end`
    /// # Arguments
    /// * `keyframes` - All keyframes of the trajectory
    /// * `start` - First keyframe of the run
    /// * `end` - Last keyframe of the run
    /// * `ends_in_slack` - Whether tension is lost at `end`, which adds the terminal velocity
    ///   inequality `v(end) >= 0`
    /// # Returns
    /// * One taut segment per keyframe interval of the run
    /// # Errors
    /// * `InfeasibleQp` for non-positive segment durations or infeasible constraints
    /// * `UnboundedQp` if the keyframes leave the cost without a minimum
    /// * `SolverTimeout` if the solver exceeds its budget
    pub fn optimize(
        &self,
        keyframes: &[Keyframe],
        start: usize,
        end: usize,
        ends_in_slack: bool,
    ) -> Result<Vec<PolynomialSegment>, TrajectoryError> {
        if end <= start || end >= keyframes.len() {
            return Err(TrajectoryError::InvalidInput(format!(
                "Taut run [{}, {}] is empty or out of range",
                start, end
            )));
        }
        let run = &keyframes[start..=end];
        let (n, r) = (self.config.order, self.config.minimized_derivative_order);
        let segments = end - start;
        let durations: Vec<f64> = run.windows(2).map(|w| w[1].time - w[0].time).collect();
        if let Some(j) = durations.iter().position(|&d| !(d > 0.0)) {
            return Err(TrajectoryError::InfeasibleQp {
                keyframe: start + j + 1,
                mode: Mode::Taut,
                reason: format!(
                    "keyframes {} and {} have a non-positive duration {}",
                    start + j,
                    start + j + 1,
                    durations[j]
                ),
            });
        }

        let blocks: Vec<_> = durations
            .iter()
            .map(|&d| cost_matrix(n, r, 0.0, d) * self.config.cost_weight)
            .collect();
        let (a_eq, b_eq) = fixed_constraints(r, n, run, self.config.enforce_continuity);
        let mut problem = QpProblem::equality_constrained(block_diagonal(&blocks), a_eq, b_eq);
        if ends_in_slack {
            let (a_ineq, b_ineq) =
                terminal_velocity_inequality(n, segments, durations[segments - 1]);
            problem = problem.with_inequalities(a_ineq, b_ineq);
        }
        if segments > 1 && !self.config.enforce_continuity {
            log::warn!(
                "Taut run [{}, {}]: {} sub-segments joined without derivative continuity",
                start,
                end,
                segments
            );
        }
        log::debug!(
            "Taut run [{}, {}]: {} variables, {} equality rows, {} inequality rows",
            start,
            end,
            problem.variables(),
            problem.a_eq.nrows(),
            problem.a_ineq.nrows()
        );

        let solution = self
            .solver
            .solve(&problem)
            .map_err(|e| e.at_keyframe(end, Mode::Taut))?;
        Ok(durations
            .iter()
            .enumerate()
            .map(|(j, &duration)| {
                let coefficients = solution.rows(j * (n + 1), n + 1).iter().copied().collect();
                PolynomialSegment::new(coefficients, duration, Mode::Taut)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::ActiveSetSolver;

    const EPS: f64 = 1e-6;

    fn rest(position: f64) -> Vec<Option<f64>> {
        vec![Some(position), Some(0.0), Some(0.0), Some(0.0)]
    }

    fn position_only(position: f64) -> Vec<Option<f64>> {
        vec![Some(position), None, None, None]
    }

    fn optimize(
        config: &PlannerConfig,
        keyframes: &[Keyframe],
        ends_in_slack: bool,
    ) -> Result<Vec<PolynomialSegment>, TrajectoryError> {
        let solver = ActiveSetSolver::new(config.solver.clone());
        let optimizer = TautSegmentOptimizer::new(config, &solver);
        optimizer.optimize(keyframes, 0, keyframes.len() - 1, ends_in_slack)
    }

    #[test]
    fn test_release_run_matches_closed_form() {
        let config = PlannerConfig::default();
        let keyframes = vec![
            Keyframe::new(0.0, rest(0.0), 1.0),
            Keyframe::new(1.0, position_only(5.0), 0.0),
        ];
        let segments = optimize(&config, &keyframes, true).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].coefficients.len(), 8);
        // free terminal derivatives give x = (-t^7 + 7t^6 - 21t^5 + 35t^4) / 4
        let expected = [-0.25, 1.75, -5.25, 8.75, 0.0, 0.0, 0.0, 0.0];
        for (c, e) in segments[0].coefficients.iter().zip(expected) {
            assert!((c - e).abs() < EPS, "{:?}", segments[0].coefficients);
        }
        let end = segments[0].evaluate(1.0, 1);
        assert!((end[0] - 5.0).abs() < EPS);
        assert!((end[1] - 17.5).abs() < EPS);
    }

    #[test]
    fn test_terminal_velocity_inequality_binds() {
        let config = PlannerConfig::default();
        let keyframes = vec![
            Keyframe::new(0.0, rest(0.0), 1.0),
            Keyframe::new(1.0, position_only(-5.0), 0.0),
        ];
        let free = optimize(&config, &keyframes, false).unwrap();
        assert!(free[0].evaluate(1.0, 1)[1] < -1.0);
        let bound = optimize(&config, &keyframes, true).unwrap();
        let end = bound[0].evaluate(1.0, 1);
        assert!((end[0] + 5.0).abs() < EPS);
        assert!(end[1] >= -EPS);
        let start = bound[0].evaluate(0.0, 3);
        assert!(start.iter().all(|v| v.abs() < EPS));
    }

    #[test]
    fn test_boundary_values_hold_with_real_durations() {
        let config = PlannerConfig::default();
        let keyframes = vec![
            Keyframe::new(0.5, rest(1.0), 1.0),
            Keyframe::new(2.0, rest(4.0), 1.0),
            Keyframe::new(4.5, rest(-2.0), 1.0),
        ];
        let segments = optimize(&config, &keyframes, false).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].duration, 1.5);
        assert_eq!(segments[1].duration, 2.5);
        for (j, segment) in segments.iter().enumerate() {
            let start = segment.evaluate(0.0, 3);
            let end = segment.evaluate(1.0, 3);
            for d in 0..4 {
                let expected_start = keyframes[j].desired(d).unwrap();
                let expected_end = keyframes[j + 1].desired(d).unwrap();
                assert!((start[d] - expected_start).abs() < EPS);
                assert!((end[d] - expected_end).abs() < EPS);
            }
        }
    }

    #[test]
    fn test_interior_derivatives_jump_without_continuity() {
        let keyframes = vec![
            Keyframe::new(0.0, rest(0.0), 1.0),
            Keyframe::new(1.0, position_only(1.0), 1.0),
            Keyframe::new(2.0, rest(3.0), 1.0),
        ];
        let mut config = PlannerConfig::default();
        let segments = optimize(&config, &keyframes, false).unwrap();
        let left = segments[0].evaluate(1.0, 1);
        let right = segments[1].evaluate(0.0, 1);
        assert!((left[0] - 1.0).abs() < EPS);
        assert!((right[0] - 1.0).abs() < EPS);
        // each side is optimized on its own: 3.5 m/s arriving, 7 m/s leaving
        assert!((left[1] - 3.5).abs() < EPS);
        assert!((right[1] - 7.0).abs() < EPS);

        config.enforce_continuity = true;
        let segments = optimize(&config, &keyframes, false).unwrap();
        let left = segments[0].evaluate(1.0, 3);
        let right = segments[1].evaluate(0.0, 3);
        for d in 0..4 {
            assert!((left[d] - right[d]).abs() < EPS, "derivative {}", d);
        }
        assert!((left[0] - 1.0).abs() < EPS);
    }

    #[test]
    fn test_positions_only_has_flat_solution() {
        // any cubic through both positions has zero snap
        let config = PlannerConfig::default();
        let keyframes = vec![
            Keyframe::new(0.0, position_only(0.0), 1.0),
            Keyframe::new(1.0, position_only(1.0), 1.0),
        ];
        let segments = optimize(&config, &keyframes, false).unwrap();
        let segment = &segments[0];
        assert!(segment.coefficients.iter().all(|c| c.is_finite()));
        assert!(segment.evaluate(0.0, 0)[0].abs() < EPS);
        assert!((segment.evaluate(1.0, 0)[0] - 1.0).abs() < EPS);
        for tau in [0.0, 0.5, 1.0] {
            assert!(segment.evaluate(tau, 4)[4].abs() < EPS);
        }
    }

    #[test]
    fn test_short_and_long_spacings() {
        let config = PlannerConfig::default();
        for dt in [0.05, 0.3, 10.0] {
            // the release run is the same curve in tau for every duration
            let keyframes = vec![
                Keyframe::new(0.0, rest(0.0), 1.0),
                Keyframe::new(dt, position_only(5.0), 0.0),
            ];
            let segments = optimize(&config, &keyframes, true).unwrap();
            let expected = [-0.25, 1.75, -5.25, 8.75, 0.0, 0.0, 0.0, 0.0];
            for (c, e) in segments[0].coefficients.iter().zip(expected) {
                assert!((c - e).abs() < EPS, "dt {}: {:?}", dt, segments[0].coefficients);
            }
            assert!((segments[0].evaluate(1.0, 1)[1] - 17.5 / dt).abs() < EPS / dt);

            let keyframes = vec![
                Keyframe::new(0.0, rest(1.0), 1.0),
                Keyframe::new(dt, rest(4.0), 1.0),
                Keyframe::new(3.0 * dt, rest(-2.0), 1.0),
            ];
            let segments = optimize(&config, &keyframes, false).unwrap();
            for (j, segment) in segments.iter().enumerate() {
                let start = segment.evaluate(0.0, 3);
                let end = segment.evaluate(1.0, 3);
                for d in 0..4 {
                    let tolerance = EPS / dt.powi(d as i32);
                    let expected_start = keyframes[j].desired(d).unwrap();
                    let expected_end = keyframes[j + 1].desired(d).unwrap();
                    assert!((start[d] - expected_start).abs() < tolerance, "dt {}", dt);
                    assert!((end[d] - expected_end).abs() < tolerance, "dt {}", dt);
                }
            }
        }
    }

    #[test]
    fn test_repeated_time_is_infeasible() {
        let config = PlannerConfig::default();
        let keyframes = vec![
            Keyframe::new(0.0, rest(0.0), 1.0),
            Keyframe::new(0.0, position_only(1.0), 0.0),
        ];
        assert!(matches!(
            optimize(&config, &keyframes, true),
            Err(TrajectoryError::InfeasibleQp {
                keyframe: 1,
                mode: Mode::Taut,
                ..
            })
        ));
    }
}
