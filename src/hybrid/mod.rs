//! Hybrid taut/slack trajectory planning
//!
//! Keyframes are walked in order by a two-state machine. Runs of taut keyframes are optimized
//! as one minimum-derivative QP; a keyframe with zero desired tension closes the current run and
//! triggers a free-fall transition, after which a new taut run starts at that keyframe.
use nalgebra::DMatrix;

use crate::config::{PlannerConfig, SLACK_QUAD_ORDER};
use crate::keyframe::{keyframes_from_columns, Keyframe, Mode};
use crate::optimization::{ActiveSetSolver, QuadraticProgramSolver};
use crate::polynomial::PolynomialSegment;
use crate::trajectory::{ModeSwitchRecord, QuadSegment, TrajectoryOutput};
use crate::TrajectoryError;

mod free_fall;
mod taut;

pub use free_fall::{flight_time, reengagement_velocity, FreeFallSegments, FreeFallTransition};
pub use taut::TautSegmentOptimizer;

/// State of the keyframe walk
#[derive(Clone, Debug)]
enum HybridState {
    /// Accumulating a taut run that started at `run_start`
    Taut { run_start: usize },
    /// Tension was lost at `keyframe`; `release` is the last taut segment before it
    Slack {
        keyframe: usize,
        release: PolynomialSegment,
    },
}

/// Accumulates the parallel segment sequences and the mode log
#[derive(Default)]
struct TrajectoryBuilder {
    load_segments: Vec<PolynomialSegment>,
    quad_segments: Vec<QuadSegment>,
    mode_log: Vec<ModeSwitchRecord>,
}

impl TrajectoryBuilder {
    fn push_taut(&mut self, segments: Vec<PolynomialSegment>) {
        self.quad_segments
            .extend(std::iter::repeat(QuadSegment::Inactive).take(segments.len()));
        self.load_segments.extend(segments);
    }

    fn push_slack(&mut self, segments: FreeFallSegments) {
        self.load_segments.push(segments.load);
        self.quad_segments.push(QuadSegment::Active(segments.quad));
    }

    fn log_switch(&mut self, keyframe: usize, previous: Mode, next: Mode) {
        log::info!("Keyframe {}: switching from {} to {}", keyframe, previous, next);
        self.mode_log.push(ModeSwitchRecord {
            keyframe,
            previous,
            next,
        });
    }

    fn finish(self, keyframes: &[Keyframe]) -> TrajectoryOutput {
        TrajectoryOutput {
            segment_count: self.load_segments.len(),
            load_segments: self.load_segments,
            quad_segments: self.quad_segments,
            mode_log: self.mode_log,
            keyframe_times: keyframes.iter().map(|k| k.time).collect(),
        }
    }
}

/// Planner for a quadrotor carrying a cable-suspended load
/// # Example
/// ```
/// use hybrid_load_traj::{config::PlannerConfig, HybridPlanner, Keyframe};
/// let planner = HybridPlanner::new(PlannerConfig::default()).unwrap();
/// let keyframes = vec![
///     Keyframe::new(0.0, vec![Some(0.0), Some(0.0), Some(0.0), Some(0.0)], 1.0),
///     Keyframe::new(2.0, vec![Some(1.0), Some(0.0), Some(0.0), Some(0.0)], 1.0),
/// ];
/// let output = planner.plan(&keyframes).unwrap();
/// assert_eq!(output.segment_count, 1);
/// assert!(output.mode_log.is_empty());
/// ```
pub struct HybridPlanner {
    config: PlannerConfig,
    solver: Box<dyn QuadraticProgramSolver>,
}

impl HybridPlanner {
    /// Create a planner backed by the active-set QP solver
    /// # Errors
    /// * If the configuration does not validate
    pub fn new(config: PlannerConfig) -> Result<Self, TrajectoryError> {
        let solver = Box::new(ActiveSetSolver::new(config.solver.clone()));
        Self::with_solver(config, solver)
    }

    /// Create a planner with a custom QP backend
    pub fn with_solver(
        config: PlannerConfig,
        solver: Box<dyn QuadraticProgramSolver>,
    ) -> Result<Self, TrajectoryError> {
        config.validate()?;
        Ok(Self { config, solver })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan the load and quadrotor trajectories through `keyframes`
    /// # Arguments
    /// * `keyframes` - Keyframes in time order, the first and last with non-zero tension
    /// # Returns
    /// * Parallel load and quadrotor segments with the mode switch log
    /// # Errors
    /// * `InvalidInput` for malformed keyframes
    /// * QP and flight-time errors of the first failing segment; no partial output is returned
    pub fn plan(&self, keyframes: &[Keyframe]) -> Result<TrajectoryOutput, TrajectoryError> {
        self.validate_keyframes(keyframes)?;
        let taut = TautSegmentOptimizer::new(&self.config, self.solver.as_ref());
        let free_fall = FreeFallTransition::new(&self.config, self.solver.as_ref());
        let mut builder = TrajectoryBuilder::default();
        let mut state = HybridState::Taut { run_start: 0 };
        let last = keyframes.len() - 1;

        for i in 1..=last {
            state = match state {
                HybridState::Taut { run_start }
                    if keyframes[i].is_slack(self.config.tension_epsilon) =>
                {
                    let segments = taut.optimize(keyframes, run_start, i, true)?;
                    let release = segments.last().cloned().ok_or_else(|| {
                        TrajectoryError::InvalidInput(format!(
                            "Taut run ending at keyframe {} produced no segments",
                            i
                        ))
                    })?;
                    builder.push_taut(segments);
                    builder.log_switch(i, Mode::Taut, Mode::Slack);
                    HybridState::Slack {
                        keyframe: i,
                        release,
                    }
                }
                other => other,
            };
            // slack to taut is unconditional once the transition is built
            if let HybridState::Slack { keyframe, release } = state {
                let segments = free_fall.transition(keyframes, keyframe, &release)?;
                builder.push_slack(segments);
                builder.log_switch(keyframe, Mode::Slack, Mode::Taut);
                state = HybridState::Taut {
                    run_start: keyframe,
                };
            }
        }

        if let HybridState::Taut { run_start } = state {
            if run_start < last {
                let segments = taut.optimize(keyframes, run_start, last, false)?;
                builder.push_taut(segments);
            }
        }
        let output = builder.finish(keyframes);
        log::info!(
            "Planned {} segments with {} mode switches",
            output.segment_count,
            output.mode_log.len()
        );
        Ok(output)
    }

    /// Plan from column-major inputs
    /// # Arguments
    /// * `times` - Keyframe times
    /// * `desired_states` - One row per derivative order, one column per keyframe; non-finite
    ///   entries are unconstrained
    /// * `tensions` - Desired cable tension per keyframe
    pub fn plan_from_columns(
        &self,
        times: &[f64],
        desired_states: &DMatrix<f64>,
        tensions: &[f64],
    ) -> Result<TrajectoryOutput, TrajectoryError> {
        let keyframes = keyframes_from_columns(times, desired_states, tensions)?;
        self.plan(&keyframes)
    }

    fn validate_keyframes(&self, keyframes: &[Keyframe]) -> Result<(), TrajectoryError> {
        if keyframes.len() < 2 {
            return Err(TrajectoryError::InvalidInput(format!(
                "At least 2 keyframes are required, got {}",
                keyframes.len()
            )));
        }
        if let Some(i) = keyframes
            .iter()
            .position(|k| !k.time.is_finite() || !k.tension.is_finite())
        {
            return Err(TrajectoryError::InvalidInput(format!(
                "Keyframe {} has a non-finite time or tension",
                i
            )));
        }
        let epsilon = self.config.tension_epsilon;
        let last = keyframes.len() - 1;
        for i in [0, last] {
            if keyframes[i].is_slack(epsilon) {
                return Err(TrajectoryError::InvalidInput(format!(
                    "Tension cannot be lost at boundary keyframe {}",
                    i
                )));
            }
        }
        let has_slack = keyframes.iter().any(|k| k.is_slack(epsilon));
        if has_slack && self.config.order < SLACK_QUAD_ORDER {
            return Err(TrajectoryError::InvalidInput(format!(
                "Polynomial order {} is below the slack quadrotor order {}",
                self.config.order, SLACK_QUAD_ORDER
            )));
        }
        Ok(())
    }
}

/// Plan a hybrid trajectory with the default QP backend
/// # Errors
/// * Configuration errors and all errors of [`HybridPlanner::plan`]
pub fn generate_hybrid_trajectory(
    config: &PlannerConfig,
    keyframes: &[Keyframe],
) -> Result<TrajectoryOutput, TrajectoryError> {
    HybridPlanner::new(config.clone())?.plan(keyframes)
}
