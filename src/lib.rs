//! # Hybrid Load Trajectory
//! This crate generates piecewise-polynomial trajectories for a quadrotor carrying a point
//! load on a rigid-length cable. The cable is either taut, in which case the load trajectory
//! is optimized directly, or slack, in which case the load falls freely and the quadrotor
//! trajectory is optimized so that the cable re-engages at the next keyframe.
//! ## Features
//! - Minimum-derivative (e.g. minimum snap) quadratic programs per taut run
//! - Closed-form free-fall synthesis and momentum-matched quadrotor re-engagement
//! - Explicit taut/slack state machine with a mode switch log
//! - YAML scenarios, JSON and CSV export of the resulting trajectory
//! ## Example
//! ```
//! use hybrid_load_traj::{config::PlannerConfig, HybridPlanner, Keyframe};
//! let keyframes = vec![
//!     Keyframe::new(0.0, vec![Some(0.0), Some(0.0), Some(0.0), Some(0.0)], 1.0),
//!     Keyframe::new(1.0, vec![Some(5.0), None, None, None], 0.0),
//!     Keyframe::new(2.0, vec![Some(10.0), Some(0.0), Some(0.0), Some(0.0)], 1.0),
//! ];
//! let planner = HybridPlanner::new(PlannerConfig::default()).unwrap();
//! let output = planner.plan(&keyframes).unwrap();
//! assert_eq!(output.segment_count, 3);
//! ```
pub mod config;
pub mod hybrid;
pub mod keyframe;
pub mod optimization;
pub mod polynomial;
pub mod trajectory;

pub use hybrid::{generate_hybrid_trajectory, HybridPlanner};
pub use keyframe::{Keyframe, Mode};
pub use polynomial::PolynomialSegment;
pub use trajectory::{ModeSwitchRecord, QuadSegment, TrajectoryOutput, TrajectorySample};

#[derive(thiserror::Error, Debug)]
/// Represents errors that can occur while generating a hybrid trajectory
/// # Example
/// ```
/// use hybrid_load_traj::TrajectoryError;
/// let error = TrajectoryError::Dimensionality(3);
/// assert!(error.to_string().contains("3"));
/// ```
pub enum TrajectoryError {
    /// More than one spatial dimension was requested
    #[error("Dimensionality error: {0} spatial dimensions requested, only 1 is supported")]
    Dimensionality(usize),
    /// The QP of a segment has no feasible solution
    #[error("Infeasible QP at keyframe {keyframe} ({mode} mode): {reason}")]
    InfeasibleQp {
        keyframe: usize,
        mode: Mode,
        reason: String,
    },
    /// The QP of a segment has an unbounded objective
    #[error("Unbounded QP at keyframe {keyframe} ({mode} mode)")]
    UnboundedQp { keyframe: usize, mode: Mode },
    /// The QP solver exceeded its wall-clock budget
    #[error("QP solver timed out at keyframe {keyframe} ({mode} mode) after {elapsed_ms} ms")]
    SolverTimeout {
        keyframe: usize,
        mode: Mode,
        elapsed_ms: u128,
    },
    /// The free-fall quadratic has no real roots
    #[error("Complex flight time at keyframe {keyframe}: discriminant {discriminant} is negative")]
    ComplexFlightTime { keyframe: usize, discriminant: f64 },
    /// The free-fall quadratic only has non-positive roots
    #[error("Degenerate flight time at keyframe {keyframe}: {flight_time} s")]
    DegenerateFlightTime { keyframe: usize, flight_time: f64 },
    /// Malformed keyframes or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Error reading or writing files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error parsing YAML configuration
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Error serializing JSON output
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Error writing CSV output
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
