//! Quadratic program construction and solution
//!
//! Minimum-derivative trajectories are posed as `min 1/2 x' Q x` subject to linear boundary
//! constraints, where `x` stacks the coefficients of every segment of a run.

mod constraints;
mod cost;
mod solver;

pub use constraints::{fixed_constraints, terminal_velocity_inequality};
pub use cost::{block_diagonal, cost_matrix};
pub use solver::{ActiveSetSolver, QpError, QpProblem, QuadraticProgramSolver};
