use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};

use crate::config::SolverConfig;
use crate::keyframe::Mode;
use crate::TrajectoryError;

#[derive(thiserror::Error, Debug)]
/// Failures reported by a QP solver
pub enum QpError {
    /// No point satisfies the constraints
    #[error("infeasible: {0}")]
    Infeasible(String),
    /// The objective is unbounded below on the feasible set
    #[error("unbounded objective")]
    Unbounded,
    /// The solver exceeded its wall-clock budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The problem matrices are inconsistent or contain non-finite values
    #[error("invalid problem: {0}")]
    InvalidProblem(String),
}

impl QpError {
    /// Attach the keyframe index and mode of the failing segment
    pub fn at_keyframe(self, keyframe: usize, mode: Mode) -> TrajectoryError {
        match self {
            QpError::Infeasible(reason) | QpError::InvalidProblem(reason) => {
                TrajectoryError::InfeasibleQp {
                    keyframe,
                    mode,
                    reason,
                }
            }
            QpError::Unbounded => TrajectoryError::UnboundedQp { keyframe, mode },
            QpError::Timeout(elapsed) => TrajectoryError::SolverTimeout {
                keyframe,
                mode,
                elapsed_ms: elapsed.as_millis(),
            },
        }
    }
}

/// Convex QP `min 1/2 x' H x + f' x` s.t. `A_eq x = b_eq`, `A_ineq x <= b_ineq`
#[derive(Clone, Debug)]
pub struct QpProblem {
    pub hessian: DMatrix<f64>,
    pub linear: DVector<f64>,
    pub a_eq: DMatrix<f64>,
    pub b_eq: DVector<f64>,
    pub a_ineq: DMatrix<f64>,
    pub b_ineq: DVector<f64>,
}

impl QpProblem {
    /// Problem with a zero linear term and no inequality constraints
    pub fn equality_constrained(
        hessian: DMatrix<f64>,
        a_eq: DMatrix<f64>,
        b_eq: DVector<f64>,
    ) -> Self {
        let n = hessian.nrows();
        Self {
            hessian,
            linear: DVector::zeros(n),
            a_eq,
            b_eq,
            a_ineq: DMatrix::zeros(0, n),
            b_ineq: DVector::zeros(0),
        }
    }

    /// Add inequality rows `A x <= b`
    pub fn with_inequalities(mut self, a_ineq: DMatrix<f64>, b_ineq: DVector<f64>) -> Self {
        self.a_ineq = a_ineq;
        self.b_ineq = b_ineq;
        self
    }

    pub fn variables(&self) -> usize {
        self.hessian.nrows()
    }

    fn check(&self) -> Result<(), QpError> {
        let n = self.variables();
        let shapes_match = self.hessian.ncols() == n
            && self.linear.len() == n
            && self.a_eq.ncols() == n
            && self.a_eq.nrows() == self.b_eq.len()
            && self.a_ineq.ncols() == n
            && self.a_ineq.nrows() == self.b_ineq.len();
        if !shapes_match {
            return Err(QpError::InvalidProblem(format!(
                "shape mismatch for {} variables",
                n
            )));
        }
        if self.a_ineq.nrows() > 1 {
            return Err(QpError::InvalidProblem(format!(
                "{} inequality rows given, at most one is supported",
                self.a_ineq.nrows()
            )));
        }
        let finite = self
            .hessian
            .iter()
            .chain(self.linear.iter())
            .chain(self.a_eq.iter())
            .chain(self.b_eq.iter())
            .chain(self.a_ineq.iter())
            .chain(self.b_ineq.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(QpError::InvalidProblem(
                "problem data contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait implemented by QP backends used by the trajectory optimizers
/// # Example
/// ```
/// use hybrid_load_traj::optimization::{QpError, QpProblem, QuadraticProgramSolver};
/// use nalgebra::DVector;
/// struct ZeroSolver;
/// impl QuadraticProgramSolver for ZeroSolver {
///     fn solve(&self, problem: &QpProblem) -> Result<DVector<f64>, QpError> {
///         Ok(DVector::zeros(problem.variables()))
///     }
/// }
/// ```
pub trait QuadraticProgramSolver {
    /// Solve the problem, returning the minimizer
    fn solve(&self, problem: &QpProblem) -> Result<DVector<f64>, QpError>;
}

/// Dense KKT solver for equality-constrained QPs with at most one inequality
///
/// The equality-constrained minimizer is computed first. If it violates the inequality, the
/// inequality joins the working set and the KKT system is solved again with it as an equality:
/// for a convex objective the constrained optimum then lies on the inequality boundary. A working
/// inequality whose multiplier turns negative is released. Problems with more than one
/// inequality row are rejected with [`QpError::InvalidProblem`].
///
/// KKT systems are Ruiz-equilibrated before the SVD, so the rank decisions do not depend on the
/// absolute scale of the cost against the constraint rows. A singular but consistent KKT system
/// means the minimizer is not unique; the one of minimum norm in the equilibrated coordinates is
/// returned. An inconsistent system is infeasible when the constraint rows alone are
/// inconsistent and unbounded otherwise.
pub struct ActiveSetSolver {
    settings: SolverConfig,
}

/// Upper bound on Ruiz equilibration passes
const EQUILIBRATION_PASSES: usize = 40;

/// Relative backward error above which a linear system counts as inconsistent
const CONSISTENCY_TOLERANCE: f64 = 1e-9;

/// Ruiz equilibration of a symmetric matrix
///
/// Returns the diagonal `d` for which the rows of `diag(d) K diag(d)` have unit infinity norm.
/// Zero rows keep a unit scale.
fn equilibrate(matrix: &DMatrix<f64>) -> DVector<f64> {
    let size = matrix.nrows();
    let mut scaling = DVector::<f64>::from_element(size, 1.0);
    let mut scaled = matrix.clone();
    for _ in 0..EQUILIBRATION_PASSES {
        let delta = DVector::<f64>::from_fn(size, |i, _| {
            let norm = scaled.row(i).amax();
            if norm > 0.0 {
                norm.sqrt().recip()
            } else {
                1.0
            }
        });
        if delta.iter().all(|d| (d - 1.0).abs() < 1e-6) {
            break;
        }
        scaled = DMatrix::from_fn(size, size, |i, j| scaled[(i, j)] * delta[i] * delta[j]);
        scaling.component_mul_assign(&delta);
    }
    scaling
}

/// Whether `matrix * x = rhs` has a solution, judged by the backward error of the
/// least-squares solution
fn is_consistent(matrix: &DMatrix<f64>, rhs: &DVector<f64>, rank_tolerance: f64) -> bool {
    if matrix.nrows() == 0 || matrix.ncols() == 0 {
        return rhs.iter().all(|&v| v == 0.0);
    }
    let svd = matrix.clone().svd(true, true);
    let threshold = svd.singular_values.max() * rank_tolerance;
    match svd.solve(rhs, threshold) {
        Ok(x) => {
            let residual = (matrix * &x - rhs).norm();
            residual <= CONSISTENCY_TOLERANCE * (rhs.norm() + matrix.norm() * x.norm())
        }
        Err(_) => false,
    }
}

impl ActiveSetSolver {
    pub fn new(settings: SolverConfig) -> Self {
        Self { settings }
    }

    /// Solve the KKT system with the equality rows plus the working inequality rows.
    /// Returns the primal solution and the multipliers of the working rows.
    fn solve_kkt(
        &self,
        problem: &QpProblem,
        working: &[usize],
    ) -> Result<(DVector<f64>, DVector<f64>), QpError> {
        let n = problem.variables();
        let m_eq = problem.a_eq.nrows();
        let m = m_eq + working.len();
        let mut constraints = DMatrix::<f64>::zeros(m, n);
        let mut rhs = DVector::<f64>::zeros(n + m);
        constraints.rows_mut(0, m_eq).copy_from(&problem.a_eq);
        for (k, &i) in working.iter().enumerate() {
            constraints.row_mut(m_eq + k).copy_from(&problem.a_ineq.row(i));
            rhs[n + m_eq + k] = problem.b_ineq[i];
        }
        rhs.rows_mut(0, n).copy_from(&(-&problem.linear));
        rhs.rows_mut(n, m_eq).copy_from(&problem.b_eq);

        let mut kkt = DMatrix::<f64>::zeros(n + m, n + m);
        kkt.view_mut((0, 0), (n, n)).copy_from(&problem.hessian);
        kkt.view_mut((0, n), (n, m)).copy_from(&constraints.transpose());
        kkt.view_mut((n, 0), (m, n)).copy_from(&constraints);

        let scaling = equilibrate(&kkt);
        let kkt = DMatrix::from_fn(n + m, n + m, |i, j| kkt[(i, j)] * scaling[i] * scaling[j]);
        let rhs = rhs.component_mul(&scaling);
        let svd = kkt.clone().svd(true, true);
        let threshold = svd.singular_values.max() * self.settings.rank_tolerance;
        let scaled = svd
            .solve(&rhs, threshold)
            .map_err(|e| QpError::InvalidProblem(e.to_string()))?;

        let residual = (&kkt * &scaled - &rhs).norm();
        if residual > CONSISTENCY_TOLERANCE * (rhs.norm() + kkt.norm() * scaled.norm()) {
            let scaled_constraints = kkt.view((n, 0), (m, n)).into_owned();
            let scaled_bounds = rhs.rows(n, m).into_owned();
            return if is_consistent(
                &scaled_constraints,
                &scaled_bounds,
                self.settings.rank_tolerance,
            ) {
                Err(QpError::Unbounded)
            } else {
                Err(QpError::Infeasible(
                    "constraint rows are inconsistent".to_string(),
                ))
            };
        }
        let solution = scaled.component_mul(&scaling);
        Ok((
            solution.rows(0, n).into_owned(),
            solution.rows(n + m_eq, working.len()).into_owned(),
        ))
    }
}

impl QuadraticProgramSolver for ActiveSetSolver {
    fn solve(&self, problem: &QpProblem) -> Result<DVector<f64>, QpError> {
        problem.check()?;
        let start = Instant::now();
        let timeout = self.settings.timeout();
        let tolerance = self.settings.feasibility_tolerance;
        let mut working: Vec<usize> = Vec::new();
        for iteration in 0..self.settings.max_iterations {
            if start.elapsed() > timeout {
                return Err(QpError::Timeout(start.elapsed()));
            }
            let (x, multipliers) = self.solve_kkt(problem, &working)?;
            let residual = &problem.a_ineq * &x - &problem.b_ineq;
            let violated = residual
                .iter()
                .enumerate()
                .filter(|(i, r)| **r > tolerance && !working.contains(i))
                .max_by(|a, b| a.1.total_cmp(b.1));
            if let Some((i, r)) = violated {
                log::trace!("QP iteration {}: adding inequality {} ({:e})", iteration, i, r);
                working.push(i);
                continue;
            }
            let released = multipliers
                .iter()
                .enumerate()
                .filter(|(_, l)| **l < -tolerance)
                .min_by(|a, b| a.1.total_cmp(b.1));
            if let Some((k, l)) = released {
                log::trace!(
                    "QP iteration {}: releasing inequality {} ({:e})",
                    iteration,
                    working[k],
                    l
                );
                working.remove(k);
                continue;
            }
            return Ok(x);
        }
        Err(QpError::Infeasible(format!(
            "working set did not settle within {} iterations",
            self.settings.max_iterations
        )))
    }
}
