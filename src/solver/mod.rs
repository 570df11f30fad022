//! Interior-point machinery for the linear and quadratic programs that back
//! barrier synthesis and geometric projection.

pub mod ipm;
pub mod qp;

use faer::{Col, sparse::SparseColMat};

use crate::{E, Error, I, Status};

/// A linear program in standard form:
///
/// ```text
/// min  c^T x
/// s.t. A x = b
///      l <= x <= u
/// ```
///
/// Bounds may be infinite on either side, but a variable must not be fixed
/// (`l == u`): fixed values are substituted out by the callers before the
/// program is assembled.
#[allow(non_snake_case)]
pub struct LinearProgram {
    /// Objective function coefficients.
    c: Col<E>,
    /// Constraint matrix (sparse, column-major).
    A: SparseColMat<I, E>,
    /// Right-hand side of the equality constraints.
    b: Col<E>,
    /// Lower bounds on the variables.
    l: Col<E>,
    /// Upper bounds on the variables.
    u: Col<E>,
}

#[allow(non_snake_case)]
impl LinearProgram {
    /// Creates a new linear program from the objective, constraints, and bounds.
    pub fn new(
        c: Col<E>,
        A: SparseColMat<I, E>,
        b: Col<E>,
        l: Col<E>,
        u: Col<E>,
    ) -> Result<Self, Error> {
        let n = c.nrows();
        let m = b.nrows();
        if A.ncols() != n || A.nrows() != m {
            return Err(Error::InvalidInput(format!(
                "constraint matrix is {}x{} but expected {}x{}",
                A.nrows(),
                A.ncols(),
                m,
                n
            )));
        }
        if l.nrows() != n || u.nrows() != n {
            return Err(Error::InvalidInput(
                "bound vectors do not match the number of variables".into(),
            ));
        }
        for k in 0..n {
            if l[k].is_finite() && u[k].is_finite() && u[k] - l[k] < 1e-12 {
                return Err(Error::InvalidInput(format!(
                    "variable {k} is fixed; substitute it out before solving"
                )));
            }
        }
        Ok(Self { c, A, b, l, u })
    }

    /// Returns the number of variables (columns of `A`).
    pub fn n_vars(&self) -> usize {
        self.c.nrows()
    }

    /// Returns the number of constraints (rows of `A`).
    pub fn n_cons(&self) -> usize {
        self.b.nrows()
    }

    pub fn objective(&self) -> &Col<E> {
        &self.c
    }

    pub fn constraints(&self) -> &SparseColMat<I, E> {
        &self.A
    }

    pub fn rhs(&self) -> &Col<E> {
        &self.b
    }

    pub fn lower_bounds(&self) -> &Col<E> {
        &self.l
    }

    pub fn upper_bounds(&self) -> &Col<E> {
        &self.u
    }
}

/// Iteration caps and tolerances shared by the interior-point solvers.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub max_iterations: usize,
    pub tolerance: E,
    /// Multiplier keeping steps strictly inside the positive orthant.
    pub safety_factor: E,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-8,
            safety_factor: 0.9995,
        }
    }
}

/// Primal-dual solution of a [`LinearProgram`].
pub struct LpSolution {
    /// Primal variables.
    pub x: Col<E>,
    /// Multipliers of the equality constraints.
    pub y: Col<E>,
    /// Multipliers of the finite lower bounds.
    pub z_l: Col<E>,
    /// Multipliers of the finite upper bounds.
    pub z_u: Col<E>,
    pub objective: E,
    pub status: Status,
    pub iterations: usize,
}

pub(crate) fn inf_norm(x: &Col<E>) -> E {
    let mut norm: E = 0.0;
    for i in 0..x.nrows() {
        norm = norm.max(x[i].abs());
    }
    norm
}
