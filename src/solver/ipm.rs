//! Mehrotra predictor-corrector interior-point method for linear programs in
//! standard form.
//!
//! The search direction is obtained from the normal equations
//!
//! ```text
//! (A D^-1 A^T) dy = r_p + A D^-1 r_hat,   D = Z_l S_l^-1 + Z_u S_u^-1
//! ```
//!
//! with the constraint matrix kept sparse and the normal matrix assembled
//! densely; the programs produced by barrier synthesis have many more
//! variables than constraints, so a dense Cholesky of the (small) normal
//! matrix is the economical choice. Free variables and one-sided bounds are
//! handled through primal-dual regularization of `D`.

use faer::linalg::solvers::{Llt, PartialPivLu};
use faer::prelude::*;
use faer::{Col, Mat, Side};

use crate::solver::{LinearProgram, LpSolution, SolverOptions, inf_norm};
use crate::{E, Error, Status};

/// Diagonal regularization added to `D` (primal) and the normal matrix (dual).
const PRIMAL_REG: E = 1e-8;
const DUAL_REG: E = 1e-10;
/// Divergence guard on the dual iterates; tripping it flags infeasibility.
const BLOWUP: E = 1e11;

pub struct MehrotraLp {
    options: SolverOptions,
}

enum Factor {
    Llt(Llt<E>),
    Lu(PartialPivLu<E>),
}

impl Factor {
    fn new(mat: &Mat<E>) -> Self {
        match mat.as_ref().llt(Side::Lower) {
            Ok(f) => Factor::Llt(f),
            Err(_) => Factor::Lu(mat.as_ref().partial_piv_lu()),
        }
    }

    fn solve_col(&self, rhs: &Col<E>) -> Col<E> {
        let rhs_mat = Mat::from_fn(rhs.nrows(), 1, |i, _| rhs[i]);
        let sol = match self {
            Factor::Llt(f) => f.solve(rhs_mat.as_ref()),
            Factor::Lu(f) => f.solve(rhs_mat.as_ref()),
        };
        Col::from_fn(rhs.nrows(), |i| sol[(i, 0)])
    }
}

struct Direction {
    dx: Col<E>,
    dy: Col<E>,
    dz_l: Col<E>,
    dz_u: Col<E>,
}

impl MehrotraLp {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    /// Runs the predictor-corrector iteration until convergence, divergence,
    /// or the iteration cap.
    ///
    /// A non-`Optimal` status is reported in the returned solution rather
    /// than as an error; only malformed programs error out.
    pub fn solve(&self, lp: &LinearProgram) -> Result<LpSolution, Error> {
        let n = lp.n_vars();
        let m = lp.n_cons();
        let l = lp.lower_bounds();
        let u = lp.upper_bounds();

        let has_l: Vec<bool> = (0..n).map(|k| l[k].is_finite()).collect();
        let has_u: Vec<bool> = (0..n).map(|k| u[k].is_finite()).collect();
        let n_active = has_l.iter().filter(|f| **f).count()
            + has_u.iter().filter(|f| **f).count();

        let mut x = Col::from_fn(n, |k| match (has_l[k], has_u[k]) {
            (true, true) => 0.5 * (l[k] + u[k]),
            (true, false) => l[k] + 1.0,
            (false, true) => u[k] - 1.0,
            (false, false) => 0.0,
        });
        let mut y = Col::<E>::zeros(m);
        let mut z_l = Col::from_fn(n, |k| if has_l[k] { 1.0 } else { 0.0 });
        let mut z_u = Col::from_fn(n, |k| if has_u[k] { 1.0 } else { 0.0 });

        let b_scale = 1.0 + inf_norm(lp.rhs());
        let c_scale = 1.0 + inf_norm(lp.objective());

        let mut status = Status::IterationLimit;
        let mut iterations = self.options.max_iterations;

        for iter in 0..self.options.max_iterations {
            let s_l = Col::from_fn(n, |k| if has_l[k] { x[k] - l[k] } else { 1.0 });
            let s_u = Col::from_fn(n, |k| if has_u[k] { u[k] - x[k] } else { 1.0 });

            let r_p = lp.rhs() - lp.constraints() * &x;
            let r_d = lp.objective() - lp.constraints().transpose() * &y - &z_l + &z_u;

            let mut gap = 0.0;
            for k in 0..n {
                if has_l[k] {
                    gap += s_l[k] * z_l[k];
                }
                if has_u[k] {
                    gap += s_u[k] * z_u[k];
                }
            }
            let mu = if n_active > 0 { gap / n_active as E } else { 0.0 };

            let objective = dot(lp.objective(), &x);
            let tol = self.options.tolerance;
            if inf_norm(&r_p) / b_scale < tol
                && inf_norm(&r_d) / c_scale < tol
                && mu <= tol * (1.0 + objective.abs())
            {
                status = Status::Optimal;
                iterations = iter;
                break;
            }
            if inf_norm(&y) > BLOWUP || inf_norm(&z_l) > BLOWUP || inf_norm(&z_u) > BLOWUP {
                status = Status::Infeasible;
                iterations = iter;
                break;
            }

            let d = Col::from_fn(n, |k| {
                let mut dk = PRIMAL_REG;
                if has_l[k] {
                    dk += z_l[k] / s_l[k];
                }
                if has_u[k] {
                    dk += z_u[k] / s_u[k];
                }
                dk
            });
            let factor = Factor::new(&normal_matrix(lp, &d, m));

            // Predictor: pure Newton step toward complementarity zero.
            let r_cl = Col::from_fn(n, |k| if has_l[k] { -s_l[k] * z_l[k] } else { 0.0 });
            let r_cu = Col::from_fn(n, |k| if has_u[k] { -s_u[k] * z_u[k] } else { 0.0 });
            let affine = solve_direction(
                lp, &factor, &d, &r_p, &r_d, &r_cl, &r_cu, &s_l, &s_u, &z_l, &z_u, &has_l, &has_u,
            );

            let (alpha_p_aff, alpha_d_aff) = step_lengths(
                &affine, &s_l, &s_u, &z_l, &z_u, &has_l, &has_u, 1.0,
            );
            let mut gap_aff = 0.0;
            for k in 0..n {
                if has_l[k] {
                    gap_aff += (s_l[k] + alpha_p_aff * affine.dx[k])
                        * (z_l[k] + alpha_d_aff * affine.dz_l[k]);
                }
                if has_u[k] {
                    gap_aff += (s_u[k] - alpha_p_aff * affine.dx[k])
                        * (z_u[k] + alpha_d_aff * affine.dz_u[k]);
                }
            }
            let mu_aff = if n_active > 0 {
                gap_aff / n_active as E
            } else {
                0.0
            };
            let sigma = if mu > 0.0 {
                (mu_aff / mu).clamp(0.0, 1.0).powi(3)
            } else {
                0.0
            };

            // Corrector: recenter and compensate the predictor's
            // second-order complementarity error.
            let r_cl = Col::from_fn(n, |k| {
                if has_l[k] {
                    sigma * mu - s_l[k] * z_l[k] - affine.dx[k] * affine.dz_l[k]
                } else {
                    0.0
                }
            });
            let r_cu = Col::from_fn(n, |k| {
                if has_u[k] {
                    sigma * mu - s_u[k] * z_u[k] + affine.dx[k] * affine.dz_u[k]
                } else {
                    0.0
                }
            });
            let step = solve_direction(
                lp, &factor, &d, &r_p, &r_d, &r_cl, &r_cu, &s_l, &s_u, &z_l, &z_u, &has_l, &has_u,
            );

            let (alpha_p, alpha_d) = step_lengths(
                &step,
                &s_l,
                &s_u,
                &z_l,
                &z_u,
                &has_l,
                &has_u,
                self.options.safety_factor,
            );

            for k in 0..n {
                x[k] += alpha_p * step.dx[k];
                if has_l[k] {
                    z_l[k] = (z_l[k] + alpha_d * step.dz_l[k]).max(0.0);
                }
                if has_u[k] {
                    z_u[k] = (z_u[k] + alpha_d * step.dz_u[k]).max(0.0);
                }
            }
            for i in 0..m {
                y[i] += alpha_d * step.dy[i];
            }
        }

        let objective = dot(lp.objective(), &x);
        Ok(LpSolution {
            x,
            y,
            z_l,
            z_u,
            objective,
            status,
            iterations,
        })
    }
}

/// Assembles the dense normal matrix `A D^-1 A^T + delta I` from the sparse
/// columns of `A`.
fn normal_matrix(lp: &LinearProgram, d: &Col<E>, m: usize) -> Mat<E> {
    let a = lp.constraints();
    let col_ptr = a.symbolic().col_ptr();
    let row_idx = a.symbolic().row_idx();
    let val = a.val();

    let mut mat = Mat::<E>::zeros(m, m);
    for k in 0..lp.n_vars() {
        let dinv = 1.0 / d[k];
        let range = col_ptr[k]..col_ptr[k + 1];
        for p in range.clone() {
            let w = val[p] * dinv;
            for q in range.clone() {
                mat[(row_idx[q], row_idx[p])] += w * val[q];
            }
        }
    }
    let mut diag_max: E = 0.0;
    for i in 0..m {
        diag_max = diag_max.max(mat[(i, i)]);
    }
    let reg = DUAL_REG * (1.0 + diag_max);
    for i in 0..m {
        mat[(i, i)] += reg;
    }
    mat
}

#[allow(clippy::too_many_arguments)]
fn solve_direction(
    lp: &LinearProgram,
    factor: &Factor,
    d: &Col<E>,
    r_p: &Col<E>,
    r_d: &Col<E>,
    r_cl: &Col<E>,
    r_cu: &Col<E>,
    s_l: &Col<E>,
    s_u: &Col<E>,
    z_l: &Col<E>,
    z_u: &Col<E>,
    has_l: &[bool],
    has_u: &[bool],
) -> Direction {
    let n = lp.n_vars();

    let r_hat = Col::from_fn(n, |k| {
        let mut r = r_d[k];
        if has_l[k] {
            r -= r_cl[k] / s_l[k];
        }
        if has_u[k] {
            r += r_cu[k] / s_u[k];
        }
        r
    });

    let w = Col::from_fn(n, |k| r_hat[k] / d[k]);
    let rhs = r_p + lp.constraints() * &w;
    let dy = factor.solve_col(&rhs);

    let at_dy = lp.constraints().transpose() * &dy;
    let dx = Col::from_fn(n, |k| (at_dy[k] - r_hat[k]) / d[k]);

    let dz_l = Col::from_fn(n, |k| {
        if has_l[k] {
            (r_cl[k] - z_l[k] * dx[k]) / s_l[k]
        } else {
            0.0
        }
    });
    let dz_u = Col::from_fn(n, |k| {
        if has_u[k] {
            (r_cu[k] + z_u[k] * dx[k]) / s_u[k]
        } else {
            0.0
        }
    });

    Direction { dx, dy, dz_l, dz_u }
}

#[allow(clippy::too_many_arguments)]
fn step_lengths(
    step: &Direction,
    s_l: &Col<E>,
    s_u: &Col<E>,
    z_l: &Col<E>,
    z_u: &Col<E>,
    has_l: &[bool],
    has_u: &[bool],
    safety: E,
) -> (E, E) {
    let n = step.dx.nrows();
    let mut alpha_p: E = 1.0;
    let mut alpha_d: E = 1.0;
    for k in 0..n {
        if has_l[k] && step.dx[k] < 0.0 {
            alpha_p = alpha_p.min(-s_l[k] / step.dx[k]);
        }
        if has_u[k] && step.dx[k] > 0.0 {
            alpha_p = alpha_p.min(s_u[k] / step.dx[k]);
        }
        if has_l[k] && step.dz_l[k] < 0.0 {
            alpha_d = alpha_d.min(-z_l[k] / step.dz_l[k]);
        }
        if has_u[k] && step.dz_u[k] < 0.0 {
            alpha_d = alpha_d.min(-z_u[k] / step.dz_u[k]);
        }
    }
    ((safety * alpha_p).min(1.0), (safety * alpha_d).min(1.0))
}

fn dot(a: &Col<E>, b: &Col<E>) -> E {
    let mut acc = 0.0;
    for i in 0..a.nrows() {
        acc += a[i] * b[i];
    }
    acc
}
