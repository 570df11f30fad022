//! Dense primal-dual solver for the Euclidean projection QP
//!
//! ```text
//! min  0.5 |x - p|^2
//! s.t. G x <= h
//! ```
//!
//! Eliminating the stationarity condition `x = p - G^T lambda` leaves a
//! complementarity system in the multipliers and the constraint slacks,
//!
//! ```text
//! s = h - G p + G G^T lambda,   lambda >= 0,  s >= 0,  lambda . s = 0,
//! ```
//!
//! which is driven to complementarity by damped Newton steps on a decreasing
//! centering parameter. The polytopes produced by post-images are small, so
//! everything stays dense.

use faer::prelude::*;
use faer::{Col, ColRef, Mat, MatRef};

use crate::{E, Error, Status};

pub struct ProjectionSolver {
    pub max_iterations: usize,
    pub tolerance: E,
}

impl Default for ProjectionSolver {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-10,
        }
    }
}

impl ProjectionSolver {
    /// Projects `p` onto `{ x : G x <= h }`.
    pub fn project(
        &self,
        g: MatRef<'_, E>,
        h: ColRef<'_, E>,
        p: ColRef<'_, E>,
    ) -> Result<Col<E>, Error> {
        let mc = g.nrows();
        let n = g.ncols();
        debug_assert_eq!(h.nrows(), mc);
        debug_assert_eq!(p.nrows(), n);

        let kernel = g * g.transpose();
        // q = G p - h, so the slack reads s = K lambda - q.
        let q = g * p - h;

        let scale = 1.0 + (0..mc).map(|i| q[i].abs()).fold(0.0, E::max);

        let mut lambda = Col::from_fn(mc, |_| 1.0);
        let mut s = Col::from_fn(mc, |i| 1.0 + q[i].abs());

        for _ in 0..self.max_iterations {
            // r1 = -(s + q - K lambda), the linearized slack residual.
            let k_lambda = kernel.as_ref() * &lambda;
            let r1 = Col::from_fn(mc, |i| k_lambda[i] - q[i] - s[i]);

            let mut gap = 0.0;
            for i in 0..mc {
                gap += lambda[i] * s[i];
            }
            let r1_norm = (0..mc).map(|i| r1[i].abs()).fold(0.0, E::max);
            if gap / mc as E <= self.tolerance * scale && r1_norm <= self.tolerance * scale {
                break;
            }

            let mu = 0.1 * gap / mc as E;

            // (Lambda K + S) dl = r2 - lambda . r1, with r2 the centering
            // residual; ds follows from the slack linearization.
            let mut system = Mat::<E>::zeros(mc, mc);
            for i in 0..mc {
                for j in 0..mc {
                    system[(i, j)] = lambda[i] * kernel[(i, j)];
                }
                system[(i, i)] += s[i];
            }
            let rhs = Mat::from_fn(mc, 1, |i, _| mu - lambda[i] * s[i] - lambda[i] * r1[i]);
            let dl_mat = system.as_ref().partial_piv_lu().solve(rhs.as_ref());
            let dl = Col::from_fn(mc, |i| dl_mat[(i, 0)]);
            let k_dl = kernel.as_ref() * &dl;
            let ds = Col::from_fn(mc, |i| r1[i] + k_dl[i]);

            let mut alpha: E = 1.0;
            for i in 0..mc {
                if dl[i] < 0.0 {
                    alpha = alpha.min(-lambda[i] / dl[i]);
                }
                if ds[i] < 0.0 {
                    alpha = alpha.min(-s[i] / ds[i]);
                }
            }
            alpha = (0.995 * alpha).min(1.0);

            for i in 0..mc {
                lambda[i] += alpha * dl[i];
                s[i] += alpha * ds[i];
            }
        }

        let mut gap = 0.0;
        for i in 0..mc {
            gap += lambda[i] * s[i];
        }
        if !(gap / mc as E <= 1e3 * self.tolerance * scale) {
            return Err(Error::SolverFailure {
                context: "projection",
                status: Status::IterationLimit,
            });
        }

        Ok(p - g.transpose() * &lambda)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_onto_a_halfspace() {
        // x0 <= 1 in 2-D; projecting (3, 2) lands on (1, 2).
        let g = Mat::from_fn(1, 2, |_, j| [1.0, 0.0][j]);
        let h = Col::from_fn(1, |_| 1.0);
        let p = Col::from_fn(2, |i| [3.0, 2.0][i]);
        let x = ProjectionSolver::default()
            .project(g.as_ref(), h.as_ref(), p.as_ref())
            .unwrap();
        assert!((x[0] - 1.0).abs() < 1e-6);
        assert!((x[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn projects_into_a_corner() {
        // Unit box corner: projecting (2, 2) gives (1, 1).
        let g = Mat::from_fn(4, 2, |i, j| {
            [[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]][i][j]
        });
        let h = Col::from_fn(4, |i| [1.0, 1.0, 0.0, 0.0][i]);
        let p = Col::from_fn(2, |_| 2.0);
        let x = ProjectionSolver::default()
            .project(g.as_ref(), h.as_ref(), p.as_ref())
            .unwrap();
        assert!((x[0] - 1.0).abs() < 1e-5);
        assert!((x[1] - 1.0).abs() < 1e-5);
    }
}
