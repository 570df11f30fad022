//! Dual linear program for piecewise-constant barrier synthesis.
//!
//! The primal standard form `min c^T x s.t. A x = d, l <= x <= u` dualizes
//! mechanically to
//!
//! ```text
//! max  d^T y + l^T z_l - u^T z_u
//! s.t. A^T y + z_l - z_u = c,   z_l, z_u >= 0,
//! ```
//!
//! with a multiplier per martingale constraint and per finite variable
//! bound. The dual is solved with the same interior-point method, the
//! barrier certificate is recovered from the multipliers of the dual's
//! equality constraints, and strong duality is cross-checked against the
//! recovered primal objective.

use faer::Col;
use faer::sparse::{SparseColMat, Triplet};
use log::warn;

use crate::config::SynthesisConfig;
use crate::geometry::Hyperrectangle;
use crate::solver::ipm::MehrotraLp;
use crate::solver::{LinearProgram, SolverOptions};
use crate::transition::{RegionWithProbabilities, TransitionColumn};
use crate::{E, Error, I};

use super::BarrierCertificate;
use super::constant::{assemble, check_solution};
use super::initial_cells;

/// Tolerance for the primal/dual objective agreement check.
const DUALITY_GAP_TOL: E = 1e-4;

/// Builds the mechanical dual of a standard-form program.
fn dualize(lp: &LinearProgram) -> Result<LinearProgram, Error> {
    let n = lp.n_vars();
    let m = lp.n_cons();
    let l = lp.lower_bounds();
    let u = lp.upper_bounds();

    let finite_l: Vec<usize> = (0..n).filter(|&k| l[k].is_finite()).collect();
    let finite_u: Vec<usize> = (0..n).filter(|&k| u[k].is_finite()).collect();
    let n_dual = m + finite_l.len() + finite_u.len();

    let a = lp.constraints();
    let col_ptr = a.symbolic().col_ptr();
    let row_idx = a.symbolic().row_idx();
    let val = a.val();

    let mut triplets: Vec<Triplet<I, I, E>> =
        Vec::with_capacity(a.compute_nnz() + finite_l.len() + finite_u.len());
    for k in 0..n {
        for p in col_ptr[k]..col_ptr[k + 1] {
            triplets.push(Triplet::new(k, row_idx[p], val[p]));
        }
    }
    for (pos, &k) in finite_l.iter().enumerate() {
        triplets.push(Triplet::new(k, m + pos, 1.0));
    }
    for (pos, &k) in finite_u.iter().enumerate() {
        triplets.push(Triplet::new(k, m + finite_l.len() + pos, -1.0));
    }
    let a_dual = SparseColMat::try_new_from_triplets(n, n_dual, &triplets)
        .map_err(|_| Error::InvalidInput("malformed dual program".into()))?;

    // Minimization form of the dual objective.
    let mut c_dual = Col::<E>::zeros(n_dual);
    for i in 0..m {
        c_dual[i] = -lp.rhs()[i];
    }
    for (pos, &k) in finite_l.iter().enumerate() {
        c_dual[m + pos] = -l[k];
    }
    for (pos, &k) in finite_u.iter().enumerate() {
        c_dual[m + finite_l.len() + pos] = u[k];
    }

    let l_dual = Col::from_fn(n_dual, |k| if k < m { E::NEG_INFINITY } else { 0.0 });
    let u_dual = Col::from_fn(n_dual, |_| E::INFINITY);

    LinearProgram::new(c_dual, a_dual, lp.objective().clone(), l_dual, u_dual)
}

/// Synthesizes the barrier through the dual program.
///
/// Often smaller and tighter than the primal when obstacles carry large
/// unsafe upper bounds; the primal and dual objectives must agree to within
/// [`DUALITY_GAP_TOL`].
pub fn dual_constant_barrier(
    regions: &[RegionWithProbabilities],
    initial_region: &Hyperrectangle,
    obstacle: Option<usize>,
    config: &SynthesisConfig,
) -> Result<BarrierCertificate, Error> {
    let cells = initial_cells(regions, initial_region)?;
    let columns: Vec<&TransitionColumn> = regions.iter().map(|r| r.transitions()).collect();
    let (primal, layout) = assemble(&columns, &cells, obstacle, config)?;
    let dual = dualize(&primal)?;

    let solution = MehrotraLp::new(SolverOptions::default()).solve(&dual)?;
    check_solution(&solution, "dual barrier synthesis")?;

    // The multipliers of the dual's equality rows are the primal variables.
    let l = primal.lower_bounds();
    let u = primal.upper_bounds();
    let x = Col::from_fn(primal.n_vars(), |k| (-solution.y[k]).clamp(l[k], u[k]));

    let mut recovered_objective = 0.0;
    for k in 0..primal.n_vars() {
        recovered_objective += primal.objective()[k] * x[k];
    }
    let dual_objective = -solution.objective;
    if (recovered_objective - dual_objective).abs()
        > DUALITY_GAP_TOL * (1.0 + dual_objective.abs())
    {
        warn!(
            "primal/dual objectives disagree: {recovered_objective} vs {dual_objective}; \
             the certificate may be loose"
        );
    }

    Ok(layout.extract(&x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::constant_barrier;
    use crate::tests::fixtures;

    #[test]
    fn dual_objective_matches_the_primal() {
        let regions = fixtures::contracting_chain(5, 0.2);
        let initial = regions[2].region().clone();
        let config = SynthesisConfig::default();

        let primal = constant_barrier(&regions, &initial, None, &config).unwrap();
        let dual = dual_constant_barrier(&regions, &initial, None, &config).unwrap();

        let objective = |c: &BarrierCertificate| c.eta() + config.time_horizon as E * c.beta();
        assert!((objective(&primal) - objective(&dual)).abs() < 1e-4);
    }

    #[test]
    fn dual_certificate_is_feasible() {
        let regions = fixtures::contracting_chain(6, 0.15);
        let initial = regions[1].region().clone();
        let config = SynthesisConfig::default();
        let certificate = dual_constant_barrier(&regions, &initial, Some(5), &config).unwrap();
        assert_eq!(certificate.b()[5], 1.0);
        assert!(certificate.max_martingale_violation(&regions) <= 1e-5);
    }
}
