//! Primal linear program for piecewise-constant barrier synthesis.
//!
//! Decision variables are the per-region barrier values `b_j`, per-source
//! slacks `beta_j`, the global slack `beta`, and the initial-set bound
//! `eta`. The martingale inequalities
//!
//! ```text
//! sum_i P_upper[i, j] b_i + P_upper[unsafe, j] <= b_j + beta_j
//! ```
//!
//! bind the barrier through the probability upper bounds; the objective
//! minimizes `eta + N * beta`. Inequalities enter the solver's standard form
//! through nonnegative slack columns, and the obstacle's pinned value
//! `b = 1` is substituted into the coefficients rather than carried as a
//! fixed variable.

use std::collections::BTreeMap;

use faer::Col;
use faer::sparse::{SparseColMat, Triplet};

use crate::config::SynthesisConfig;
use crate::geometry::Hyperrectangle;
use crate::solver::ipm::MehrotraLp;
use crate::solver::{LinearProgram, LpSolution, SolverOptions};
use crate::transition::{RegionWithProbabilities, TransitionColumn};
use crate::{E, Error, I, Status};

use super::{BarrierCertificate, initial_cells};

/// Variable layout of the assembled program.
pub(crate) struct Layout {
    n: usize,
    /// Barrier-variable index per region; `None` for the obstacle.
    b_var: Vec<Option<usize>>,
    beta_base: usize,
    beta_var: usize,
    eta_var: usize,
}

impl Layout {
    pub(crate) fn extract(&self, x: &Col<E>) -> BarrierCertificate {
        let b = Col::from_fn(self.n, |j| match self.b_var[j] {
            Some(v) => x[v],
            None => 1.0,
        });
        let beta_per_region = Col::from_fn(self.n, |j| x[self.beta_base + j]);
        BarrierCertificate::new(b, x[self.eta_var], x[self.beta_var], beta_per_region)
    }
}

/// Assembles the standard-form program for the given martingale coefficient
/// columns (probability upper bounds, or a sharpened point distribution).
pub(crate) fn assemble(
    columns: &[&TransitionColumn],
    init_cells: &[usize],
    obstacle: Option<usize>,
    config: &SynthesisConfig,
) -> Result<(LinearProgram, Layout), Error> {
    let n = columns.len();
    let k_init = init_cells.len();
    let eps = config.decision_floor;
    if !(eps > 0.0 && eps < 0.5) {
        return Err(Error::InvalidInput(format!(
            "decision floor {eps} is outside (0, 0.5)"
        )));
    }
    if obstacle.is_some_and(|o| o >= n) {
        return Err(Error::InvalidInput(format!(
            "obstacle region {} exceeds the {n} regions",
            obstacle.unwrap_or_default()
        )));
    }

    // Variable order: b (free regions), beta_j, beta, eta, then the slack
    // columns of the three constraint groups.
    let mut b_var = vec![None; n];
    let mut next = 0;
    for j in 0..n {
        if Some(j) != obstacle {
            b_var[j] = Some(next);
            next += 1;
        }
    }
    let beta_base = next;
    let beta_var = beta_base + n;
    let eta_var = beta_var + 1;
    let slack_mart = eta_var + 1;
    let slack_link = slack_mart + n;
    let slack_init = slack_link + n;
    let n_vars = slack_init + k_init;
    let n_cons = 2 * n + k_init;

    let mut coeffs: BTreeMap<(usize, usize), E> = BTreeMap::new();
    let mut rhs = Col::<E>::zeros(n_cons);

    // Martingale rows.
    for (j, column) in columns.iter().enumerate() {
        if column.n_regions() != n {
            return Err(Error::InvalidInput(format!(
                "probability column {j} was computed for {} regions, expected {n}",
                column.n_regions()
            )));
        }
        for (k, &i) in column.indices().iter().enumerate() {
            let coef = column.upper_values()[k];
            if coef == 0.0 {
                continue;
            }
            match b_var[i] {
                Some(v) => *coeffs.entry((j, v)).or_insert(0.0) += coef,
                // Obstacle barrier is one; its mass moves to the right side.
                None => rhs[j] -= coef,
            }
        }
        match b_var[j] {
            Some(v) => *coeffs.entry((j, v)).or_insert(0.0) += -1.0,
            None => rhs[j] += 1.0,
        }
        *coeffs.entry((j, beta_base + j)).or_insert(0.0) += -1.0;
        coeffs.insert((j, slack_mart + j), 1.0);
        rhs[j] -= column.unsafe_bounds().1;
    }

    // beta_j <= beta.
    for j in 0..n {
        coeffs.insert((n + j, beta_base + j), 1.0);
        coeffs.insert((n + j, beta_var), -1.0);
        coeffs.insert((n + j, slack_link + j), 1.0);
    }

    // eta dominates the barrier over the initial cells.
    for (k, &cell) in init_cells.iter().enumerate() {
        let row = 2 * n + k;
        match b_var[cell] {
            Some(v) => {
                coeffs.insert((row, v), 1.0);
            }
            None => rhs[row] = -1.0,
        }
        coeffs.insert((row, eta_var), -1.0);
        coeffs.insert((row, slack_init + k), 1.0);
    }

    let triplets: Vec<Triplet<I, I, E>> = coeffs
        .into_iter()
        .map(|((row, col), value)| Triplet::new(row, col, value))
        .collect();
    let a = SparseColMat::try_new_from_triplets(n_cons, n_vars, &triplets)
        .map_err(|_| Error::InvalidInput("malformed barrier program".into()))?;

    let mut c = Col::<E>::zeros(n_vars);
    c[eta_var] = 1.0;
    c[beta_var] = config.time_horizon as E;

    let mut l = Col::<E>::zeros(n_vars);
    let mut u = Col::from_fn(n_vars, |_| E::INFINITY);
    for j in 0..n {
        if let Some(v) = b_var[j] {
            l[v] = eps;
            u[v] = 1.0;
        }
        l[beta_base + j] = eps;
        u[beta_base + j] = 1.0 - eps;
    }
    l[beta_var] = eps;
    u[beta_var] = 1.0;
    l[eta_var] = eps;
    u[eta_var] = 1.0;

    let lp = LinearProgram::new(c, a, rhs, l, u)?;
    Ok((
        lp,
        Layout {
            n,
            b_var,
            beta_base,
            beta_var,
            eta_var,
        },
    ))
}

pub(crate) fn check_solution(solution: &LpSolution, context: &'static str) -> Result<(), Error> {
    match solution.status {
        Status::Optimal => Ok(()),
        Status::Infeasible => Err(Error::Infeasible(context)),
        status => Err(Error::SolverFailure { context, status }),
    }
}

pub(crate) fn solve_columns(
    columns: &[&TransitionColumn],
    init_cells: &[usize],
    obstacle: Option<usize>,
    config: &SynthesisConfig,
) -> Result<BarrierCertificate, Error> {
    let (lp, layout) = assemble(columns, init_cells, obstacle, config)?;
    let solution = MehrotraLp::new(SolverOptions::default()).solve(&lp)?;
    check_solution(&solution, "barrier synthesis")?;
    Ok(layout.extract(&solution.x))
}

/// Synthesizes a piecewise-constant barrier by solving the primal LP with
/// the martingale constraints at the probability upper bounds.
pub fn constant_barrier(
    regions: &[RegionWithProbabilities],
    initial_region: &Hyperrectangle,
    obstacle: Option<usize>,
    config: &SynthesisConfig,
) -> Result<BarrierCertificate, Error> {
    let cells = initial_cells(regions, initial_region)?;
    let columns: Vec<&TransitionColumn> = regions.iter().map(|r| r.transitions()).collect();
    solve_columns(&columns, &cells, obstacle, config)
}
