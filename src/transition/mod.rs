//! Interval bounds on the transition probabilities between partition regions.
//!
//! For every source region `j` the engine computes a sparse paired column
//! `(P_lower[., j], P_upper[., j])` of logical length `N + 1`, where the last
//! index is the virtual "unsafe" target collecting the probability mass that
//! leaves the safe set. Columns are independent, so the sweep over source
//! regions runs on a worker pool with one column per unit of work.

pub mod bound;

use std::sync::atomic::{AtomicUsize, Ordering};

use faer::sparse::{SparseColMat, Triplet};
use log::debug;
use rayon::prelude::*;
use statrs::function::erf::erfc_inv;

use crate::config::SynthesisConfig;
use crate::geometry::Hyperrectangle;
use crate::kernel::TransitionKernel;
use crate::system::{StochasticSystem, System};
use crate::{E, Error, I};

use bound::{BoundScratch, max_quasi_concave_over_polytope, min_over_polytope};

/// Slack allowed on the per-column sum invariants.
const JOINT_TOL: E = 1e-6;

/// One sparse probability column: region targets with a nonzero upper bound,
/// plus the unsafe tail slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionColumn {
    n_regions: usize,
    idx: Vec<I>,
    lower: Vec<E>,
    upper: Vec<E>,
    unsafe_lower: E,
    unsafe_upper: E,
}

impl TransitionColumn {
    pub fn new(
        n_regions: usize,
        idx: Vec<I>,
        lower: Vec<E>,
        upper: Vec<E>,
        unsafe_lower: E,
        unsafe_upper: E,
    ) -> Result<Self, Error> {
        if idx.len() != lower.len() || idx.len() != upper.len() {
            return Err(Error::InvalidInput(
                "probability column index/value lengths differ".into(),
            ));
        }
        if idx.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidInput(
                "probability column indices must be strictly increasing".into(),
            ));
        }
        if idx.last().is_some_and(|&last| last >= n_regions) {
            return Err(Error::InvalidInput(
                "probability column index exceeds the region count".into(),
            ));
        }
        let column = Self {
            n_regions,
            idx,
            lower,
            upper,
            unsafe_lower,
            unsafe_upper,
        };
        column.validate()?;
        Ok(column)
    }

    fn validate(&self) -> Result<(), Error> {
        for (k, &i) in self.idx.iter().enumerate() {
            let (lo, up) = (self.lower[k], self.upper[k]);
            if !(0.0 <= lo && lo <= up + JOINT_TOL && up <= 1.0 + JOINT_TOL) {
                return Err(Error::InvariantViolation(format!(
                    "bounds [{lo}, {up}] for target {i} are not an ordered probability interval"
                )));
            }
        }
        if !(0.0 <= self.unsafe_lower
            && self.unsafe_lower <= self.unsafe_upper + JOINT_TOL
            && self.unsafe_upper <= 1.0 + JOINT_TOL)
        {
            return Err(Error::InvariantViolation(format!(
                "unsafe bounds [{}, {}] are not an ordered probability interval",
                self.unsafe_lower, self.unsafe_upper
            )));
        }
        if self.lower_sum() > 1.0 + JOINT_TOL {
            return Err(Error::InvariantViolation(format!(
                "joint lower bound {} exceeds one",
                self.lower_sum()
            )));
        }
        Ok(())
    }

    /// Number of partition regions `N`; the column's logical length is `N+1`.
    pub fn n_regions(&self) -> usize {
        self.n_regions
    }

    /// Stored region targets, excluding the tail.
    pub fn indices(&self) -> &[I] {
        &self.idx
    }

    pub fn lower_values(&self) -> &[E] {
        &self.lower
    }

    pub fn upper_values(&self) -> &[E] {
        &self.upper
    }

    /// Bounds on the mass escaping to the unsafe tail.
    pub fn unsafe_bounds(&self) -> (E, E) {
        (self.unsafe_lower, self.unsafe_upper)
    }

    /// Lower bound toward region `i`; zero when pruned.
    pub fn lower_of(&self, i: usize) -> E {
        match self.idx.binary_search(&i) {
            Ok(k) => self.lower[k],
            Err(_) => 0.0,
        }
    }

    /// Upper bound toward region `i`; zero when pruned.
    pub fn upper_of(&self, i: usize) -> E {
        match self.idx.binary_search(&i) {
            Ok(k) => self.upper[k],
            Err(_) => 0.0,
        }
    }

    /// Sum of all lower bounds, tail included.
    pub fn lower_sum(&self) -> E {
        self.lower.iter().sum::<E>() + self.unsafe_lower
    }

    /// Sum of all upper bounds, tail included.
    pub fn upper_sum(&self) -> E {
        self.upper.iter().sum::<E>() + self.unsafe_upper
    }

    pub fn nnz(&self) -> usize {
        self.idx.len()
    }
}

/// A partition region paired with its outgoing probability column.
#[derive(Debug, Clone)]
pub struct RegionWithProbabilities {
    region: Hyperrectangle,
    transitions: TransitionColumn,
}

impl RegionWithProbabilities {
    pub fn new(region: Hyperrectangle, transitions: TransitionColumn) -> Self {
        Self {
            region,
            transitions,
        }
    }

    pub fn region(&self) -> &Hyperrectangle {
        &self.region
    }

    pub fn transitions(&self) -> &TransitionColumn {
        &self.transitions
    }
}

/// The paired sparse probability matrices, shape `(N+1) x N`, indexed
/// `[to, from]` with the unsafe tail as the `(N+1)`-th logical row. Column
/// `j` holds the outgoing bounds of source region `j`.
pub struct TransitionBounds {
    pub lower: SparseColMat<I, E>,
    pub upper: SparseColMat<I, E>,
}

impl TransitionBounds {
    pub fn from_regions(regions: &[RegionWithProbabilities]) -> Result<Self, Error> {
        let n = regions.len();
        let mut lower_triplets: Vec<Triplet<I, I, E>> = Vec::new();
        let mut upper_triplets: Vec<Triplet<I, I, E>> = Vec::new();
        for (j, region) in regions.iter().enumerate() {
            let column = region.transitions();
            if column.n_regions() != n {
                return Err(Error::InvalidInput(format!(
                    "column {j} was computed for {} regions, expected {n}",
                    column.n_regions()
                )));
            }
            for (k, &i) in column.indices().iter().enumerate() {
                if column.lower_values()[k] > 0.0 {
                    lower_triplets.push(Triplet::new(i, j, column.lower_values()[k]));
                }
                upper_triplets.push(Triplet::new(i, j, column.upper_values()[k]));
            }
            let (unsafe_lower, unsafe_upper) = column.unsafe_bounds();
            if unsafe_lower > 0.0 {
                lower_triplets.push(Triplet::new(n, j, unsafe_lower));
            }
            if unsafe_upper > 0.0 {
                upper_triplets.push(Triplet::new(n, j, unsafe_upper));
            }
        }
        let lower = SparseColMat::try_new_from_triplets(n + 1, n, &lower_triplets)
            .map_err(|_| Error::InvalidInput("malformed lower probability triplets".into()))?;
        let upper = SparseColMat::try_new_from_triplets(n + 1, n, &upper_triplets)
            .map_err(|_| Error::InvalidInput("malformed upper probability triplets".into()))?;
        Ok(Self { lower, upper })
    }

    pub fn n_regions(&self) -> usize {
        self.lower.ncols()
    }

    pub fn density(&self) -> E {
        let cells = (self.upper.nrows() * self.upper.ncols()) as E;
        self.upper.compute_nnz() as E / cells
    }
}

/// Bounds the transition probabilities of every source region.
///
/// See [`transition_probabilities_observed`] for the progress-reporting
/// variant.
pub fn transition_probabilities(
    system: &System,
    regions: &[Hyperrectangle],
    config: &SynthesisConfig,
) -> Result<Vec<RegionWithProbabilities>, Error> {
    let progress = AtomicUsize::new(0);
    transition_probabilities_observed(system, regions, config, &progress)
}

/// Parallel sweep over source regions; `progress` is incremented (relaxed)
/// once per completed column so callers can observe the sweep.
pub fn transition_probabilities_observed(
    system: &System,
    regions: &[Hyperrectangle],
    config: &SynthesisConfig,
    progress: &AtomicUsize,
) -> Result<Vec<RegionWithProbabilities>, Error> {
    validate_inputs(system, regions, config)?;

    let n = regions.len();
    // Mass beyond n_sigma noise deviations falls below the sparsity
    // threshold and is pruned before any bound is computed.
    let n_sigma = std::f64::consts::SQRT_2 * erfc_inv(2.0 * config.sparsity_tol);
    let sigma = system.noise_sigma();
    let reach = faer::Col::from_fn(sigma.nrows(), |d| sigma[d] * n_sigma);

    regions
        .par_iter()
        .enumerate()
        .map_init(BoundScratch::new, |scratch, (j, region)| {
            let column = source_column(system, regions, j, region, &reach, config, scratch)?;
            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                "bounded transitions out of region {j}: {} targets kept ({done}/{n})",
                column.nnz()
            );
            Ok(RegionWithProbabilities::new(region.clone(), column))
        })
        .collect()
}

fn validate_inputs(
    system: &System,
    regions: &[Hyperrectangle],
    config: &SynthesisConfig,
) -> Result<(), Error> {
    if regions.is_empty() {
        return Err(Error::InvalidInput("no partition regions supplied".into()));
    }
    let dim = system.dimensionality();
    if let Some(j) = regions.iter().position(|r| r.dim() != dim) {
        return Err(Error::InvalidInput(format!(
            "region {j} has dimension {} but the system has {dim}",
            regions[j].dim()
        )));
    }
    if !(config.sparsity_tol > 0.0 && config.sparsity_tol < 0.5) {
        return Err(Error::InvalidInput(format!(
            "sparsity tolerance {} is outside (0, 0.5)",
            config.sparsity_tol
        )));
    }
    Ok(())
}

fn source_column(
    system: &System,
    regions: &[Hyperrectangle],
    j: usize,
    region: &Hyperrectangle,
    reach: &faer::Col<E>,
    config: &SynthesisConfig,
    scratch: &mut BoundScratch,
) -> Result<TransitionColumn, Error> {
    let n = regions.len();
    let sigma = system.noise_sigma();
    let image = system.post(j, region)?;
    let search = image.bounding_box.bloat(reach.as_ref());

    let mut idx = Vec::new();
    let mut lower = Vec::new();
    let mut upper = Vec::new();
    for (i, target) in regions.iter().enumerate() {
        if search.is_disjoint(target) {
            continue;
        }
        // Second-stage prune: a facet of the image separating it from the
        // noise-bloated target certifies a sub-threshold contribution.
        if image.halfspaces.is_disjoint_box(&target.bloat(reach.as_ref())) {
            continue;
        }
        let kernel = TransitionKernel::new(target, sigma);
        let up = max_quasi_concave_over_polytope(
            &kernel,
            &image,
            config.upper_bound_method,
            scratch,
        )
        .clamp(0.0, 1.0);
        if up <= 0.0 {
            continue;
        }
        let lo = min_over_polytope(&kernel, &image).clamp(0.0, up);
        idx.push(i);
        lower.push(lo);
        upper.push(up);
    }
    let kept = idx.len();

    // Tail: bound the probability of staying in the safe set and complement.
    let safe_kernel = TransitionKernel::new(system.safe_set(), sigma);
    let safe_upper = max_quasi_concave_over_polytope(
        &safe_kernel,
        &image,
        config.upper_bound_method,
        scratch,
    )
    .clamp(0.0, 1.0);
    let safe_lower = min_over_polytope(&safe_kernel, &image).clamp(0.0, safe_upper);
    let unsafe_lower = (1.0 - safe_upper).max(0.0);
    let unsafe_upper =
        ((1.0 - safe_lower) + (n - kept) as E * config.sparsity_tol).clamp(0.0, 1.0);

    // Consistency: no target can receive more than one minus everybody
    // else's guaranteed mass. Repairs loose box-approximation uppers.
    let total_lower = lower.iter().sum::<E>() + unsafe_lower;
    if total_lower > 1.0 + JOINT_TOL {
        return Err(Error::InvariantViolation(format!(
            "joint lower bound {total_lower} of region {j} exceeds one"
        )));
    }
    let headroom = (1.0 - total_lower).max(0.0);
    for k in 0..kept {
        upper[k] = upper[k].min(headroom + lower[k]).max(lower[k]);
    }
    let unsafe_upper = unsafe_upper
        .min(headroom + unsafe_lower)
        .max(unsafe_lower);
    if unsafe_upper > 1.0 + JOINT_TOL {
        return Err(Error::InvariantViolation(format!(
            "unsafe upper bound {unsafe_upper} of region {j} exceeds one"
        )));
    }

    TransitionColumn::new(n, idx, lower, upper, unsafe_lower, unsafe_upper)
}
