//! Piecewise-constant barrier synthesis over precomputed transition bounds.
//!
//! Every backend consumes the same inputs (regions with probability columns,
//! an initial region, an optional obstacle region) and produces a
//! [`BarrierCertificate`] `(b, beta)` minimizing `eta + N * beta`, where
//! `eta` bounds the barrier over the initial set and `beta` is the
//! martingale slack. The finite-horizon reach probability of the unsafe set
//! is then at most `eta + N * beta`.

pub mod constant;
pub mod dual;
pub mod iterative;
pub mod post_beta;

use faer::Col;

use crate::config::{BarrierAlgorithm, SynthesisConfig};
use crate::geometry::Hyperrectangle;
use crate::transition::{RegionWithProbabilities, TransitionColumn};
use crate::{E, Error};

pub use constant::constant_barrier;
pub use dual::dual_constant_barrier;
pub use iterative::iterative_barrier;
pub use post_beta::post_compute_beta;

/// A synthesized piecewise-constant barrier.
#[derive(Debug, Clone)]
pub struct BarrierCertificate {
    b: Col<E>,
    eta: E,
    beta: E,
    beta_per_region: Col<E>,
}

impl BarrierCertificate {
    pub(crate) fn new(b: Col<E>, eta: E, beta: E, beta_per_region: Col<E>) -> Self {
        Self {
            b,
            eta,
            beta,
            beta_per_region,
        }
    }

    /// Per-region barrier values.
    pub fn b(&self) -> &Col<E> {
        &self.b
    }

    /// Barrier bound over the initial set.
    pub fn eta(&self) -> E {
        self.eta
    }

    /// Martingale slack.
    pub fn beta(&self) -> E {
        self.beta
    }

    pub fn beta_per_region(&self) -> &Col<E> {
        &self.beta_per_region
    }

    /// Upper bound `eta + N * beta` on the probability of reaching the
    /// unsafe set within `horizon` steps, capped at one.
    pub fn probability_bound(&self, horizon: usize) -> E {
        (self.eta + horizon as E * self.beta).min(1.0)
    }

    /// Largest violation of the per-source martingale inequality
    /// `sum_i P_upper[i, j] b_i + P_upper[unsafe, j] <= b_j + beta_j`
    /// over all source regions. Nonpositive for a valid certificate.
    pub fn max_martingale_violation(&self, regions: &[RegionWithProbabilities]) -> E {
        let mut worst = E::NEG_INFINITY;
        for (j, region) in regions.iter().enumerate() {
            let column = region.transitions();
            let mut expected = column.unsafe_bounds().1;
            for (k, &i) in column.indices().iter().enumerate() {
                expected += column.upper_values()[k] * self.b[i];
            }
            worst = worst.max(expected - self.b[j] - self.beta_per_region[j]);
        }
        worst
    }
}

/// Backend seam: alternative synthesis pipelines (such as a sum-of-squares
/// backend over a semidefinite solver) plug in behind this trait.
pub trait BarrierSynthesizer {
    fn synthesize(
        &self,
        regions: &[RegionWithProbabilities],
        initial_region: &Hyperrectangle,
        obstacle: Option<usize>,
    ) -> Result<BarrierCertificate, Error>;
}

impl BarrierSynthesizer for SynthesisConfig {
    fn synthesize(
        &self,
        regions: &[RegionWithProbabilities],
        initial_region: &Hyperrectangle,
        obstacle: Option<usize>,
    ) -> Result<BarrierCertificate, Error> {
        synthesize_barrier(regions, initial_region, obstacle, self)
    }
}

/// Dispatches to the configured synthesis backend.
pub fn synthesize_barrier(
    regions: &[RegionWithProbabilities],
    initial_region: &Hyperrectangle,
    obstacle: Option<usize>,
    config: &SynthesisConfig,
) -> Result<BarrierCertificate, Error> {
    match config.barrier_algorithm {
        BarrierAlgorithm::Constant => constant_barrier(regions, initial_region, obstacle, config),
        BarrierAlgorithm::DualConstant => {
            dual_constant_barrier(regions, initial_region, obstacle, config)
        }
        BarrierAlgorithm::Iterative => iterative_barrier(regions, initial_region, obstacle, config),
        BarrierAlgorithm::Sos => Err(Error::UnsupportedAlgorithm("sos")),
    }
}

/// Partition cells over which the initial-set bound `eta` is taken: the
/// cells contained in the initial region, or, when the initial region is
/// smaller than every cell, the cells it intersects.
pub(crate) fn initial_cells(
    regions: &[RegionWithProbabilities],
    initial_region: &Hyperrectangle,
) -> Result<Vec<usize>, Error> {
    if regions
        .first()
        .is_some_and(|r| r.region().dim() != initial_region.dim())
    {
        return Err(Error::InvalidInput(format!(
            "initial region has dimension {} but the partition has {}",
            initial_region.dim(),
            regions[0].region().dim()
        )));
    }
    let contained: Vec<usize> = regions
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            let cell = r.region();
            (0..cell.dim()).all(|d| {
                initial_region.low()[d] <= cell.low()[d]
                    && cell.high()[d] <= initial_region.high()[d]
            })
        })
        .map(|(j, _)| j)
        .collect();
    if !contained.is_empty() {
        return Ok(contained);
    }
    let intersecting: Vec<usize> = regions
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.region().is_disjoint(initial_region))
        .map(|(j, _)| j)
        .collect();
    if intersecting.is_empty() {
        return Err(Error::InvalidInput(
            "initial region does not meet any partition cell".into(),
        ));
    }
    Ok(intersecting)
}

/// Reconstructs the region list with sharpened probability columns; regions
/// are never mutated in place.
pub fn update_regions(
    regions: &[RegionWithProbabilities],
    barrier: &Col<E>,
) -> Result<Vec<RegionWithProbabilities>, Error> {
    regions
        .iter()
        .map(|r| {
            let column = r.transitions();
            let values: Vec<E> = column.indices().iter().map(|&i| barrier[i]).collect();
            let (p, p_tail) = worst_case_distribution(
                column.lower_values(),
                column.upper_values(),
                column.unsafe_bounds(),
                &values,
                1.0,
            );
            let mut idx = Vec::new();
            let mut mass = Vec::new();
            for (k, &i) in column.indices().iter().enumerate() {
                if p[k] > 0.0 {
                    idx.push(i);
                    mass.push(p[k]);
                }
            }
            let sharpened = TransitionColumn::new(
                column.n_regions(),
                idx,
                mass.clone(),
                mass,
                p_tail,
                p_tail,
            )?;
            Ok(RegionWithProbabilities::new(r.region().clone(), sharpened))
        })
        .collect()
}

/// Greedy worst-case fill: starting from the lower bounds, the remaining
/// probability mass is assigned to targets in order of decreasing value
/// until the total reaches one or every upper bound is saturated. Exact for
/// maximizing a linear functional over the interval box intersected with the
/// unit simplex.
pub(crate) fn worst_case_distribution(
    lower: &[E],
    upper: &[E],
    tail_bounds: (E, E),
    values: &[E],
    tail_value: E,
) -> (Vec<E>, E) {
    debug_assert_eq!(lower.len(), upper.len());
    debug_assert_eq!(lower.len(), values.len());

    let mut p = lower.to_vec();
    let mut p_tail = tail_bounds.0;
    let mut remaining = 1.0 - p.iter().sum::<E>() - p_tail;
    if remaining <= 0.0 {
        return (p, p_tail);
    }

    let tail_slot = lower.len();
    let value_of = |s: usize| if s == tail_slot { tail_value } else { values[s] };
    let mut order: Vec<usize> = (0..=tail_slot).collect();
    order.sort_by(|&a, &b| {
        value_of(b)
            .partial_cmp(&value_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    for s in order {
        let headroom = if s == tail_slot {
            tail_bounds.1 - p_tail
        } else {
            upper[s] - p[s]
        };
        let take = headroom.max(0.0).min(remaining);
        if s == tail_slot {
            p_tail += take;
        } else {
            p[s] += take;
        }
        remaining -= take;
        if remaining <= 0.0 {
            break;
        }
    }
    (p, p_tail)
}
