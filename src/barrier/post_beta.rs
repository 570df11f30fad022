//! Post-synthesis re-optimization of the martingale slack.
//!
//! With the barrier fixed, the slack needed by source region `j` is the
//! worst expected barrier increase over all distributions compatible with
//! the interval bounds:
//!
//! ```text
//! beta_j = max { sum_i b_i p_i + p_unsafe - b_j :
//!                P_lower <= p <= P_upper,  sum p + p_unsafe = 1 }
//! ```
//!
//! The maximizer of this linear functional over the interval box intersected
//! with the unit simplex is the greedy fill by descending barrier value, so
//! each per-region program is solved exactly and in parallel.

use faer::Col;
use rayon::prelude::*;

use crate::config::SynthesisConfig;
use crate::transition::RegionWithProbabilities;
use crate::{E, Error};

use super::{BarrierCertificate, worst_case_distribution};

/// Re-optimizes the slack for a fixed barrier; returns the tightened global
/// slack `max_j beta_j` together with the per-region values.
pub fn post_compute_beta(
    regions: &[RegionWithProbabilities],
    certificate: &BarrierCertificate,
    config: &SynthesisConfig,
) -> Result<(E, Col<E>), Error> {
    let n = regions.len();
    if certificate.b().nrows() != n {
        return Err(Error::InvalidInput(format!(
            "certificate covers {} regions but {n} were supplied",
            certificate.b().nrows()
        )));
    }
    let accuracy = config.decision_floor;

    let betas: Vec<E> = regions
        .par_iter()
        .enumerate()
        .map(|(j, region)| {
            let column = region.transitions();

            let mut lower = column.lower_values().to_vec();
            let mut upper = column.upper_values().to_vec();
            for k in 0..lower.len() {
                repair_interval(&mut lower[k], &mut upper[k], accuracy, j)?;
            }
            let (mut tail_lower, mut tail_upper) = column.unsafe_bounds();
            repair_interval(&mut tail_lower, &mut tail_upper, accuracy, j)?;

            let values: Vec<E> = column
                .indices()
                .iter()
                .map(|&i| certificate.b()[i])
                .collect();
            let (p, p_tail) =
                worst_case_distribution(&lower, &upper, (tail_lower, tail_upper), &values, 1.0);

            let mut expected = p_tail;
            for (k, &mass) in p.iter().enumerate() {
                expected += values[k] * mass;
            }
            Ok(expected - certificate.b()[j])
        })
        .collect::<Result<Vec<E>, Error>>()?;

    let beta_updated = betas.iter().copied().fold(E::NEG_INFINITY, E::max);
    Ok((beta_updated, Col::from_fn(n, |j| betas[j])))
}

/// Repairs an interval inverted by numerical noise; a genuine inversion is
/// an invariant violation.
fn repair_interval(lower: &mut E, upper: &mut E, accuracy: E, source: usize) -> Result<(), Error> {
    if lower > upper {
        if *lower - *upper <= accuracy {
            std::mem::swap(lower, upper);
        } else {
            return Err(Error::InvariantViolation(format!(
                "interval [{lower}, {upper}] of source region {source} is inverted"
            )));
        }
    }
    Ok(())
}
