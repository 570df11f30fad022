//! Iterative barrier synthesis alternating an outer LP with an inner
//! worst-case distribution step.
//!
//! Instead of pinning every transition probability at its upper bound, the
//! backend lets the distributions slide inside their interval bounds:
//!
//! - the outer step solves the constant-barrier LP for a fixed in-interval
//!   distribution choice;
//! - the inner step picks, per source region, the distribution maximizing
//!   the martingale violation of the current barrier, a fractional-knapsack
//!   fill by descending barrier value.
//!
//! The loop terminates when the certificate stops improving or the outer
//! iteration cap is reached.

use log::debug;

use crate::config::SynthesisConfig;
use crate::geometry::Hyperrectangle;
use crate::transition::{RegionWithProbabilities, TransitionColumn};
use crate::{E, Error};

use super::constant::solve_columns;
use super::{BarrierCertificate, initial_cells, update_regions};

/// Improvement below this threshold stops the outer loop.
const IMPROVEMENT_TOL: E = 1e-8;

pub fn iterative_barrier(
    regions: &[RegionWithProbabilities],
    initial_region: &Hyperrectangle,
    obstacle: Option<usize>,
    config: &SynthesisConfig,
) -> Result<BarrierCertificate, Error> {
    let cells = initial_cells(regions, initial_region)?;
    let columns: Vec<&TransitionColumn> = regions.iter().map(|r| r.transitions()).collect();

    // Baseline: the constant-barrier solution at the upper bounds.
    let mut best = solve_columns(&columns, &cells, obstacle, config)?;
    let mut best_objective = best.eta() + config.time_horizon as E * best.beta();

    for outer in 0..config.max_outer_iterations {
        // Inner step: sharpen every column to the distribution that is
        // worst for the current barrier.
        let sharpened = update_regions(regions, best.b())?;
        let sharpened_columns: Vec<&TransitionColumn> =
            sharpened.iter().map(|r| r.transitions()).collect();

        let candidate = solve_columns(&sharpened_columns, &cells, obstacle, config)?;
        let objective = candidate.eta() + config.time_horizon as E * candidate.beta();
        debug!("outer iteration {outer}: objective {objective} (best {best_objective})");

        if objective < best_objective - IMPROVEMENT_TOL {
            best = candidate;
            best_objective = objective;
        } else {
            break;
        }
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::constant_barrier;
    use crate::tests::fixtures;

    #[test]
    fn iterative_is_no_worse_than_constant() {
        let regions = fixtures::contracting_chain(6, 0.25);
        let initial = regions[3].region().clone();
        let config = SynthesisConfig::default();

        let constant = constant_barrier(&regions, &initial, None, &config).unwrap();
        let iterative = iterative_barrier(&regions, &initial, None, &config).unwrap();

        let objective = |c: &BarrierCertificate| c.eta() + config.time_horizon as E * c.beta();
        assert!(objective(&iterative) <= objective(&constant) + 1e-6);
    }

    #[test]
    fn iterative_respects_the_obstacle_pin() {
        let regions = fixtures::contracting_chain(5, 0.2);
        let initial = regions[1].region().clone();
        let config = SynthesisConfig::default();
        let certificate = iterative_barrier(&regions, &initial, Some(4), &config).unwrap();
        assert_eq!(certificate.b()[4], 1.0);
    }
}
