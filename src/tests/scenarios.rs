//! End-to-end scenarios: probability bounding composed with barrier
//! synthesis on small systems with known qualitative behavior.

use faer::{Col, Mat};
use rstest::rstest;

use crate::barrier::{
    BarrierCertificate, constant_barrier, dual_constant_barrier, iterative_barrier,
    post_compute_beta, synthesize_barrier,
};
use crate::config::{BarrierAlgorithm, SynthesisConfig, UpperBoundMethod};
use crate::geometry::Hyperrectangle;
use crate::kernel::TransitionKernel;
use crate::system::{
    AffineMap, PwaPiece, StochasticSystem, System, UncertainPwaGaussian,
};
use crate::transition::{TransitionBounds, transition_probabilities};
use crate::{E, Error};

use super::fixtures;

fn objective(certificate: &BarrierCertificate, config: &SynthesisConfig) -> E {
    certificate.eta() + config.time_horizon as E * certificate.beta()
}

/// Scenario: a tightly contracting scalar system almost surely stays near
/// the origin, so the certificate is driven down to the decision floor.
#[test]
fn scalar_contraction_certifies_near_certain_safety() {
    let system = fixtures::scalar_system(0.95, 0.0, 0.01, 1.0);
    let regions = fixtures::uniform_partition(-1.0, 1.0, 5);
    let config = SynthesisConfig::default();

    let with_probabilities = transition_probabilities(&system, &regions, &config).unwrap();
    let initial = regions[2].clone();
    let certificate = constant_barrier(&with_probabilities, &initial, None, &config).unwrap();

    assert!(certificate.eta() <= 1e-4);
    assert!(certificate.beta() < 0.05);
    assert!(certificate.probability_bound(1) < 0.05);
    assert!(certificate.max_martingale_violation(&with_probabilities) <= 1e-6);
}

/// Scenario: with noise comparable to the cell width, the edge regions leak
/// a large fraction of their mass out of the safe set; the program stays
/// feasible and primal and dual objectives coincide.
#[test]
fn unsafe_heavy_partition_remains_feasible() {
    let system = fixtures::scalar_system(1.0, 0.0, 0.5, 1.0);
    let regions = fixtures::uniform_partition(-1.0, 1.0, 3);
    let config = SynthesisConfig::default();

    let with_probabilities = transition_probabilities(&system, &regions, &config).unwrap();
    for edge in [0, 2] {
        let (_, unsafe_upper) = with_probabilities[edge].transitions().unsafe_bounds();
        assert!(unsafe_upper >= 0.3);
    }

    let initial = regions[1].clone();
    let primal = constant_barrier(&with_probabilities, &initial, None, &config).unwrap();
    let dual = dual_constant_barrier(&with_probabilities, &initial, None, &config).unwrap();
    assert!((objective(&primal, &config) - objective(&dual, &config)).abs() < 1e-4);
}

fn damped_rotation(scale: E, angle: E) -> Mat<E> {
    Mat::from_fn(2, 2, |i, j| {
        let rotation = [
            [angle.cos(), -angle.sin()],
            [angle.sin(), angle.cos()],
        ];
        scale * rotation[i][j]
    })
}

/// Scenario: a two-dimensional uncertain piecewise-affine system (a damped
/// rotation with uncertain damping) on a grid partition, initialized from a
/// box smaller than any cell.
#[test]
fn uncertain_rotation_grid_synthesis() {
    let per_axis = 4;
    let regions = fixtures::grid_partition(-0.5, 0.5, per_axis);
    let safe_set = Hyperrectangle::from_bounds(&[-0.5, -0.5], &[0.5, 0.5]).unwrap();
    let pieces = regions
        .iter()
        .map(|region| {
            PwaPiece::new(
                region.clone(),
                vec![
                    AffineMap::new(damped_rotation(0.75, 0.05), Col::<E>::zeros(2)).unwrap(),
                    AffineMap::new(damped_rotation(0.85, 0.05), Col::<E>::zeros(2)).unwrap(),
                ],
            )
            .unwrap()
        })
        .collect();
    let system: System = UncertainPwaGaussian::new(
        pieces,
        Col::from_fn(2, |_| 0.05),
        safe_set,
    )
    .unwrap()
    .into();

    let config = SynthesisConfig::default();
    let with_probabilities =
        transition_probabilities(&system, &regions, &config).unwrap();

    let initial = Hyperrectangle::from_bounds(&[0.0, 0.0], &[0.01, 0.01]).unwrap();
    let constant = constant_barrier(&with_probabilities, &initial, None, &config).unwrap();
    assert!(constant.beta() <= 0.3);

    let dual = dual_constant_barrier(&with_probabilities, &initial, None, &config).unwrap();
    assert!(objective(&dual, &config) <= objective(&constant, &config) + 1e-4);

    let (beta_updated, _) = post_compute_beta(&with_probabilities, &constant, &config).unwrap();
    assert!(beta_updated <= constant.beta() + 1e-6);
}

/// Scenario: the sparsity cutoff keeps exactly the region pairs whose
/// noise-bloated image box overlaps the target, and tighter noise keeps
/// strictly fewer pairs.
#[test]
fn sparsity_cutoff_tracks_the_box_overlap() {
    let regions = fixtures::uniform_partition(-1.0, 1.0, 10);
    let config = SynthesisConfig {
        sparsity_tol: 1e-6,
        ..SynthesisConfig::default()
    };
    // -Phi^-1(1e-6), about 4.75 noise deviations.
    let n_sigma = std::f64::consts::SQRT_2 * statrs::function::erf::erfc_inv(2.0 * 1e-6);
    assert!((n_sigma - 4.75).abs() < 0.05);

    let mut densities = Vec::new();
    for sigma in [0.1, 0.05] {
        let system = fixtures::scalar_system(1.0, 0.0, sigma, 1.0);
        let with_probabilities =
            transition_probabilities(&system, &regions, &config).unwrap();

        // Every kept pair must be within the bloated-box overlap predicate.
        for (j, source) in with_probabilities.iter().enumerate() {
            let image = system.post(j, source.region()).unwrap();
            let reach = Col::from_fn(1, |_| sigma * n_sigma);
            let search = image.bounding_box.bloat(reach.as_ref());
            for &i in source.transitions().indices() {
                assert!(!search.is_disjoint(&regions[i]), "pair ({i}, {j}) kept outside the cutoff");
            }
        }

        let bounds = TransitionBounds::from_regions(&with_probabilities).unwrap();
        densities.push(bounds.density());
    }
    assert!(densities[1] < densities[0]);
}

/// Scenario: shrinking the noise never pushes an upper bound past the
/// box-limit of its target.
#[test]
fn upper_bounds_respect_the_box_limit_under_noise_shrink() {
    let regions = fixtures::uniform_partition(-1.0, 1.0, 6);
    let config = SynthesisConfig::default();
    for sigma in [0.2, 0.1] {
        let system = fixtures::scalar_system(0.9, 0.0, sigma, 1.0);
        let with_probabilities =
            transition_probabilities(&system, &regions, &config).unwrap();
        for (j, source) in with_probabilities.iter().enumerate() {
            let image = system.post(j, source.region()).unwrap();
            let column = source.transitions();
            for (k, &i) in column.indices().iter().enumerate() {
                let kernel = TransitionKernel::new(&regions[i], system.noise_sigma());
                let clamp = image.bounding_box.clamp(kernel.mode().as_ref());
                let box_limit = kernel.prob(clamp.as_ref());
                assert!(column.upper_values()[k] <= box_limit + 1e-9);
            }
        }
    }
}

/// Every synthesis backend yields a feasible certificate with the obstacle
/// pinned and the slack within its bounds.
#[rstest]
#[case::constant(BarrierAlgorithm::Constant)]
#[case::dual(BarrierAlgorithm::DualConstant)]
#[case::iterative(BarrierAlgorithm::Iterative)]
fn backends_agree_on_feasibility(#[case] algorithm: BarrierAlgorithm) {
    let with_probabilities = fixtures::contracting_chain(5, 0.2);
    let initial = with_probabilities[2].region().clone();
    let config = SynthesisConfig {
        barrier_algorithm: algorithm,
        ..SynthesisConfig::default()
    };

    let certificate =
        synthesize_barrier(&with_probabilities, &initial, Some(0), &config).unwrap();
    assert_eq!(certificate.b()[0], 1.0);
    assert!(certificate.beta() >= config.decision_floor - 1e-12);
    assert!(certificate.beta() <= 1.0);
    for j in 0..5 {
        assert!(certificate.beta_per_region()[j] <= certificate.beta() + 1e-5);
    }
}

/// The iterative backend can only improve on the constant one.
#[test]
fn iterative_improves_on_constant() {
    let with_probabilities = fixtures::contracting_chain(6, 0.3);
    let initial = with_probabilities[2].region().clone();
    let config = SynthesisConfig::default();

    let constant = constant_barrier(&with_probabilities, &initial, None, &config).unwrap();
    let iterative = iterative_barrier(&with_probabilities, &initial, None, &config).unwrap();
    assert!(objective(&iterative, &config) <= objective(&constant, &config) + 1e-6);
}

/// The sum-of-squares backend is a seam, not a shipped implementation.
#[test]
fn sos_backend_is_reported_unsupported() {
    let with_probabilities = fixtures::contracting_chain(3, 0.2);
    let initial = with_probabilities[1].region().clone();
    let config = SynthesisConfig {
        barrier_algorithm: BarrierAlgorithm::Sos,
        ..SynthesisConfig::default()
    };
    let result = synthesize_barrier(&with_probabilities, &initial, None, &config);
    assert!(matches!(result, Err(Error::UnsupportedAlgorithm("sos"))));
}

/// The Frank-Wolfe upper-bound strategy plugs into the full pipeline.
#[test]
fn frank_wolfe_upper_bounds_drive_synthesis() {
    let system = fixtures::scalar_system(0.9, 0.0, 0.1, 1.0);
    let regions = fixtures::uniform_partition(-1.0, 1.0, 5);
    let config = SynthesisConfig {
        upper_bound_method: UpperBoundMethod::FrankWolfe {
            num_iterations: 100,
            termination_tol: 1e-9,
        },
        ..SynthesisConfig::default()
    };

    let with_probabilities = transition_probabilities(&system, &regions, &config).unwrap();
    let initial = regions[2].clone();
    let certificate = constant_barrier(&with_probabilities, &initial, None, &config).unwrap();
    assert!(certificate.max_martingale_violation(&with_probabilities) <= 1e-6);
}
