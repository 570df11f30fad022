//! Shared builders for the end-to-end and backend tests.

use faer::{Col, Mat};

use crate::E;
use crate::SynthesisConfig;
use crate::geometry::Hyperrectangle;
use crate::system::{LinearGaussian, System};
use crate::transition::{RegionWithProbabilities, transition_probabilities};

/// Uniform 1-D partition of `[low, high]` into `n` cells.
pub fn uniform_partition(low: E, high: E, n: usize) -> Vec<Hyperrectangle> {
    let width = (high - low) / n as E;
    (0..n)
        .map(|j| {
            Hyperrectangle::from_bounds(&[low + j as E * width], &[low + (j + 1) as E * width])
                .unwrap()
        })
        .collect()
}

/// Uniform 2-D grid partition of `[low, high]^2`, `per_axis` cells per axis,
/// in row-major order.
pub fn grid_partition(low: E, high: E, per_axis: usize) -> Vec<Hyperrectangle> {
    let width = (high - low) / per_axis as E;
    let mut regions = Vec::with_capacity(per_axis * per_axis);
    for iy in 0..per_axis {
        for ix in 0..per_axis {
            regions.push(
                Hyperrectangle::from_bounds(
                    &[low + ix as E * width, low + iy as E * width],
                    &[low + (ix + 1) as E * width, low + (iy + 1) as E * width],
                )
                .unwrap(),
            );
        }
    }
    regions
}

/// Scalar linear system `x -> a x + b` on the safe set `[-bound, bound]`.
pub fn scalar_system(a: E, b: E, sigma: E, bound: E) -> System {
    LinearGaussian::new(
        Mat::from_fn(1, 1, |_, _| a),
        Col::from_fn(1, |_| b),
        Col::from_fn(1, |_| sigma),
        Hyperrectangle::from_bounds(&[-bound], &[bound]).unwrap(),
    )
    .unwrap()
    .into()
}

/// A contracting scalar chain (`x -> 0.9 x`) on `[-1, 1]` with its
/// transition bounds already computed.
pub fn contracting_chain(n: usize, sigma: E) -> Vec<RegionWithProbabilities> {
    let system = scalar_system(0.9, 0.0, sigma, 1.0);
    let regions = uniform_partition(-1.0, 1.0, n);
    transition_probabilities(&system, &regions, &SynthesisConfig::default()).unwrap()
}
