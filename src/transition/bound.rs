//! Lower and upper bounds of the Gaussian cell kernel over a post-image.
//!
//! The lower bound is exact: a log-concave function attains its minimum over
//! a polytope at a vertex, so enumerating the vertex image suffices. The
//! upper bound dispatches over the configured strategy; every branch returns
//! a certified over-estimate of the true maximum, with the bounding-box value
//! as the common fallback.

use faer::{Col, ColRef};
use log::warn;

use crate::config::UpperBoundMethod;
use crate::geometry::polytope::dot;
use crate::kernel::TransitionKernel;
use crate::solver::qp::ProjectionSolver;
use crate::system::PostImage;
use crate::E;

/// Per-thread solver state, reused across the columns a worker processes.
pub struct BoundScratch {
    projection: ProjectionSolver,
}

impl BoundScratch {
    pub fn new() -> Self {
        Self {
            projection: ProjectionSolver::default(),
        }
    }
}

impl Default for BoundScratch {
    fn default() -> Self {
        Self::new()
    }
}

const ASCENT_MAX_ITERATIONS: usize = 100;
const ASCENT_STEP_TOL: E = 1e-10;
const ASCENT_SLACK: E = 1e-9;
const MEMBERSHIP_TOL: E = 1e-12;

/// Minimum of the kernel over the image: the smallest vertex value.
pub fn min_over_polytope(kernel: &TransitionKernel, image: &PostImage) -> E {
    image
        .vertices
        .vertices()
        .iter()
        .map(|v| kernel.prob(v.as_ref()))
        .fold(E::INFINITY, E::min)
}

/// Certified maximum of the quasi-concave kernel over the image.
///
/// When the kernel mode lies inside the image the maximum is exact. The
/// bounding-box value is itself the exact maximum over the box containing the
/// image, so every branch is capped by it.
pub fn max_quasi_concave_over_polytope(
    kernel: &TransitionKernel,
    image: &PostImage,
    method: UpperBoundMethod,
    scratch: &mut BoundScratch,
) -> E {
    let mode = kernel.mode();
    if image.halfspaces.contains(mode.as_ref(), MEMBERSHIP_TOL) {
        return kernel.prob(mode.as_ref());
    }

    let clamped = image.bounding_box.clamp(mode.as_ref());
    let box_bound = kernel.prob(clamped.as_ref());

    match method {
        UpperBoundMethod::BoxApproximation => box_bound,
        UpperBoundMethod::GlobalSolver => {
            match projected_gradient_ascent(kernel, image, &clamped, scratch) {
                Some(tight) => tight.min(box_bound),
                // Iteration cap: the box value is still a certified maximum
                // over a superset; the ascent slack covers its evaluation.
                None => box_bound + ASCENT_SLACK,
            }
        }
        UpperBoundMethod::FrankWolfe {
            num_iterations,
            termination_tol,
        } => frank_wolfe(
            kernel,
            image,
            &mode,
            num_iterations,
            termination_tol,
            scratch,
        )
        .min(box_bound),
    }
}

/// Linearization gap of `log T` at `y`: an upper bound on how far `y` is from
/// the true maximum over the hull, by concavity of the log-kernel.
fn ascent_gap(kernel: &TransitionKernel, image: &PostImage, y: &Col<E>) -> E {
    let grad = kernel.grad_ln_prob(y.as_ref());
    let (_, support) = image.vertices.support_vertex(grad.as_ref());
    (support - dot(grad.as_ref(), y.as_ref())).max(0.0)
}

/// Projected gradient ascent on `log T` over the halfspace image, started at
/// the clamp of the kernel mode onto the bounding box.
///
/// On convergence the returned bound is certified through the linearization
/// gap at the final iterate. `None` signals non-convergence; the caller falls
/// back to the box bound.
fn projected_gradient_ascent(
    kernel: &TransitionKernel,
    image: &PostImage,
    start: &Col<E>,
    scratch: &mut BoundScratch,
) -> Option<E> {
    let (a, b) = image.halfspaces.halfspaces();
    let mut y = if image.halfspaces.contains(start.as_ref(), MEMBERSHIP_TOL) {
        start.clone()
    } else {
        match scratch.projection.project(a, b, start.as_ref()) {
            Ok(point) => point,
            Err(_) => {
                warn!("projection onto post-image failed; keeping the box bound");
                return None;
            }
        }
    };

    let mut value = kernel.ln_prob(y.as_ref());
    let mut converged = false;
    let mut step: E = 1.0;

    for _ in 0..ASCENT_MAX_ITERATIONS {
        let grad = kernel.grad_ln_prob(y.as_ref());
        if inf_norm(grad.as_ref()) <= ASCENT_STEP_TOL {
            converged = true;
            break;
        }

        // Backtrack the projected step until the log-kernel improves.
        let mut accepted = false;
        for _ in 0..40 {
            let trial_raw = Col::from_fn(y.nrows(), |d| y[d] + step * grad[d]);
            let trial = if image.halfspaces.contains(trial_raw.as_ref(), MEMBERSHIP_TOL) {
                trial_raw
            } else {
                match scratch.projection.project(a, b, trial_raw.as_ref()) {
                    Ok(point) => point,
                    Err(_) => break,
                }
            };
            let trial_value = kernel.ln_prob(trial.as_ref());
            if trial_value > value {
                let moved = (0..y.nrows())
                    .map(|d| (trial[d] - y[d]).abs())
                    .fold(0.0, E::max);
                y = trial;
                value = trial_value;
                accepted = true;
                if moved <= ASCENT_STEP_TOL {
                    converged = true;
                }
                break;
            }
            step *= 0.5;
        }
        if !accepted {
            // No feasible improving step exists up to tolerance; the iterate
            // is a constrained maximizer.
            converged = true;
        }
        if converged {
            break;
        }
        step = (step * 2.0).min(1.0);
    }

    if !converged {
        warn!("upper-bound ascent hit the iteration cap; degrading to the box bound");
        return None;
    }
    let gap = ascent_gap(kernel, image, &y);
    Some((value + gap).exp())
}

/// Conditional-gradient (Frank-Wolfe) minimization of `-log T` over the hull
/// of the vertex image, with the vertex list as the exact linear oracle.
fn frank_wolfe(
    kernel: &TransitionKernel,
    image: &PostImage,
    mode: &Col<E>,
    num_iterations: usize,
    termination_tol: E,
    scratch: &mut BoundScratch,
) -> E {
    let (a, b) = image.halfspaces.halfspaces();
    // Deterministic start: the closest image point to the kernel mode.
    let mut y = match scratch.projection.project(a, b, mode.as_ref()) {
        Ok(point) => point,
        Err(_) => image.bounding_box.clamp(mode.as_ref()),
    };

    let mut gap = E::INFINITY;
    for k in 0..num_iterations {
        let grad = kernel.grad_ln_prob(y.as_ref());
        let (best, support) = image.vertices.support_vertex(grad.as_ref());
        gap = support - dot(grad.as_ref(), y.as_ref());
        if gap < termination_tol {
            break;
        }
        let vertex = &image.vertices.vertices()[best];
        let gamma = 8.0 / (k as E + 8.0);
        for d in 0..y.nrows() {
            y[d] += gamma * (vertex[d] - y[d]);
        }
    }

    (kernel.ln_prob(y.as_ref()) + gap.max(0.0)).exp()
}

fn inf_norm(x: ColRef<'_, E>) -> E {
    let mut norm: E = 0.0;
    for i in 0..x.nrows() {
        norm = norm.max(x[i].abs());
    }
    norm
}

#[cfg(test)]
mod tests {
    use faer::Mat;

    use super::*;
    use crate::geometry::Hyperrectangle;
    use crate::system::{LinearGaussian, StochasticSystem, System};

    fn image_of(region: &Hyperrectangle, scale: E, sigma: E) -> (System, PostImage) {
        let dim = region.dim();
        let system: System = LinearGaussian::new(
            Mat::from_fn(dim, dim, |i, j| if i == j { scale } else { 0.0 }),
            Col::<E>::zeros(dim),
            Col::from_fn(dim, |_| sigma),
            Hyperrectangle::from_bounds(&vec![-10.0; dim], &vec![10.0; dim]).unwrap(),
        )
        .unwrap()
        .into();
        let image = system.post(0, region).unwrap();
        (system, image)
    }

    fn kernel_for(target: &Hyperrectangle, sigma: E) -> TransitionKernel {
        TransitionKernel::new(target, Col::from_fn(target.dim(), |_| sigma).as_ref())
    }

    #[test]
    fn lower_bound_is_the_worst_vertex() {
        let region = Hyperrectangle::from_bounds(&[0.0], &[1.0]).unwrap();
        let (_, image) = image_of(&region, 1.0, 0.2);
        let kernel = kernel_for(&region, 0.2);
        let at_edge = kernel.prob(Col::from_fn(1, |_| 0.0).as_ref());
        assert!((min_over_polytope(&kernel, &image) - at_edge).abs() < 1e-12);
    }

    #[test]
    fn mode_inside_the_image_is_exact() {
        let region = Hyperrectangle::from_bounds(&[-1.0], &[1.0]).unwrap();
        let (_, image) = image_of(&region, 1.0, 0.2);
        let kernel = kernel_for(&region, 0.2);
        let mut scratch = BoundScratch::new();
        let upper = max_quasi_concave_over_polytope(
            &kernel,
            &image,
            UpperBoundMethod::BoxApproximation,
            &mut scratch,
        );
        assert!((upper - kernel.prob(kernel.mode().as_ref())).abs() < 1e-12);
    }

    #[test]
    fn strategies_are_ordered_by_tightness() {
        // Image [0.2, 0.6] against target [-1, 0]: the mode is outside.
        let source = Hyperrectangle::from_bounds(&[0.4], &[1.2]).unwrap();
        let (_, image) = image_of(&source, 0.5, 0.15);
        let target = Hyperrectangle::from_bounds(&[-1.0], &[0.0]).unwrap();
        let kernel = kernel_for(&target, 0.15);
        let mut scratch = BoundScratch::new();

        let by_box = max_quasi_concave_over_polytope(
            &kernel,
            &image,
            UpperBoundMethod::BoxApproximation,
            &mut scratch,
        );
        let by_solver = max_quasi_concave_over_polytope(
            &kernel,
            &image,
            UpperBoundMethod::GlobalSolver,
            &mut scratch,
        );
        let by_fw = max_quasi_concave_over_polytope(
            &kernel,
            &image,
            UpperBoundMethod::FrankWolfe {
                num_iterations: 200,
                termination_tol: 1e-10,
            },
            &mut scratch,
        );

        // The true maximum sits at the image point closest to the target,
        // y = 0.2.
        let truth = kernel.prob(Col::from_fn(1, |_| 0.2).as_ref());
        for upper in [by_box, by_solver, by_fw] {
            assert!(upper >= truth - 1e-12);
        }
        assert!(by_solver <= by_box + 1e-12);
        assert!(by_fw <= by_box + 1e-9);
        assert!((by_solver - truth).abs() < 1e-6);
    }
}
