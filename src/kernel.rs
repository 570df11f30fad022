//! The Gaussian cell kernel and its numerically stable logarithm.
//!
//! For a target hyperrectangle `[l, h]` and per-coordinate noise `sigma`,
//!
//! ```text
//! T(y) = prod_d 0.5 * ( erf((y_d - l_d) / (sigma_d sqrt2))
//!                     - erf((y_d - h_d) / (sigma_d sqrt2)) )
//! ```
//!
//! is the probability that a Gaussian centered at `y` lands in the cell. `T`
//! is log-concave in `y`, its gradient is defined everywhere, and its global
//! maximum sits at the cell center. Evaluation goes through
//! [`ln_erf_diff`], which avoids the catastrophic cancellation of
//! `erf(a) - erf(b)` when both operands are deep in the same tail.

use std::f64::consts::{LN_2, PI, SQRT_2};

use faer::{Col, ColRef};
use statrs::function::erf::{erf, erfc};

use crate::E;
use crate::geometry::Hyperrectangle;

/// `ln(erfc(x))` for all finite `x`, switching to the asymptotic expansion
///
/// ```text
/// erfc(x) ~ exp(-x^2) / (x sqrt(pi)) * (1 - 1/(2x^2) + 3/(4x^4))
/// ```
///
/// once `erfc` itself underflows toward the representable floor.
fn ln_erfc(x: E) -> E {
    if x < 25.0 {
        erfc(x).ln()
    } else {
        let x2 = x * x;
        -x2 - (x * PI.sqrt()).ln() + (-0.5 / x2 + 0.75 / (x2 * x2)).ln_1p()
    }
}

/// `ln(erf(a) - erf(b))` for `a >= b`, stable in both tails.
///
/// Returns negative infinity when the difference underflows entirely; the
/// corresponding region pair then contributes zero probability.
pub fn ln_erf_diff(a: E, b: E) -> E {
    debug_assert!(a >= b);
    if b >= 0.0 {
        // Both operands in the upper tail: erf(a) - erf(b) = erfc(b) - erfc(a).
        let lb = ln_erfc(b);
        let la = ln_erfc(a);
        lb + (-(la - lb).exp()).ln_1p()
    } else if a <= 0.0 {
        // Mirror of the upper-tail case.
        ln_erf_diff(-b, -a)
    } else {
        // Operands straddle zero; the summands reinforce instead of cancel.
        (erf(a) + erf(-b)).ln()
    }
}

/// Gaussian transition kernel for one target cell.
#[derive(Debug, Clone)]
pub struct TransitionKernel {
    low: Col<E>,
    high: Col<E>,
    sigma: Col<E>,
}

impl TransitionKernel {
    pub fn new(target: &Hyperrectangle, sigma: ColRef<'_, E>) -> Self {
        debug_assert_eq!(target.dim(), sigma.nrows());
        Self {
            low: target.low().to_owned(),
            high: target.high().to_owned(),
            sigma: sigma.to_owned(),
        }
    }

    pub fn dim(&self) -> usize {
        self.low.nrows()
    }

    /// The maximizer of `T`: the center of the target cell.
    pub fn mode(&self) -> Col<E> {
        Col::from_fn(self.dim(), |d| 0.5 * (self.low[d] + self.high[d]))
    }

    /// `log T(y)`; negative infinity when the probability underflows.
    pub fn ln_prob(&self, y: ColRef<'_, E>) -> E {
        let mut acc = 0.0;
        for d in 0..self.dim() {
            let denom = self.sigma[d] * SQRT_2;
            let alpha = (y[d] - self.low[d]) / denom;
            let beta = (y[d] - self.high[d]) / denom;
            acc += ln_erf_diff(alpha, beta) - LN_2;
            if acc == E::NEG_INFINITY {
                break;
            }
        }
        acc
    }

    pub fn prob(&self, y: ColRef<'_, E>) -> E {
        self.ln_prob(y).exp()
    }

    /// Gradient of `log T`, evaluated through the same stable logarithms.
    ///
    /// Where the cell probability underflows entirely the true gradient is
    /// numerically meaningless; the ascent direction toward the cell center
    /// is returned instead, which is exact up to scale for a log-concave
    /// kernel.
    pub fn grad_ln_prob(&self, y: ColRef<'_, E>) -> Col<E> {
        let mut grad = Col::<E>::zeros(self.dim());
        for d in 0..self.dim() {
            let denom = self.sigma[d] * SQRT_2;
            let alpha = (y[d] - self.low[d]) / denom;
            let beta = (y[d] - self.high[d]) / denom;
            let led = ln_erf_diff(alpha, beta);
            if !led.is_finite() {
                grad[d] = 0.5 * (self.low[d] + self.high[d]) - y[d];
                continue;
            }
            // d/dy log( erf(alpha) - erf(beta) ) with both exponentials
            // rescaled by the log difference to keep them representable.
            let coeff = 2.0 / (self.sigma[d] * (2.0 * PI).sqrt());
            grad[d] = coeff * ((-alpha * alpha - led).exp() - (-beta * beta - led).exp());
        }
        grad
    }
}
