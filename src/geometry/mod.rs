//! Axis-aligned hyperrectangles and convex polytopes in vertex and halfspace
//! representation.

pub mod polytope;

use faer::{Col, ColRef, unzip, zip};

use crate::{E, Error, I};

pub use polytope::{HPolytope, VPolytope};

/// An axis-aligned hyperrectangle `{ x : low <= x <= high }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperrectangle {
    low: Col<E>,
    high: Col<E>,
}

impl Hyperrectangle {
    /// Creates a hyperrectangle from its componentwise bounds.
    ///
    /// Rejects mismatched dimensions and inverted bounds.
    pub fn new(low: Col<E>, high: Col<E>) -> Result<Self, Error> {
        if low.nrows() != high.nrows() {
            return Err(Error::InvalidInput(format!(
                "hyperrectangle bounds have mismatched dimensions {} and {}",
                low.nrows(),
                high.nrows()
            )));
        }
        if low.nrows() == 0 {
            return Err(Error::InvalidInput(
                "hyperrectangle must have at least one dimension".into(),
            ));
        }
        for d in 0..low.nrows() {
            if !(low[d] <= high[d]) {
                return Err(Error::InvalidInput(format!(
                    "hyperrectangle bounds inverted in coordinate {d}: {} > {}",
                    low[d], high[d]
                )));
            }
        }
        Ok(Self { low, high })
    }

    /// Convenience constructor from slices.
    pub fn from_bounds(low: &[E], high: &[E]) -> Result<Self, Error> {
        Self::new(
            Col::from_fn(low.len(), |i| low[i]),
            Col::from_fn(high.len(), |i| high[i]),
        )
    }

    pub fn dim(&self) -> usize {
        self.low.nrows()
    }

    pub fn low(&self) -> ColRef<'_, E> {
        self.low.as_ref()
    }

    pub fn high(&self) -> ColRef<'_, E> {
        self.high.as_ref()
    }

    pub fn center(&self) -> Col<E> {
        Col::from_fn(self.dim(), |d| 0.5 * (self.low[d] + self.high[d]))
    }

    /// Componentwise half-widths.
    pub fn radius(&self) -> Col<E> {
        Col::from_fn(self.dim(), |d| 0.5 * (self.high[d] - self.low[d]))
    }

    pub fn contains(&self, x: ColRef<'_, E>) -> bool {
        debug_assert_eq!(x.nrows(), self.dim());
        (0..self.dim()).all(|d| self.low[d] <= x[d] && x[d] <= self.high[d])
    }

    /// Interval disjointness test. Touching boundaries count as overlapping.
    pub fn is_disjoint(&self, other: &Hyperrectangle) -> bool {
        debug_assert_eq!(self.dim(), other.dim());
        (0..self.dim()).any(|d| self.low[d] > other.high[d] || other.low[d] > self.high[d])
    }

    /// Componentwise projection of `p` onto the hyperrectangle.
    pub fn clamp(&self, p: ColRef<'_, E>) -> Col<E> {
        let mut out = Col::<E>::zeros(self.dim());
        zip!(&mut out, p, &self.low, &self.high).for_each(|unzip!(out, p, low, high)| {
            *out = p.max(*low).min(*high);
        });
        out
    }

    /// Minkowski sum with the centered box of the given half-widths.
    pub fn bloat(&self, radius: ColRef<'_, E>) -> Hyperrectangle {
        debug_assert_eq!(radius.nrows(), self.dim());
        Hyperrectangle {
            low: Col::from_fn(self.dim(), |d| self.low[d] - radius[d]),
            high: Col::from_fn(self.dim(), |d| self.high[d] + radius[d]),
        }
    }

    /// All `2^m` corner points, in a fixed bitmask order.
    pub fn vertices(&self) -> Vec<Col<E>> {
        let m = self.dim();
        let count: I = 1 << m;
        (0..count)
            .map(|mask| {
                Col::from_fn(m, |d| {
                    if mask >> d & 1 == 1 {
                        self.high[d]
                    } else {
                        self.low[d]
                    }
                })
            })
            .collect()
    }

    pub fn to_vpolytope(&self) -> VPolytope {
        VPolytope::from_vertices(self.vertices()).expect("hyperrectangle has vertices")
    }

    /// Halfspace representation with rows `x_d <= high_d` and `-x_d <= -low_d`.
    pub fn to_hpolytope(&self) -> HPolytope {
        let m = self.dim();
        let mut a = faer::Mat::<E>::zeros(2 * m, m);
        let mut b = Col::<E>::zeros(2 * m);
        for d in 0..m {
            a[(d, d)] = 1.0;
            b[d] = self.high[d];
            a[(m + d, d)] = -1.0;
            b[m + d] = -self.low[d];
        }
        HPolytope::new(a, b).expect("hyperrectangle halfspaces are well formed")
    }
}
