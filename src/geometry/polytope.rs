use faer::prelude::*;
use faer::{Col, ColRef, Mat, MatRef};

use crate::solver::qp::ProjectionSolver;
use crate::{E, Error};

use super::Hyperrectangle;

/// A bounded convex polytope given by a finite vertex list. The represented
/// set is the convex hull of the points; the list may contain non-extreme
/// points.
#[derive(Debug, Clone, PartialEq)]
pub struct VPolytope {
    vertices: Vec<Col<E>>,
}

impl VPolytope {
    pub fn from_vertices(vertices: Vec<Col<E>>) -> Result<Self, Error> {
        let Some(first) = vertices.first() else {
            return Err(Error::InvalidInput("polytope has no vertices".into()));
        };
        let dim = first.nrows();
        if vertices.iter().any(|v| v.nrows() != dim) {
            return Err(Error::InvalidInput(
                "polytope vertices have mismatched dimensions".into(),
            ));
        }
        Ok(Self { vertices })
    }

    pub fn dim(&self) -> usize {
        self.vertices[0].nrows()
    }

    pub fn vertices(&self) -> &[Col<E>] {
        &self.vertices
    }

    /// The affine image `{ A v + b : v in self }`, vertex by vertex.
    ///
    /// A singular `A` is allowed; the image then collapses onto a
    /// lower-dimensional flat and callers must not rely on full-dimensional
    /// output.
    pub fn affine_image(&self, a: MatRef<'_, E>, b: ColRef<'_, E>) -> VPolytope {
        let vertices = self
            .vertices
            .iter()
            .map(|v| a * v.as_ref() + b)
            .collect::<Vec<_>>();
        VPolytope { vertices }
    }

    /// Smallest axis-aligned hyperrectangle containing the hull. Exact: the
    /// hull's extent along each axis is attained at a listed vertex.
    pub fn bounding_box(&self) -> Hyperrectangle {
        let m = self.dim();
        let mut low = Col::from_fn(m, |_| E::INFINITY);
        let mut high = Col::from_fn(m, |_| E::NEG_INFINITY);
        for v in &self.vertices {
            for d in 0..m {
                low[d] = low[d].min(v[d]);
                high[d] = high[d].max(v[d]);
            }
        }
        Hyperrectangle::new(low, high).expect("vertex extents are ordered")
    }

    /// Linear maximization oracle: the listed vertex maximizing `dir . v`.
    ///
    /// Since the maximum of a linear functional over the hull is attained at
    /// an extreme point, this is exact for the represented set.
    pub fn support_vertex(&self, dir: ColRef<'_, E>) -> (usize, E) {
        let mut best = (0, E::NEG_INFINITY);
        for (k, v) in self.vertices.iter().enumerate() {
            let value = dot(dir, v.as_ref());
            if value > best.1 {
                best = (k, value);
            }
        }
        best
    }
}

/// A convex polytope in halfspace representation `{ x : A x <= b }`.
#[derive(Debug, Clone, PartialEq)]
pub struct HPolytope {
    a: Mat<E>,
    b: Col<E>,
}

impl HPolytope {
    pub fn new(a: Mat<E>, b: Col<E>) -> Result<Self, Error> {
        if a.nrows() != b.nrows() {
            return Err(Error::InvalidInput(format!(
                "halfspace matrix has {} rows but offset has {}",
                a.nrows(),
                b.nrows()
            )));
        }
        if a.ncols() == 0 || a.nrows() == 0 {
            return Err(Error::InvalidInput("empty halfspace system".into()));
        }
        Ok(Self { a, b })
    }

    pub fn dim(&self) -> usize {
        self.a.ncols()
    }

    pub fn n_halfspaces(&self) -> usize {
        self.a.nrows()
    }

    pub fn halfspaces(&self) -> (MatRef<'_, E>, ColRef<'_, E>) {
        (self.a.as_ref(), self.b.as_ref())
    }

    pub fn contains(&self, x: ColRef<'_, E>, tol: E) -> bool {
        debug_assert_eq!(x.nrows(), self.dim());
        let residual = self.a.as_ref() * x - &self.b;
        (0..residual.nrows()).all(|i| residual[i] <= tol)
    }

    /// The exact image `{ M x + c : A x <= b }` under an invertible map,
    /// `{ y : A M^-1 y <= b + A M^-1 c }`.
    ///
    /// Fails when `M` is numerically singular; callers fall back to a box
    /// relaxation of the vertex image.
    pub fn affine_image(&self, m: MatRef<'_, E>, c: ColRef<'_, E>) -> Result<HPolytope, Error> {
        let n = m.nrows();
        if n != m.ncols() || n != self.dim() {
            return Err(Error::InvalidInput(
                "affine image requires a square map of matching dimension".into(),
            ));
        }
        let det = m.determinant();
        let scale = (0..n)
            .map(|i| (0..n).map(|j| m[(i, j)].abs()).fold(0.0, E::max))
            .fold(1.0, E::max);
        if det.abs() <= 1e-12 * scale.powi(n as i32) {
            return Err(Error::InvalidInput(
                "affine map is numerically singular".into(),
            ));
        }
        // W = A M^-1, via M^T W^T = A^T.
        let lu = m.transpose().partial_piv_lu();
        let w_t = lu.solve(self.a.transpose());
        let w = w_t.transpose().to_owned();
        let offset = w.as_ref() * c;
        let b = &self.b + offset;
        HPolytope::new(w, b)
    }

    /// Sufficient separating-facet disjointness test against a box.
    ///
    /// Returns `true` only when some facet normal separates the two sets;
    /// "false" means "may intersect". Used solely as a pruning filter.
    pub fn is_disjoint_box(&self, rect: &Hyperrectangle) -> bool {
        debug_assert_eq!(self.dim(), rect.dim());
        for i in 0..self.n_halfspaces() {
            // min_{x in box} a_i . x > b_i implies the box misses halfspace i.
            let mut support = 0.0;
            for d in 0..self.dim() {
                let coeff = self.a[(i, d)];
                support += if coeff >= 0.0 {
                    coeff * rect.low()[d]
                } else {
                    coeff * rect.high()[d]
                };
            }
            if support > self.b[i] {
                return true;
            }
        }
        false
    }

    /// Vertex enumeration in the double-description style: every choice of
    /// `m` facets is intersected and the solution kept when it satisfies all
    /// remaining halfspaces. Correctness is favoured over numerical
    /// robustness, as the result seeds bound computations that tolerate
    /// duplicate or near-degenerate vertices.
    pub fn vertices(&self) -> Result<Vec<Col<E>>, Error> {
        let m = self.dim();
        let n = self.n_halfspaces();
        if n < m {
            return Err(Error::InvalidInput(
                "halfspace system cannot be bounded".into(),
            ));
        }

        let scale = 1.0
            + (0..n)
                .map(|i| self.b[i].abs())
                .fold(0.0, E::max);
        let feas_tol = 1e-9 * scale;

        let mut vertices: Vec<Col<E>> = Vec::new();
        let mut subset: Vec<usize> = (0..m).collect();
        loop {
            if let Some(v) = self.facet_intersection(&subset) {
                if self.contains(v.as_ref(), feas_tol)
                    && !vertices
                        .iter()
                        .any(|w| (0..m).all(|d| (w[d] - v[d]).abs() <= feas_tol))
                {
                    vertices.push(v);
                }
            }
            if !next_combination(&mut subset, n) {
                break;
            }
        }

        if vertices.is_empty() {
            return Err(Error::InvalidInput(
                "halfspace system is empty or unbounded".into(),
            ));
        }
        Ok(vertices)
    }

    fn facet_intersection(&self, rows: &[usize]) -> Option<Col<E>> {
        let m = self.dim();
        let sub = Mat::from_fn(m, m, |i, j| self.a[(rows[i], j)]);
        let rhs = Mat::from_fn(m, 1, |i, _| self.b[rows[i]]);
        let lu = sub.as_ref().partial_piv_lu();
        let x = lu.solve(rhs.as_ref());
        // A singular subsystem shows up as a non-solution.
        let residual = &sub * &x - &rhs;
        let scale = 1.0 + (0..m).map(|i| rhs[(i, 0)].abs()).fold(0.0, E::max);
        if (0..m).any(|i| !(residual[(i, 0)].abs() <= 1e-7 * scale)) {
            return None;
        }
        Some(Col::from_fn(m, |i| x[(i, 0)]))
    }

    /// The point of the polytope closest to `p` in the Euclidean norm,
    /// `argmin |x - p|^2 s.t. A x <= b`.
    pub fn closest_point(&self, p: ColRef<'_, E>) -> Result<Col<E>, Error> {
        if self.contains(p, 0.0) {
            return Ok(p.to_owned());
        }
        ProjectionSolver::default().project(self.a.as_ref(), self.b.as_ref(), p)
    }
}

pub(crate) fn dot(a: ColRef<'_, E>, b: ColRef<'_, E>) -> E {
    debug_assert_eq!(a.nrows(), b.nrows());
    let mut acc = 0.0;
    for i in 0..a.nrows() {
        acc += a[i] * b[i];
    }
    acc
}

/// Advances `subset` to the next lexicographic `k`-combination of `0..n`.
fn next_combination(subset: &mut [usize], n: usize) -> bool {
    let k = subset.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if subset[i] < n - k + i {
            subset[i] += 1;
            for j in i + 1..k {
                subset[j] = subset[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> HPolytope {
        // x >= 0, y >= 0, x + y <= 1.
        let a = Mat::from_fn(3, 2, |i, j| [[-1.0, 0.0], [0.0, -1.0], [1.0, 1.0]][i][j]);
        let b = Col::from_fn(3, |i| [0.0, 0.0, 1.0][i]);
        HPolytope::new(a, b).unwrap()
    }

    #[test]
    fn combination_walker_visits_all_pairs() {
        let mut subset = vec![0, 1];
        let mut count = 1;
        while next_combination(&mut subset, 4) {
            count += 1;
        }
        assert_eq!(count, 6);
    }

    #[test]
    fn triangle_vertices_are_enumerated() {
        let vertices = triangle().vertices().unwrap();
        assert_eq!(vertices.len(), 3);
        for expected in [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]] {
            assert!(
                vertices
                    .iter()
                    .any(|v| (v[0] - expected[0]).abs() < 1e-8 && (v[1] - expected[1]).abs() < 1e-8)
            );
        }
    }

    #[test]
    fn box_halfspaces_round_trip_through_enumeration() {
        let rect = Hyperrectangle::from_bounds(&[-1.0, 2.0], &[1.0, 3.0]).unwrap();
        let vertices = rect.to_hpolytope().vertices().unwrap();
        assert_eq!(vertices.len(), 4);
        for v in &vertices {
            assert!(rect.contains(v.as_ref()));
        }
    }

    #[test]
    fn affine_image_of_box_matches_vertex_image() {
        let rect = Hyperrectangle::from_bounds(&[0.0, 0.0], &[1.0, 2.0]).unwrap();
        let m = Mat::from_fn(2, 2, |i, j| [[0.5, 0.1], [-0.2, 0.8]][i][j]);
        let c = Col::from_fn(2, |i| [1.0, -1.0][i]);
        let image = rect.to_hpolytope().affine_image(m.as_ref(), c.as_ref()).unwrap();
        for v in rect.vertices() {
            let y = &m * &v + &c;
            assert!(image.contains(y.as_ref(), 1e-9));
        }
        let outside = Col::from_fn(2, |i| [5.0, 5.0][i]);
        assert!(!image.contains(outside.as_ref(), 1e-9));
    }

    #[test]
    fn singular_map_is_rejected() {
        let rect = Hyperrectangle::from_bounds(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        let m = Mat::from_fn(2, 2, |_, _| 1.0);
        let c = Col::<E>::zeros(2);
        assert!(rect.to_hpolytope().affine_image(m.as_ref(), c.as_ref()).is_err());
    }

    #[test]
    fn separating_facet_prunes_far_boxes() {
        let poly = triangle();
        let far = Hyperrectangle::from_bounds(&[2.0, 2.0], &[3.0, 3.0]).unwrap();
        let near = Hyperrectangle::from_bounds(&[0.4, 0.4], &[0.6, 0.6]).unwrap();
        assert!(poly.is_disjoint_box(&far));
        assert!(!poly.is_disjoint_box(&near));
    }

    #[test]
    fn support_vertex_maximizes_linear_functional() {
        let poly = VPolytope::from_vertices(vec![
            Col::from_fn(2, |i| [0.0, 0.0][i]),
            Col::from_fn(2, |i| [1.0, 0.0][i]),
            Col::from_fn(2, |i| [0.0, 1.0][i]),
        ])
        .unwrap();
        let dir = Col::from_fn(2, |i| [1.0, -1.0][i]);
        let (k, value) = poly.support_vertex(dir.as_ref());
        assert_eq!(k, 1);
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn closest_point_clamps_onto_the_triangle() {
        let poly = triangle();
        let p = Col::from_fn(2, |i| [1.0, 1.0][i]);
        let q = poly.closest_point(p.as_ref()).unwrap();
        assert!((q[0] - 0.5).abs() < 1e-5);
        assert!((q[1] - 0.5).abs() < 1e-5);
        let inside = Col::from_fn(2, |i| [0.2, 0.2][i]);
        let same = poly.closest_point(inside.as_ref()).unwrap();
        assert!((same[0] - 0.2).abs() < 1e-12);
    }
}
