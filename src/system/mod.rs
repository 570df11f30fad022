//! Discrete-time stochastic system models.
//!
//! Two variants share one seam: a single affine map with additive Gaussian
//! noise, and an uncertain piecewise-affine map where each partition cell
//! carries the vertices of its uncertain dynamics. Both expose the
//! post-image of a region, the per-coordinate noise, and the safe set.

use enum_dispatch::enum_dispatch;
use faer::{Col, ColRef, Mat};

use crate::geometry::{HPolytope, Hyperrectangle, VPolytope};
use crate::{E, Error};

/// One affine piece `x -> A x + b`.
#[derive(Debug, Clone)]
pub struct AffineMap {
    a: Mat<E>,
    b: Col<E>,
}

impl AffineMap {
    pub fn new(a: Mat<E>, b: Col<E>) -> Result<Self, Error> {
        if a.nrows() != a.ncols() {
            return Err(Error::InvalidInput(format!(
                "dynamics matrix must be square, got {}x{}",
                a.nrows(),
                a.ncols()
            )));
        }
        if b.nrows() != a.nrows() {
            return Err(Error::InvalidInput(
                "dynamics offset does not match the matrix dimension".into(),
            ));
        }
        Ok(Self { a, b })
    }

    pub fn matrix(&self) -> &Mat<E> {
        &self.a
    }

    pub fn offset(&self) -> &Col<E> {
        &self.b
    }
}

/// The forward image of a region: vertex form, halfspace form, and the
/// bounding box of both.
///
/// The halfspace form is exact for an invertible single map and otherwise the
/// box relaxation of the vertex image, which over-approximates the hull; all
/// uses (membership tests, maximization domains) remain sound under the
/// relaxation.
#[derive(Debug, Clone)]
pub struct PostImage {
    pub vertices: VPolytope,
    pub halfspaces: HPolytope,
    pub bounding_box: Hyperrectangle,
}

impl PostImage {
    fn from_vertex_image(vertices: VPolytope, exact: Option<HPolytope>) -> Self {
        let bounding_box = vertices.bounding_box();
        let halfspaces = exact.unwrap_or_else(|| bounding_box.to_hpolytope());
        Self {
            vertices,
            halfspaces,
            bounding_box,
        }
    }
}

/// Seam shared by the system variants.
#[enum_dispatch]
pub trait StochasticSystem {
    /// State-space dimension `m`.
    fn dimensionality(&self) -> usize;

    /// Per-coordinate standard deviation of the additive Gaussian noise.
    fn noise_sigma(&self) -> ColRef<'_, E>;

    /// The safe set `X_s`.
    fn safe_set(&self) -> &Hyperrectangle;

    /// Forward image of `region`, using the dynamics associated with the
    /// partition cell `region_index`.
    fn post(&self, region_index: usize, region: &Hyperrectangle) -> Result<PostImage, Error>;
}

/// Tagged system variant; `post` and the accessors dispatch without a deep
/// type hierarchy.
#[enum_dispatch(StochasticSystem)]
#[derive(Debug, Clone)]
pub enum System {
    LinearGaussian,
    UncertainPwaGaussian,
}

fn validate_sigma(sigma: &Col<E>, dim: usize) -> Result<(), Error> {
    if sigma.nrows() != dim {
        return Err(Error::InvalidInput(format!(
            "noise vector has {} entries for a {}-dimensional system",
            sigma.nrows(),
            dim
        )));
    }
    for d in 0..dim {
        if !(sigma[d] > 0.0) {
            return Err(Error::InvalidInput(format!(
                "noise sigma must be positive, got {} in coordinate {d}",
                sigma[d]
            )));
        }
    }
    Ok(())
}

/// A single affine map `x -> A x + b` with additive Gaussian noise.
#[derive(Debug, Clone)]
pub struct LinearGaussian {
    map: AffineMap,
    sigma: Col<E>,
    safe_set: Hyperrectangle,
}

impl LinearGaussian {
    pub fn new(
        a: Mat<E>,
        b: Col<E>,
        sigma: Col<E>,
        safe_set: Hyperrectangle,
    ) -> Result<Self, Error> {
        let map = AffineMap::new(a, b)?;
        if map.matrix().nrows() != safe_set.dim() {
            return Err(Error::InvalidInput(
                "dynamics dimension does not match the safe set".into(),
            ));
        }
        validate_sigma(&sigma, safe_set.dim())?;
        Ok(Self {
            map,
            sigma,
            safe_set,
        })
    }
}

impl StochasticSystem for LinearGaussian {
    fn dimensionality(&self) -> usize {
        self.safe_set.dim()
    }

    fn noise_sigma(&self) -> ColRef<'_, E> {
        self.sigma.as_ref()
    }

    fn safe_set(&self) -> &Hyperrectangle {
        &self.safe_set
    }

    fn post(&self, _region_index: usize, region: &Hyperrectangle) -> Result<PostImage, Error> {
        let vertices = region
            .to_vpolytope()
            .affine_image(self.map.matrix().as_ref(), self.map.offset().as_ref());
        // Exact halfspace image when the map is invertible; box otherwise.
        let exact = region
            .to_hpolytope()
            .affine_image(self.map.matrix().as_ref(), self.map.offset().as_ref())
            .ok();
        Ok(PostImage::from_vertex_image(vertices, exact))
    }
}

/// An uncertain piecewise-affine map: each partition cell carries the vertex
/// dynamics of its uncertain affine map.
#[derive(Debug, Clone)]
pub struct PwaPiece {
    region: Hyperrectangle,
    maps: Vec<AffineMap>,
}

impl PwaPiece {
    pub fn new(region: Hyperrectangle, maps: Vec<AffineMap>) -> Result<Self, Error> {
        if maps.is_empty() {
            return Err(Error::InvalidInput(
                "piecewise-affine piece has no dynamics vertices".into(),
            ));
        }
        let dim = region.dim();
        if maps.iter().any(|m| m.matrix().nrows() != dim) {
            return Err(Error::InvalidInput(
                "dynamics vertices do not match the piece dimension".into(),
            ));
        }
        Ok(Self { region, maps })
    }

    pub fn region(&self) -> &Hyperrectangle {
        &self.region
    }

    pub fn maps(&self) -> &[AffineMap] {
        &self.maps
    }
}

#[derive(Debug, Clone)]
pub struct UncertainPwaGaussian {
    pieces: Vec<PwaPiece>,
    sigma: Col<E>,
    safe_set: Hyperrectangle,
}

impl UncertainPwaGaussian {
    pub fn new(
        pieces: Vec<PwaPiece>,
        sigma: Col<E>,
        safe_set: Hyperrectangle,
    ) -> Result<Self, Error> {
        if pieces.is_empty() {
            return Err(Error::InvalidInput(
                "piecewise-affine system has no pieces".into(),
            ));
        }
        let dim = safe_set.dim();
        if pieces.iter().any(|p| p.region.dim() != dim) {
            return Err(Error::InvalidInput(
                "piece regions do not match the safe-set dimension".into(),
            ));
        }
        validate_sigma(&sigma, dim)?;
        Ok(Self {
            pieces,
            sigma,
            safe_set,
        })
    }

    /// The partition induced by the pieces, in piece order.
    pub fn partition(&self) -> Vec<Hyperrectangle> {
        self.pieces.iter().map(|p| p.region.clone()).collect()
    }
}

impl StochasticSystem for UncertainPwaGaussian {
    fn dimensionality(&self) -> usize {
        self.safe_set.dim()
    }

    fn noise_sigma(&self) -> ColRef<'_, E> {
        self.sigma.as_ref()
    }

    fn safe_set(&self) -> &Hyperrectangle {
        &self.safe_set
    }

    fn post(&self, region_index: usize, region: &Hyperrectangle) -> Result<PostImage, Error> {
        let Some(piece) = self.pieces.get(region_index) else {
            return Err(Error::InvalidInput(format!(
                "region index {region_index} exceeds the {} dynamics pieces",
                self.pieces.len()
            )));
        };
        // The image under an uncertain map is the hull of every dynamics
        // vertex applied to every region vertex.
        let source = region.to_vpolytope();
        let mut vertices = Vec::with_capacity(piece.maps.len() * source.vertices().len());
        for map in &piece.maps {
            let image = source.affine_image(map.matrix().as_ref(), map.offset().as_ref());
            vertices.extend(image.vertices().iter().cloned());
        }
        let vertices = VPolytope::from_vertices(vertices)?;
        Ok(PostImage::from_vertex_image(vertices, None))
    }
}
