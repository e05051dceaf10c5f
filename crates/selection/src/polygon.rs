use foundation::bounds::LatLngBounds;
use foundation::geo::LatLng;

use crate::error::DrawError;

/// Fewest vertices that enclose an area.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// Closed ring of geographic vertices. The last vertex connects back to the
/// first; the ring is never stored closed.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<LatLng>,
    bounds: LatLngBounds,
}

impl Polygon {
    /// Non-finite vertices are dropped before the size check.
    pub fn new(mut vertices: Vec<LatLng>) -> Result<Self, DrawError> {
        vertices.retain(LatLng::is_finite);
        if vertices.len() < MIN_POLYGON_VERTICES {
            return Err(DrawError::InsufficientVertices {
                have: vertices.len(),
                need: MIN_POLYGON_VERTICES,
            });
        }
        let bounds = LatLngBounds::from_points(&vertices).ok_or(DrawError::InsufficientVertices {
            have: 0,
            need: MIN_POLYGON_VERTICES,
        })?;
        Ok(Self { vertices, bounds })
    }

    /// Builds a polygon from `(lat, lng)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self, DrawError> {
        Self::new(pairs.iter().map(|&(lat, lng)| LatLng::new(lat, lng)).collect())
    }

    pub fn vertices(&self) -> &[LatLng] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Never true for a constructed polygon.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Envelope of the vertices.
    pub fn bounds(&self) -> LatLngBounds {
        self.bounds
    }

    /// Edges of the closed ring, including last-to-first.
    pub fn edges(&self) -> impl Iterator<Item = (LatLng, LatLng)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[(i + n - 1) % n], self.vertices[i]))
    }

    pub fn contains(&self, p: LatLng) -> bool {
        crate::containment::point_in_polygon(self, p)
    }
}
