use serde::{Deserialize, Serialize};

use crate::geo::LatLng;

/// Axis-aligned lat/lng rectangle.
///
/// Bounds do not wrap the antimeridian: `south_west.lng <= north_east.lng`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLngBounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl LatLngBounds {
    pub fn new(south_west: LatLng, north_east: LatLng) -> Self {
        LatLngBounds {
            south_west,
            north_east,
        }
    }

    /// Smallest bounds covering every finite coordinate in `points`.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a LatLng>) -> Option<Self> {
        let mut out: Option<Self> = None;
        for p in points {
            if !p.is_finite() {
                continue;
            }
            match out.as_mut() {
                None => out = Some(Self::new(*p, *p)),
                Some(b) => b.extend(*p),
            }
        }
        out
    }

    pub fn extend(&mut self, p: LatLng) {
        self.south_west.lat = self.south_west.lat.min(p.lat);
        self.south_west.lng = self.south_west.lng.min(p.lng);
        self.north_east.lat = self.north_east.lat.max(p.lat);
        self.north_east.lng = self.north_east.lng.max(p.lng);
    }

    /// Inclusive on every side.
    pub fn contains(&self, p: LatLng) -> bool {
        p.lat >= self.south_west.lat
            && p.lat <= self.north_east.lat
            && p.lng >= self.south_west.lng
            && p.lng <= self.north_east.lng
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) * 0.5,
            (self.south_west.lng + self.north_east.lng) * 0.5,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::LatLngBounds;
    use crate::geo::LatLng;

    #[test]
    fn from_points_skips_non_finite() {
        let pts = [
            LatLng::new(1.0, 5.0),
            LatLng::new(f64::NAN, 100.0),
            LatLng::new(-2.0, 3.0),
        ];
        let b = LatLngBounds::from_points(&pts).unwrap();
        assert_eq!(b.south_west, LatLng::new(-2.0, 3.0));
        assert_eq!(b.north_east, LatLng::new(1.0, 5.0));
    }

    #[test]
    fn contains_is_inclusive() {
        let b = LatLngBounds::new(LatLng::new(0.0, 0.0), LatLng::new(2.0, 2.0));
        assert!(b.contains(LatLng::new(2.0, 0.0)));
        assert!(b.contains(LatLng::new(1.0, 1.0)));
        assert!(!b.contains(LatLng::new(2.1, 1.0)));
        assert_eq!(b.center(), LatLng::new(1.0, 1.0));
    }

    #[test]
    fn empty_input_has_no_bounds() {
        assert!(LatLngBounds::from_points(&[]).is_none());
    }
}
