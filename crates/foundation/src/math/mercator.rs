//! Spherical Web Mercator, the projection every tiled web map uses.
//!
//! Screen-space grids are built on projected meters at a fixed zoom level so
//! that a cell's extent never depends on where the viewport is centered.

use super::geodesy::WGS84_A;
use crate::geo::LatLng;

/// Width of one map tile in pixels.
pub const TILE_SIZE_PX: f64 = 256.0;
/// Latitude at which the Mercator square is clipped.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;
pub const MIN_ZOOM_LEVEL: u8 = 0;
pub const MAX_ZOOM_LEVEL: u8 = 22;

/// Projected Web Mercator coordinates (meters).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Mercator {
    pub x: f64,
    pub y: f64,
}

impl Mercator {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

pub fn project(p: LatLng) -> Mercator {
    let lat = p.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = WGS84_A * p.lng.to_radians();
    let y = WGS84_A * (std::f64::consts::FRAC_PI_4 + lat * 0.5).tan().ln();
    Mercator::new(x, y)
}

pub fn unproject(m: Mercator) -> LatLng {
    let lng = (m.x / WGS84_A).to_degrees();
    let lat = (2.0 * (m.y / WGS84_A).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    LatLng::new(lat, lng)
}

/// Integer zoom level for a (possibly fractional) map zoom.
///
/// Fractional zooms inside one level share a pixel scale for grid purposes.
/// Non-finite input maps to the minimum level.
pub fn zoom_level(zoom: f64) -> u8 {
    if !zoom.is_finite() {
        return MIN_ZOOM_LEVEL;
    }
    let min = f64::from(MIN_ZOOM_LEVEL);
    let max = f64::from(MAX_ZOOM_LEVEL);
    zoom.floor().clamp(min, max) as u8
}

/// Ground resolution at the equator for `level`, in projected meters per pixel.
pub fn meters_per_pixel(level: u8) -> f64 {
    let world_px = TILE_SIZE_PX * f64::from(1u32 << level.min(MAX_ZOOM_LEVEL));
    2.0 * std::f64::consts::PI * WGS84_A / world_px
}
