use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::ListingId;

/// Geographic coordinate in decimal degrees.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// `(0, 0)` is what upstream listing data uses for "no location".
    pub fn is_sentinel(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }

    /// A coordinate is indexable when both components are finite and it is
    /// not the sentinel.
    pub fn is_valid(&self) -> bool {
        self.is_finite() && !self.is_sentinel()
    }
}

/// One geotagged listing as seen by the map core.
///
/// The payload is whatever display data the caller attached; the core never
/// looks inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub id: ListingId,
    pub position: LatLng,
    pub payload: Arc<serde_json::Value>,
}

impl GeoPoint {
    pub fn new(id: ListingId, lat: f64, lng: f64) -> Self {
        Self {
            id,
            position: LatLng::new(lat, lng),
            payload: Arc::new(serde_json::Value::Null),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Arc::new(payload);
        self
    }

    pub fn lat(&self) -> f64 {
        self.position.lat
    }

    pub fn lng(&self) -> f64 {
        self.position.lng
    }

    pub fn is_valid(&self) -> bool {
        self.position.is_valid()
    }
}
