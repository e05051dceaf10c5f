//! Turning listing records into indexable points.
//!
//! Listing records arrive as loosely typed JSON from the listings API.
//! Only `{id, lat, lng}` is required; the whole record is kept as the
//! point's opaque display payload.

use std::collections::HashSet;

use foundation::geo::GeoPoint;
use foundation::ids::ListingId;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const LAT_KEYS: [&str; 2] = ["lat", "latitude"];
const LNG_KEYS: [&str; 3] = ["lng", "lon", "longitude"];

/// Counts of what happened to a batch of incoming listings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub missing_ids: usize,
    pub invalid_coordinates: usize,
    pub duplicate_ids: usize,
}

impl IngestReport {
    pub fn rejected(&self) -> usize {
        self.missing_ids + self.invalid_coordinates + self.duplicate_ids
    }
}

/// Extracts a point from one listing record.
///
/// Returns `None` only when the record has no usable id. Coordinates that
/// are missing or non-numeric become NaN and are dropped later by
/// [`retain_valid`].
pub fn listing_from_record(record: &Value) -> Option<GeoPoint> {
    let id = listing_id(record.get("id")?)?;

    // Some endpoints nest the coordinates under `location`.
    let source = match record.get("location") {
        Some(loc) if loc.is_object() && first_key(record, &LAT_KEYS).is_none() => loc,
        _ => record,
    };
    let lat = coordinate(first_key(source, &LAT_KEYS));
    let lng = coordinate(first_key(source, &LNG_KEYS));

    Some(GeoPoint::new(id, lat, lng).with_payload(record.clone()))
}

/// Converts a batch of records, skipping those without an id.
pub fn listings_from_records<'a>(
    records: impl IntoIterator<Item = &'a Value>,
) -> (Vec<GeoPoint>, IngestReport) {
    let mut report = IngestReport::default();
    let mut out = Vec::new();
    for record in records {
        match listing_from_record(record) {
            Some(p) => out.push(p),
            None => report.missing_ids += 1,
        }
    }
    (out, report)
}

/// Keeps points with valid coordinates, first occurrence per id.
///
/// Invalid coordinates are expected in listing data (missing geolocation)
/// and are counted, never reported as errors.
pub fn retain_valid(points: impl IntoIterator<Item = GeoPoint>) -> (Vec<GeoPoint>, IngestReport) {
    let mut report = IngestReport::default();
    let mut seen: HashSet<ListingId> = HashSet::new();
    let mut out = Vec::new();

    for p in points {
        if !p.is_valid() {
            report.invalid_coordinates += 1;
            continue;
        }
        if !seen.insert(p.id.clone()) {
            report.duplicate_ids += 1;
            continue;
        }
        out.push(p);
    }
    report.accepted = out.len();

    if report.rejected() > 0 {
        debug!(
            accepted = report.accepted,
            invalid = report.invalid_coordinates,
            duplicates = report.duplicate_ids,
            "dropped unindexable listings"
        );
    }
    (out, report)
}

fn first_key<'a>(record: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| record.get(*k))
}

/// Non-negative integral ids (including `7.0` and `"7"`) become numeric;
/// any other number or non-empty string is kept verbatim.
fn listing_id(v: &Value) -> Option<ListingId> {
    match v {
        Value::Number(n) => Some(match n.as_u64().or_else(|| integral(n.as_f64()?)) {
            Some(id) => ListingId::Num(id),
            None => ListingId::from(n.to_string().as_str()),
        }),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            Some(match s.parse::<u64>() {
                Ok(id) => ListingId::Num(id),
                Err(_) => ListingId::from(s),
            })
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<u64> {
    (f.fract() == 0.0 && f >= 0.0 && f < u64::MAX as f64).then_some(f as u64)
}

fn coordinate(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}
