//! Even-odd ray casting of listings against a drawn region.
//!
//! Boundary rule: an edge counts as crossed when the point's latitude lies in
//! the half-open interval between the edge's endpoint latitudes and the point
//! is strictly west of the crossing. Points on the southern or western edges
//! of an axis-aligned box are therefore inside, points on the northern or
//! eastern edges outside. The rule is the same for every entry point in this
//! module.

use std::collections::BTreeSet;
use std::sync::Arc;

use foundation::geo::{GeoPoint, LatLng};
use foundation::ids::ListingId;
use runtime::budget::FrameBudget;
use tracing::{debug, trace};

use crate::polygon::Polygon;
use crate::result::SelectionResult;

/// Crossing-number test with longitude as x and latitude as y.
pub fn point_in_polygon(polygon: &Polygon, p: LatLng) -> bool {
    if !p.is_finite() {
        return false;
    }
    let mut inside = false;
    for (a, b) in polygon.edges() {
        if (b.lat > p.lat) != (a.lat > p.lat) {
            let cross_lng = (a.lng - b.lng) * (p.lat - b.lat) / (a.lat - b.lat) + b.lng;
            if p.lng < cross_lng {
                inside = !inside;
            }
        }
    }
    inside
}

/// Ids of the valid points inside the ring described by `vertices`.
///
/// Returns `None` when the ring has fewer than three usable vertices.
pub fn filter(points: &[GeoPoint], vertices: &[LatLng]) -> Option<BTreeSet<ListingId>> {
    let polygon = Polygon::new(vertices.to_vec()).ok()?;
    Some(filter_polygon(points, &polygon))
}

pub fn filter_polygon(points: &[GeoPoint], polygon: &Polygon) -> BTreeSet<ListingId> {
    let envelope = polygon.bounds();
    points
        .iter()
        .filter(|p| p.is_valid() && envelope.contains(p.position))
        .filter(|p| point_in_polygon(polygon, p.position))
        .map(|p| p.id.clone())
        .collect()
}

/// Filters on the current task, yielding to the runtime after roughly
/// `batch_units` point-edge comparisons.
pub async fn filter_cooperative(
    points: Arc<[GeoPoint]>,
    polygon: Polygon,
    batch_units: u32,
) -> BTreeSet<ListingId> {
    let mut job = ContainmentJob::new(0, polygon, points);
    let mut budget = FrameBudget::new(batch_units.max(1));
    loop {
        if let JobProgress::Done(result) = job.step(&mut budget) {
            return result.included_ids;
        }
        budget.refill();
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobProgress {
    Pending { processed: usize, total: usize },
    Done(SelectionResult),
}

/// Incremental containment over a fixed point set.
///
/// Each point costs one unit for the envelope check plus one unit per
/// polygon edge if it falls inside the envelope.
#[derive(Debug)]
pub struct ContainmentJob {
    generation: u64,
    polygon: Polygon,
    points: Arc<[GeoPoint]>,
    cursor: usize,
    included: BTreeSet<ListingId>,
    comparisons: u64,
    steps: u32,
    result: Option<SelectionResult>,
}

impl ContainmentJob {
    pub fn new(generation: u64, polygon: Polygon, points: Arc<[GeoPoint]>) -> Self {
        Self {
            generation,
            polygon,
            points,
            cursor: 0,
            included: BTreeSet::new(),
            comparisons: 0,
            steps: 0,
            result: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    pub fn processed(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.points.len()
    }

    /// Budget units spent so far.
    pub fn comparisons(&self) -> u64 {
        self.comparisons
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn is_done(&self) -> bool {
        self.result.is_some()
    }

    /// Advances until `budget` runs out or every point has been tested.
    ///
    /// A fresh budget always admits at least one point, so a budget smaller
    /// than a single point's cost still finishes eventually.
    pub fn step(&mut self, budget: &mut FrameBudget) -> JobProgress {
        if let Some(result) = &self.result {
            return JobProgress::Done(result.clone());
        }
        self.steps += 1;

        let envelope = self.polygon.bounds();
        let edge_cost = u32::try_from(self.polygon.len()).unwrap_or(u32::MAX);
        let mut admitted = 0usize;

        while let Some(p) = self.points.get(self.cursor) {
            let candidate = p.is_valid() && envelope.contains(p.position);
            let cost = if candidate { edge_cost.saturating_add(1) } else { 1 };
            if !budget.try_consume(cost) {
                if admitted > 0 || !budget.is_fresh() {
                    break;
                }
                budget.consume_up_to(cost);
            }
            admitted += 1;
            self.comparisons += u64::from(cost);
            if candidate && point_in_polygon(&self.polygon, p.position) {
                self.included.insert(p.id.clone());
            }
            self.cursor += 1;
        }

        if self.cursor < self.points.len() {
            trace!(
                generation = self.generation,
                processed = self.cursor,
                total = self.points.len(),
                "containment yielded"
            );
            return JobProgress::Pending {
                processed: self.cursor,
                total: self.points.len(),
            };
        }

        let result = SelectionResult::new(self.generation, std::mem::take(&mut self.included));
        debug!(
            generation = self.generation,
            included = result.len(),
            points = self.points.len(),
            comparisons = self.comparisons,
            steps = self.steps,
            "containment finished"
        );
        self.result = Some(result.clone());
        JobProgress::Done(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use foundation::geo::{GeoPoint, LatLng};
    use foundation::ids::ListingId;
    use pretty_assertions::assert_eq;
    use runtime::budget::FrameBudget;

    use super::{
        ContainmentJob, JobProgress, filter, filter_cooperative, filter_polygon, point_in_polygon,
    };
    use crate::polygon::Polygon;

    fn square() -> Polygon {
        Polygon::from_pairs(&[(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0)]).unwrap()
    }

    fn grid(n: u64) -> Vec<GeoPoint> {
        (0..n)
            .map(|i| {
                let lat = 0.05 + (i % 50) as f64 * 0.1;
                let lng = 0.05 + (i / 50) as f64 * 0.1;
                GeoPoint::new(ListingId::Num(i + 1), lat, lng)
            })
            .collect()
    }

    #[test]
    fn unit_square_inside_and_outside() {
        let sq = square();
        assert!(point_in_polygon(&sq, LatLng::new(1.0, 1.0)));
        assert!(!point_in_polygon(&sq, LatLng::new(3.0, 3.0)));
        assert!(!point_in_polygon(&sq, LatLng::new(1.0, -0.5)));
    }

    #[test]
    fn boundary_rule_is_half_open() {
        let sq = square();
        assert!(point_in_polygon(&sq, LatLng::new(1.0, 0.0)));
        assert!(point_in_polygon(&sq, LatLng::new(0.0, 1.0)));
        assert!(!point_in_polygon(&sq, LatLng::new(1.0, 2.0)));
        assert!(!point_in_polygon(&sq, LatLng::new(2.0, 1.0)));
    }

    #[test]
    fn concave_ring_excludes_the_notch() {
        // U shape opening north.
        let u = Polygon::from_pairs(&[
            (0.0, 0.0),
            (3.0, 0.0),
            (3.0, 1.0),
            (1.0, 1.0),
            (1.0, 2.0),
            (3.0, 2.0),
            (3.0, 3.0),
            (0.0, 3.0),
        ])
        .unwrap();
        assert!(point_in_polygon(&u, LatLng::new(0.5, 1.5)));
        assert!(!point_in_polygon(&u, LatLng::new(2.0, 1.5)));
        assert!(point_in_polygon(&u, LatLng::new(2.0, 0.5)));
    }

    #[test]
    fn filter_skips_invalid_points_and_small_rings() {
        let points = vec![
            GeoPoint::new(ListingId::Num(1), 1.0, 1.0),
            GeoPoint::new(ListingId::Num(2), 3.0, 3.0),
            GeoPoint::new(ListingId::Num(3), f64::NAN, 1.0),
            GeoPoint::new(ListingId::Num(4), 0.0, 0.0),
        ];
        let ring = [
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 2.0),
            LatLng::new(2.0, 2.0),
            LatLng::new(2.0, 0.0),
        ];
        assert_eq!(filter(&points, &ring), Some(BTreeSet::from([ListingId::Num(1)])));
        assert_eq!(filter(&points, &ring[..2]), None);
    }

    #[test]
    fn budgeted_job_matches_one_shot_filter() {
        let points: Arc<[GeoPoint]> = grid(2_500).into();
        let poly = Polygon::from_pairs(&[(0.3, 0.3), (4.1, 0.7), (3.2, 3.9), (0.9, 2.2)]).unwrap();
        let expected = filter_polygon(&points, &poly);

        let mut job = ContainmentJob::new(7, poly, Arc::clone(&points));
        let mut budget = FrameBudget::new(500);
        let mut frames = 0;
        let result = loop {
            frames += 1;
            match job.step(&mut budget) {
                JobProgress::Done(r) => break r,
                JobProgress::Pending { processed, total } => {
                    assert!(processed < total);
                    assert!(budget.spent_units() <= 500);
                }
            }
            budget.refill();
        };
        assert!(frames > 1);
        assert_eq!(result.generation, 7);
        assert_eq!(result.included_ids, expected);
        assert!(job.is_done());
    }

    #[test]
    fn tiny_budget_still_progresses() {
        let points: Arc<[GeoPoint]> = grid(3).into();
        let poly = Polygon::from_pairs(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)]).unwrap();
        let mut job = ContainmentJob::new(1, poly, points);
        let mut budget = FrameBudget::new(2);
        let mut frames = 0;
        while !job.is_done() {
            job.step(&mut budget);
            budget.refill();
            frames += 1;
            assert!(frames <= 3);
        }
        assert_eq!(job.processed(), 3);
    }

    #[test]
    fn step_after_done_repeats_the_result() {
        let points: Arc<[GeoPoint]> = grid(10).into();
        let mut job = ContainmentJob::new(3, square(), points);
        let first = job.step(&mut FrameBudget::unlimited());
        let again = job.step(&mut FrameBudget::new(0));
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn cooperative_filter_matches_sync_filter() {
        let points: Arc<[GeoPoint]> = grid(1_000).into();
        let poly = square();
        let expected = filter_polygon(&points, &poly);
        let got = filter_cooperative(points, poly, 64).await;
        assert_eq!(got, expected);
    }
}
