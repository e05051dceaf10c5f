//! Point index and screen-space clustering grid.
//!
//! Points are bucketed into square cells of `grid_size_px` screen pixels at
//! the current integer zoom level. Cells are laid on projected Web Mercator
//! meters, so membership depends on the zoom level only: panning never moves
//! a point into another cell and never triggers a recomputation.
//!
//! Snapshots are immutable and shared as `Arc<ClusterSnapshot>`; a
//! recomputation always produces a new snapshot instead of editing one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use foundation::bounds::LatLngBounds;
use foundation::geo::{GeoPoint, LatLng};
use foundation::ids::ListingId;
use foundation::math::{MAX_ZOOM_LEVEL, meters_per_pixel, project, zoom_level};
use runtime::metrics::Metrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::points::{IngestReport, retain_valid};

pub const DEFAULT_GRID_SIZE_PX: u32 = 64;

pub mod metric {
    pub const RECOMPUTATIONS: &str = "cluster.recomputations";
    pub const CELLS: &str = "cluster.cells";
    pub const POINTS_VALID: &str = "points.valid";
    pub const POINTS_INVALID: &str = "points.invalid_coordinates";
    pub const POINTS_DUPLICATE: &str = "points.duplicate_ids";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Cell edge in screen pixels.
    pub grid_size_px: u32,
    /// Above this zoom level every point is its own cell.
    pub max_zoom: u8,
    /// Cells with fewer members are rendered as individual markers.
    pub min_cluster_size: usize,
    /// Opaque style token handed through to the renderer.
    pub preset: String,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            grid_size_px: DEFAULT_GRID_SIZE_PX,
            max_zoom: MAX_ZOOM_LEVEL,
            min_cluster_size: 2,
            preset: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellKey {
    Grid { zoom: u8, col: i64, row: i64 },
    /// Unclustered point above `max_zoom`.
    Leaf(ListingId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCell {
    pub key: CellKey,
    /// Arithmetic mean of the member coordinates.
    pub center: LatLng,
    pub member_ids: BTreeSet<ListingId>,
}

impl ClusterCell {
    pub fn count(&self) -> usize {
        self.member_ids.len()
    }

    pub fn contains(&self, id: &ListingId) -> bool {
        self.member_ids.contains(id)
    }
}

/// Cluster partition of the loaded points at one zoom level.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSnapshot {
    /// Increases with every recomputation of the owning index.
    pub generation: u64,
    /// Version of the point set this partition was built from.
    pub points_version: u64,
    pub zoom_level: u8,
    pub preset: String,
    pub min_cluster_size: usize,
    /// Sorted by key.
    pub cells: Vec<ClusterCell>,
}

impl ClusterSnapshot {
    pub fn total_points(&self) -> usize {
        self.cells.iter().map(ClusterCell::count).sum()
    }

    /// Whether `cell` should render as a cluster marker rather than as its
    /// single listing(s).
    pub fn is_cluster(&self, cell: &ClusterCell) -> bool {
        cell.count() >= self.min_cluster_size.max(2)
    }

    /// Cells whose center falls inside `bounds`.
    pub fn visible(&self, bounds: LatLngBounds) -> impl Iterator<Item = &ClusterCell> + '_ {
        self.cells.iter().filter(move |c| bounds.contains(c.center))
    }

    pub fn cell_for(&self, id: &ListingId) -> Option<&ClusterCell> {
        self.cells.iter().find(|c| c.contains(id))
    }
}

/// Partitions `points` into grid cells at `level`.
///
/// Invalid points are skipped. Ids are expected to be unique; duplicates
/// collapse into one member.
pub fn cluster_points(
    points: &[GeoPoint],
    level: u8,
    options: &ClusterOptions,
) -> Vec<ClusterCell> {
    #[derive(Default)]
    struct Acc {
        sum_lat: f64,
        sum_lng: f64,
        n: usize,
        ids: BTreeSet<ListingId>,
    }

    let leaves = level > options.max_zoom;
    let cell_m = f64::from(options.grid_size_px.max(1)) * meters_per_pixel(level);

    let mut cells: BTreeMap<CellKey, Acc> = BTreeMap::new();
    for p in points.iter().filter(|p| p.is_valid()) {
        let key = if leaves {
            CellKey::Leaf(p.id.clone())
        } else {
            let m = project(p.position);
            CellKey::Grid {
                zoom: level,
                col: (m.x / cell_m).floor() as i64,
                row: (m.y / cell_m).floor() as i64,
            }
        };
        let acc = cells.entry(key).or_default();
        acc.sum_lat += p.lat();
        acc.sum_lng += p.lng();
        acc.n += 1;
        acc.ids.insert(p.id.clone());
    }

    cells
        .into_iter()
        .map(|(key, acc)| {
            let n = acc.n as f64;
            ClusterCell {
                key,
                center: LatLng::new(acc.sum_lat / n, acc.sum_lng / n),
                member_ids: acc.ids,
            }
        })
        .collect()
}

/// Holds the current valid point set and its cluster partition.
#[derive(Debug)]
pub struct PointIndex {
    options: ClusterOptions,
    points: Arc<[GeoPoint]>,
    points_version: u64,
    recomputations: u64,
    zoom_level: Option<u8>,
    snapshot: Option<Arc<ClusterSnapshot>>,
    metrics: Metrics,
}

impl Default for PointIndex {
    fn default() -> Self {
        Self::new(ClusterOptions::default())
    }
}

impl PointIndex {
    pub fn new(options: ClusterOptions) -> Self {
        Self {
            options,
            points: Arc::from(Vec::new()),
            points_version: 0,
            recomputations: 0,
            zoom_level: None,
            snapshot: None,
            metrics: Metrics::new(),
        }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Replaces the point set wholesale.
    ///
    /// Invalid coordinates and repeated ids are dropped. If a zoom level is
    /// already known the partition is rebuilt immediately.
    pub fn set_points(&mut self, points: impl IntoIterator<Item = GeoPoint>) -> IngestReport {
        let (valid, report) = retain_valid(points);
        self.points = Arc::from(valid);
        self.points_version += 1;

        self.metrics.set_gauge(metric::POINTS_VALID, report.accepted as i64);
        self.metrics
            .inc_counter(metric::POINTS_INVALID, report.invalid_coordinates as u64);
        self.metrics
            .inc_counter(metric::POINTS_DUPLICATE, report.duplicate_ids as u64);

        if let Some(level) = self.zoom_level {
            self.recompute(level);
        }
        report
    }

    /// The current valid points. Readers keep a consistent snapshot even if
    /// `set_points` is called afterwards.
    pub fn points(&self) -> Arc<[GeoPoint]> {
        Arc::clone(&self.points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points_version(&self) -> u64 {
        self.points_version
    }

    pub fn zoom_level(&self) -> Option<u8> {
        self.zoom_level
    }

    /// Cluster partition for a viewport.
    ///
    /// `center` does not influence membership; the cached snapshot is
    /// returned as-is while the zoom level stays the same.
    pub fn clusters_for_viewport(&mut self, center: LatLng, zoom: f64) -> Arc<ClusterSnapshot> {
        let level = zoom_level(zoom);
        trace!(lat = center.lat, lng = center.lng, zoom, level, "viewport");
        if let Some(current) = self.current()
            && current.zoom_level == level
        {
            return current;
        }
        self.recompute(level)
    }

    /// Like [`Self::clusters_for_viewport`], but only returns a snapshot if
    /// the viewport change produced a new one.
    pub fn on_viewport(&mut self, center: LatLng, zoom: f64) -> Option<Arc<ClusterSnapshot>> {
        let before = self.recomputations;
        let snapshot = self.clusters_for_viewport(center, zoom);
        (self.recomputations != before).then_some(snapshot)
    }

    /// The latest partition, if one was computed for the current points.
    pub fn snapshot(&self) -> Option<Arc<ClusterSnapshot>> {
        self.current()
    }

    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn current(&self) -> Option<Arc<ClusterSnapshot>> {
        self.snapshot
            .as_ref()
            .filter(|s| s.points_version == self.points_version)
            .cloned()
    }

    fn recompute(&mut self, level: u8) -> Arc<ClusterSnapshot> {
        self.recomputations += 1;
        self.zoom_level = Some(level);

        let cells = cluster_points(&self.points, level, &self.options);
        let snapshot = Arc::new(ClusterSnapshot {
            generation: self.recomputations,
            points_version: self.points_version,
            zoom_level: level,
            preset: self.options.preset.clone(),
            min_cluster_size: self.options.min_cluster_size,
            cells,
        });

        self.metrics.inc_counter(metric::RECOMPUTATIONS, 1);
        self.metrics
            .set_gauge(metric::CELLS, snapshot.cells.len() as i64);
        debug!(
            generation = snapshot.generation,
            zoom_level = level,
            points = self.points.len(),
            cells = snapshot.cells.len(),
            "recomputed clusters"
        );

        self.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use foundation::bounds::LatLngBounds;
    use foundation::geo::{GeoPoint, LatLng};
    use foundation::ids::ListingId;
    use pretty_assertions::assert_eq;

    use super::{CellKey, ClusterOptions, PointIndex, cluster_points, metric};

    /// Deterministic scatter around a city center.
    fn scatter(n: usize) -> Vec<GeoPoint> {
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 11) as f64) / ((1u64 << 53) as f64)
        };
        (0..n)
            .map(|i| {
                GeoPoint::new(
                    ListingId::Num(i as u64 + 1),
                    55.5 + next() * 0.5,
                    37.3 + next() * 0.6,
                )
            })
            .collect()
    }

    fn center() -> LatLng {
        LatLng::new(55.75, 37.6)
    }

    #[test]
    fn cells_partition_valid_points() {
        let mut index = PointIndex::default();
        let mut pts = scatter(500);
        pts.push(GeoPoint::new(ListingId::Num(9001), f64::NAN, 37.0));
        pts.push(GeoPoint::new(ListingId::Num(9002), 0.0, 0.0));
        index.set_points(pts);

        for zoom in [3.0, 9.0, 12.5, 16.0] {
            let snap = index.clusters_for_viewport(center(), zoom);
            assert_eq!(snap.total_points(), 500);

            let mut seen = BTreeSet::new();
            for cell in &snap.cells {
                assert_eq!(cell.count(), cell.member_ids.len());
                for id in &cell.member_ids {
                    assert!(seen.insert(id.clone()), "{id} is in two cells");
                }
            }
            assert!(!seen.contains(&ListingId::Num(9001)));
            assert!(!seen.contains(&ListingId::Num(9002)));
        }
    }

    #[test]
    fn panning_reuses_the_same_snapshot() {
        let mut index = PointIndex::default();
        index.set_points(scatter(10_000));
        let first = index.clusters_for_viewport(center(), 11.0);
        let recomputations = index.recomputations();

        for step in 0..20 {
            let panned = LatLng::new(55.6 + step as f64 * 0.01, 37.4 + step as f64 * 0.02);
            let snap = index.clusters_for_viewport(panned, 11.0);
            assert!(Arc::ptr_eq(&first, &snap));
            assert!(index.on_viewport(panned, 11.4).is_none());
        }
        assert_eq!(index.recomputations(), recomputations);
        assert_eq!(index.metrics().counter(metric::RECOMPUTATIONS), recomputations);
    }

    #[test]
    fn crossing_a_zoom_level_recomputes() {
        let mut index = PointIndex::default();
        index.set_points(scatter(200));
        let a = index.clusters_for_viewport(center(), 10.2);
        let b = index.clusters_for_viewport(center(), 10.9);
        assert!(Arc::ptr_eq(&a, &b));

        let c = index.on_viewport(center(), 11.0).expect("new level");
        assert_eq!(c.zoom_level, 11);
        assert!(c.generation > a.generation);
        assert!(c.cells.len() >= a.cells.len());
    }

    #[test]
    fn set_points_replaces_and_recomputes() {
        let mut index = PointIndex::default();
        index.set_points(scatter(100));
        let before = index.clusters_for_viewport(center(), 12.0);
        let held = index.points();

        index.set_points(scatter(10));
        let after = index.snapshot().expect("recomputed at known zoom");
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.total_points(), 10);
        assert_eq!(after.zoom_level, 12);
        // Readers of the old set still see all of it.
        assert_eq!(held.len(), 100);
    }

    #[test]
    fn set_points_before_any_viewport_defers_clustering() {
        let mut index = PointIndex::default();
        let report = index.set_points(scatter(5));
        assert_eq!(report.accepted, 5);
        assert!(index.snapshot().is_none());
        assert_eq!(index.recomputations(), 0);
    }

    #[test]
    fn cell_center_is_member_mean() {
        let pts = vec![
            GeoPoint::new(ListingId::Num(1), 55.7500, 37.6000),
            GeoPoint::new(ListingId::Num(2), 55.7502, 37.6004),
        ];
        let cells = cluster_points(&pts, 5, &ClusterOptions::default());
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].count(), 2);
        assert!((cells[0].center.lat - 55.7501).abs() < 1e-9);
        assert!((cells[0].center.lng - 37.6002).abs() < 1e-9);
    }

    #[test]
    fn far_apart_points_split_at_high_zoom() {
        let pts = vec![
            GeoPoint::new(ListingId::Num(1), 55.70, 37.50),
            GeoPoint::new(ListingId::Num(2), 55.80, 37.70),
        ];
        assert_eq!(cluster_points(&pts, 0, &ClusterOptions::default()).len(), 1);
        assert_eq!(cluster_points(&pts, 14, &ClusterOptions::default()).len(), 2);
    }

    #[test]
    fn above_max_zoom_every_point_is_a_leaf() {
        let opts = ClusterOptions {
            max_zoom: 15,
            ..ClusterOptions::default()
        };
        let pts = vec![
            GeoPoint::new(ListingId::Num(1), 55.75, 37.60),
            GeoPoint::new(ListingId::Num(2), 55.75, 37.60),
        ];
        let cells = cluster_points(&pts, 16, &opts);
        let keys: Vec<CellKey> = cells.iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, vec![CellKey::Leaf(ListingId::Num(1)), CellKey::Leaf(ListingId::Num(2))]);

        let grouped = cluster_points(&pts, 15, &opts);
        assert_eq!(grouped.len(), 1);
    }

    #[test]
    fn snapshot_carries_options_and_culls_by_bounds() {
        let opts = ClusterOptions {
            preset: "violet".to_string(),
            min_cluster_size: 3,
            ..ClusterOptions::default()
        };
        let mut index = PointIndex::new(opts);
        index.set_points(vec![
            GeoPoint::new(ListingId::Num(1), 55.75, 37.60),
            GeoPoint::new(ListingId::Num(2), 55.7501, 37.6001),
            GeoPoint::new(ListingId::Num(3), 59.93, 30.31),
        ]);
        let snap = index.clusters_for_viewport(center(), 10.0);
        assert_eq!(snap.preset, "violet");

        let moscow = LatLngBounds::new(LatLng::new(55.0, 37.0), LatLng::new(56.0, 38.0));
        let visible: Vec<usize> = snap.visible(moscow).map(|c| c.count()).collect();
        assert_eq!(visible, vec![2]);

        let pair = snap.cell_for(&ListingId::Num(1)).unwrap();
        assert!(pair.contains(&ListingId::Num(2)));
        assert!(!snap.is_cluster(pair));
    }
}
