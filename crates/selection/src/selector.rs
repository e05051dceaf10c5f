//! Wiring of one map session to clustering, drawing and containment.

use std::sync::Arc;

use engine::error::EngineError;
use engine::loader::EngineHandle;
use engine::native::{ContainerRef, MapEvent, MapOptions};
use engine::session::MapSession;
use foundation::geo::GeoPoint;
use layers::cluster::{ClusterOptions, ClusterSnapshot, PointIndex};
use layers::points::IngestReport;
use runtime::budget::FrameBudget;
use runtime::metrics::Metrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::containment::{ContainmentJob, JobProgress};
use crate::drawing::{DrawCommand, DrawOutcome, DrawingController, DrawingOptions, InputMode};
use crate::result::{SelectionPublisher, SelectionResult, SelectionView};

pub mod metric {
    pub const EVENTS: &str = "selector.events";
    pub const FINALIZED: &str = "selection.finalized";
    pub const PUBLISHED: &str = "selection.published";
    pub const ABANDONED: &str = "containment.abandoned";
    pub const COMPARISONS: &str = "containment.comparisons";
    pub const FRAMES: &str = "containment.frames";
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub map: MapOptions,
    pub clusters: ClusterOptions,
    pub drawing: DrawingOptions,
    /// Containment work units per frame; zero means the runtime default.
    pub frame_budget_units: u32,
}

impl SelectorConfig {
    pub fn frame_budget(&self) -> FrameBudget {
        match self.frame_budget_units {
            0 => FrameBudget::default(),
            n => FrameBudget::new(n),
        }
    }
}

/// Region selection on one map.
///
/// Single-threaded: the host calls [`RegionSelector::pump`] after native
/// events arrive and [`RegionSelector::run_frame`] once per frame while a
/// selection is computing.
pub struct RegionSelector {
    session: MapSession,
    index: PointIndex,
    drawing: DrawingController,
    job: Option<ContainmentJob>,
    publisher: SelectionPublisher,
    config: SelectorConfig,
    metrics: Metrics,
}

impl RegionSelector {
    /// Opens a map in `container` and clusters for the initial viewport.
    pub fn open(
        engine: &EngineHandle,
        container: ContainerRef,
        config: SelectorConfig,
    ) -> Result<Self, EngineError> {
        let session = MapSession::open(engine, container, config.map.clone())?;
        let mut index = PointIndex::new(config.clusters.clone());
        let publisher = SelectionPublisher::new();

        let zoom = config.map.clamp_zoom(config.map.zoom);
        publisher.publish_clusters(index.clusters_for_viewport(config.map.center, zoom));

        Ok(Self {
            session,
            index,
            drawing: DrawingController::new(config.drawing.clone()),
            job: None,
            publisher,
            config,
            metrics: Metrics::new(),
        })
    }

    pub fn view(&self) -> SelectionView {
        self.publisher.subscribe()
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn session(&self) -> &MapSession {
        &self.session
    }

    pub fn index(&self) -> &PointIndex {
        &self.index
    }

    pub fn drawing(&self) -> &DrawingController {
        &self.drawing
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn is_computing(&self) -> bool {
        self.job.is_some()
    }

    pub fn clusters(&self) -> Option<Arc<ClusterSnapshot>> {
        self.publisher.clusters()
    }

    pub fn selection(&self) -> Option<Arc<SelectionResult>> {
        self.publisher.selection()
    }

    /// Replaces the listings shown on the map.
    ///
    /// A selection computed against the old set is no longer meaningful: any
    /// in-flight job is abandoned and the published selection cleared. After
    /// close nothing is ingested and an empty report is returned.
    pub fn set_points(&mut self, points: impl IntoIterator<Item = GeoPoint>) -> IngestReport {
        if !self.session.is_open() {
            debug!("points ignored after close");
            return IngestReport::default();
        }
        self.abandon_job("points replaced");
        self.publisher.clear_selection();
        let report = self.index.set_points(points);
        if let Some(snapshot) = self.index.snapshot() {
            self.publisher.publish_clusters(snapshot);
        }
        info!(
            accepted = report.accepted,
            rejected = report.rejected(),
            "listings loaded"
        );
        report
    }

    pub fn enable_drawing(&mut self) -> DrawOutcome {
        self.command(DrawCommand::Enable)
    }

    pub fn disable_drawing(&mut self) -> DrawOutcome {
        self.command(DrawCommand::Disable)
    }

    pub fn restart_drawing(&mut self) -> DrawOutcome {
        self.command(DrawCommand::Restart)
    }

    pub fn finish_drawing(&mut self) -> DrawOutcome {
        self.command(DrawCommand::Finish)
    }

    pub fn set_input_mode(&mut self, mode: InputMode) {
        self.drawing.set_input_mode(mode);
    }

    /// Feeds one command to the drawing controller and applies its outcome.
    /// Commands after close are ignored.
    pub fn command(&mut self, cmd: DrawCommand) -> DrawOutcome {
        if !self.session.is_open() {
            return DrawOutcome::Ignored;
        }
        let outcome = self.drawing.handle(cmd);
        match &outcome {
            DrawOutcome::Started { .. } => self.set_panning(false),
            DrawOutcome::Discarded { .. } => self.set_panning(true),
            DrawOutcome::Finalized(polygon) => {
                self.set_panning(true);
                let generation = self.drawing.finalized_count();
                if self.job.is_some() {
                    self.abandon_job("superseded by a newer region");
                }
                self.job = Some(ContainmentJob::new(
                    generation,
                    polygon.clone(),
                    self.index.points(),
                ));
                self.metrics.inc_counter(metric::FINALIZED, 1);
            }
            DrawOutcome::Rejected(e) => debug!(error = %e, "draw command rejected"),
            DrawOutcome::Ignored | DrawOutcome::VertexAdded { .. } => {}
        }
        outcome
    }

    /// Drains native events in emission order.
    ///
    /// Returns the number of events processed.
    pub fn pump(&mut self) -> usize {
        let events = self.session.drain_events();
        let n = events.len();
        for event in events {
            match event {
                MapEvent::ViewportChanged(v) => {
                    if let Some(snapshot) = self.index.on_viewport(v.center, v.zoom) {
                        self.publisher.publish_clusters(snapshot);
                    }
                }
                MapEvent::Pointer(p) => {
                    self.command(DrawCommand::Pointer(p));
                }
                MapEvent::DoubleClick(at) => {
                    self.command(DrawCommand::DoubleClick(at));
                }
            }
        }
        self.metrics.inc_counter(metric::EVENTS, n as u64);
        n
    }

    /// Advances the in-flight containment job within `budget`.
    ///
    /// Returns the result once it is published.
    pub fn run_frame(&mut self, budget: &mut FrameBudget) -> Option<Arc<SelectionResult>> {
        let job = self.job.as_mut()?;
        let before = job.comparisons();
        let progress = job.step(budget);
        let spent = job.comparisons() - before;
        self.metrics.inc_counter(metric::COMPARISONS, spent);
        self.metrics.inc_counter(metric::FRAMES, 1);

        let JobProgress::Done(result) = progress else {
            return None;
        };
        self.job = None;
        let published = self.publisher.publish_selection(result)?;
        self.metrics.inc_counter(metric::PUBLISHED, 1);
        info!(
            generation = published.generation,
            included = published.len(),
            "selection published"
        );
        Some(published)
    }

    /// Runs frames with the configured budget until no job is in flight.
    ///
    /// Returns the number of frames used.
    pub fn run_until_idle(&mut self) -> u32 {
        let mut budget = self.config.frame_budget();
        let mut frames = 0;
        while self.job.is_some() {
            budget.refill();
            self.run_frame(&mut budget);
            frames += 1;
        }
        frames
    }

    /// Closes the map. An in-flight selection is abandoned without being
    /// published. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if !self.session.is_open() {
            return false;
        }
        self.abandon_job("session closed");
        self.drawing.handle(DrawCommand::Disable);
        self.session.close()
    }

    /// Selector counters merged with the point index's.
    pub fn metrics(&self) -> Metrics {
        let mut out = self.index.metrics().clone();
        out.merge(&self.metrics);
        out
    }

    fn abandon_job(&mut self, reason: &'static str) {
        if let Some(job) = self.job.take() {
            debug!(
                generation = job.generation(),
                processed = job.processed(),
                total = job.total(),
                reason,
                "containment abandoned"
            );
            self.metrics.inc_counter(metric::ABANDONED, 1);
        }
    }

    fn set_panning(&mut self, enabled: bool) {
        if let Err(e) = self.session.set_panning_enabled(enabled) {
            warn!(error = %e, enabled, "could not toggle panning");
        }
    }
}

impl std::fmt::Debug for RegionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionSelector")
            .field("session", &self.session)
            .field("points", &self.index.len())
            .field("drawing", &self.drawing.state())
            .field("computing", &self.job.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use engine::headless::{HeadlessEngine, HeadlessProbe};
    use engine::loader::{EngineHandle, MapEngineLoader};
    use engine::native::{ContainerRef, MapEvent, PointerEvent, Viewport};
    use foundation::geo::{GeoPoint, LatLng};
    use foundation::ids::ListingId;
    use pretty_assertions::assert_eq;
    use runtime::budget::FrameBudget;

    use super::{RegionSelector, SelectorConfig, metric};
    use crate::drawing::{DrawOutcome, DrawingState};

    fn open() -> (RegionSelector, HeadlessProbe) {
        let engine = HeadlessEngine::new();
        let handle = EngineHandle::new(engine.clone());
        let selector =
            RegionSelector::open(&handle, ContainerRef::new("map"), SelectorConfig::default())
                .unwrap();
        let probe = engine.last_probe().unwrap();
        (selector, probe)
    }

    fn listings() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(ListingId::Num(1), 1.0, 1.0),
            GeoPoint::new(ListingId::Num(2), 3.0, 3.0),
            GeoPoint::new(ListingId::Num(3), 0.5, 1.5),
            GeoPoint::new(ListingId::Num(4), f64::NAN, 1.0),
            GeoPoint::new(ListingId::Num(5), 0.0, 0.0),
        ]
    }

    fn tap(probe: &HeadlessProbe, lat: f64, lng: f64) {
        probe.emit(MapEvent::Pointer(PointerEvent::down(LatLng::new(lat, lng))));
    }

    fn ids(v: &[u64]) -> BTreeSet<ListingId> {
        v.iter().copied().map(ListingId::Num).collect()
    }

    #[test]
    fn draws_a_square_and_publishes_the_selection() {
        let (mut sel, probe) = open();
        let view = sel.view();
        let report = sel.set_points(listings());
        assert_eq!(report.accepted, 3);

        sel.enable_drawing();
        assert!(!probe.panning_enabled());
        for (lat, lng) in [(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0)] {
            tap(&probe, lat, lng);
        }
        probe.emit(MapEvent::DoubleClick(LatLng::new(2.0, 0.0)));
        assert_eq!(sel.pump(), 5);

        assert!(probe.panning_enabled());
        assert!(sel.is_computing());
        assert!(view.selection().is_none());

        let published = sel.run_frame(&mut FrameBudget::default()).unwrap();
        assert_eq!(published.included_ids, ids(&[1, 3]));
        assert_eq!(view.included_ids(), ids(&[1, 3]));
        assert!(!sel.is_computing());
        assert_eq!(sel.metrics().counter(metric::PUBLISHED), 1);
    }

    #[test]
    fn draw_then_cancel_never_filters() {
        let (mut sel, probe) = open();
        sel.set_points(listings());
        sel.enable_drawing();
        for (lat, lng) in [(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0)] {
            tap(&probe, lat, lng);
        }
        sel.pump();
        assert_eq!(sel.drawing().vertices().len(), 4);

        assert_eq!(sel.disable_drawing(), DrawOutcome::Discarded { vertices: 4 });
        assert_eq!(sel.drawing().state(), DrawingState::Idle);
        assert!(sel.drawing().vertices().is_empty());
        assert!(!sel.is_computing());
        assert!(sel.run_frame(&mut FrameBudget::default()).is_none());
        assert_eq!(sel.metrics().counter(metric::FRAMES), 0);
        assert!(probe.panning_enabled());
    }

    #[test]
    fn two_vertices_never_finalize() {
        let (mut sel, probe) = open();
        sel.set_points(listings());
        sel.enable_drawing();
        tap(&probe, 0.0, 0.0);
        tap(&probe, 0.0, 2.0);
        probe.emit(MapEvent::DoubleClick(LatLng::new(0.0, 2.0)));
        sel.pump();
        assert!(sel.drawing().is_drawing());
        assert!(!sel.is_computing());
        assert!(!probe.panning_enabled());
    }

    #[test]
    fn close_abandons_an_in_flight_selection() {
        let (mut sel, probe) = open();
        let view = sel.view();
        let many: Vec<GeoPoint> = (1..=5_000)
            .map(|i| {
                let lat = 0.1 + (i % 100) as f64 * 0.01;
                let lng = 0.1 + (i / 100) as f64 * 0.01;
                GeoPoint::new(ListingId::Num(i), lat, lng)
            })
            .collect();
        sel.set_points(many);
        sel.enable_drawing();
        for (lat, lng) in [(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0)] {
            tap(&probe, lat, lng);
        }
        sel.pump();
        sel.finish_drawing();

        assert!(sel.run_frame(&mut FrameBudget::new(100)).is_none());
        assert!(sel.is_computing());

        assert!(sel.close());
        assert!(!sel.is_computing());
        assert!(view.selection().is_none());
        assert!(probe.is_destroyed());
        assert_eq!(probe.active_listeners(), 0);

        assert!(!sel.close());
        assert_eq!(probe.destroy_calls(), 1);
        assert_eq!(tap_count_after_close(&probe), 0);
        assert_eq!(sel.pump(), 0);
        assert_eq!(sel.enable_drawing(), DrawOutcome::Ignored);
    }

    #[test]
    fn closed_selector_ignores_new_points() {
        let (mut sel, _map) = open();
        let view = sel.view();
        let before = view.clusters().unwrap();
        assert!(sel.close());

        let report = sel.set_points(vec![GeoPoint::new(ListingId::Num(1), 55.7, 37.6)]);
        assert_eq!(report.accepted, 0);
        assert!(sel.index().is_empty());

        let after = view.clusters().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.total_points(), 0);
    }

    fn tap_count_after_close(probe: &HeadlessProbe) -> usize {
        probe.emit(MapEvent::Pointer(PointerEvent::down(LatLng::new(1.0, 1.0))))
    }

    #[test]
    fn panning_keeps_the_published_clusters() {
        let (mut sel, probe) = open();
        let view = sel.view();
        sel.set_points(listings());
        let before = view.clusters().unwrap();
        assert_eq!(before.total_points(), 3);

        probe.emit(MapEvent::ViewportChanged(Viewport::new(LatLng::new(1.0, 1.0), 10.0)));
        probe.emit(MapEvent::ViewportChanged(Viewport::new(LatLng::new(2.0, 2.5), 10.7)));
        sel.pump();
        assert!(Arc::ptr_eq(&before, &view.clusters().unwrap()));

        probe.emit(MapEvent::ViewportChanged(Viewport::new(LatLng::new(2.0, 2.5), 3.0)));
        sel.pump();
        let after = view.clusters().unwrap();
        assert_eq!(after.zoom_level, 3);
        assert!(after.generation > before.generation);
    }

    #[test]
    fn replacing_points_clears_the_selection() {
        let (mut sel, probe) = open();
        sel.set_points(listings());
        sel.enable_drawing();
        for (lat, lng) in [(0.0, 0.0), (0.0, 2.0), (2.0, 2.0)] {
            tap(&probe, lat, lng);
        }
        sel.pump();
        sel.finish_drawing();
        sel.run_until_idle();
        assert!(sel.selection().is_some());

        sel.set_points(listings());
        assert!(sel.selection().is_none());
    }

    #[test]
    fn a_newer_region_supersedes_the_running_one() {
        let (mut sel, probe) = open();
        sel.set_points(listings());
        for square in [2.0, 4.0] {
            sel.enable_drawing();
            for (lat, lng) in [(0.0, 0.0), (0.0, square), (square, square), (square, 0.0)] {
                tap(&probe, lat, lng);
            }
            sel.pump();
            sel.finish_drawing();
        }
        assert_eq!(sel.run_until_idle(), 1);
        let result = sel.selection().unwrap();
        assert_eq!(result.generation, 2);
        assert_eq!(result.included_ids, ids(&[1, 2, 3]));
        assert_eq!(sel.metrics().counter(metric::ABANDONED), 1);
    }

    #[tokio::test]
    async fn opens_through_the_loader() {
        let loader = MapEngineLoader::new(HeadlessEngine::new());
        let handle = loader.ensure_loaded("key").await.unwrap();
        let sel =
            RegionSelector::open(&handle, ContainerRef::new("map"), SelectorConfig::default())
                .unwrap();
        assert!(sel.is_open());
        assert_eq!(sel.clusters().unwrap().total_points(), 0);
    }
}
