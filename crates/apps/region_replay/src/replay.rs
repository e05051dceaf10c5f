//! Drives a [`RegionSelector`] on a headless map from a recorded trace.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use engine::headless::HeadlessEngine;
use engine::loader::MapEngineLoader;
use engine::native::ContainerRef;
use foundation::geo::GeoPoint;
use layers::cluster::ClusterSnapshot;
use layers::points::{listings_from_records, IngestReport};
use selection::drawing::DrawingSession;
use selection::result::SelectionResult;
use selection::selector::{RegionSelector, SelectorConfig};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::trace::TraceStep;

pub const CONTAINER_ID: &str = "region-replay";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub generation: u64,
    pub zoom_level: u8,
    pub preset: String,
    pub cells: usize,
    pub clusters: usize,
    pub points: usize,
}

impl From<&ClusterSnapshot> for ClusterSummary {
    fn from(s: &ClusterSnapshot) -> Self {
        Self {
            generation: s.generation,
            zoom_level: s.zoom_level,
            preset: s.preset.clone(),
            cells: s.cells.len(),
            clusters: s.cells.iter().filter(|c| s.is_cluster(c)).count(),
            points: s.total_points(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub engine: String,
    pub ingest: IngestReport,
    pub steps: usize,
    pub events: usize,
    pub frames: u32,
    pub clusters: Option<ClusterSummary>,
    pub drawing: DrawingSession,
    pub selection: Option<SelectionResult>,
    pub counters: BTreeMap<String, u64>,
}

/// Listing records must be a JSON array.
pub fn load_listings(records: &Value) -> anyhow::Result<(Vec<GeoPoint>, IngestReport)> {
    let Some(items) = records.as_array() else {
        bail!("listings must be a JSON array");
    };
    Ok(listings_from_records(items))
}

pub async fn replay(
    loader: &MapEngineLoader,
    headless: &HeadlessEngine,
    api_key: &str,
    config: SelectorConfig,
    points: Vec<GeoPoint>,
    steps: &[TraceStep],
) -> anyhow::Result<ReplayReport> {
    let handle = loader
        .ensure_loaded(api_key)
        .await
        .context("loading map engine")?;
    let mut budget = config.frame_budget();
    let mut selector = RegionSelector::open(&handle, ContainerRef::new(CONTAINER_ID), config)
        .context("opening map session")?;
    let probe = headless
        .last_probe()
        .context("headless engine created no map")?;

    let mut ingest = selector.set_points(points.clone());
    let mut events = 0;
    let mut frames = 0;

    for (i, step) in steps.iter().enumerate() {
        debug!(step = i, ?step, "replay step");
        if let Some(event) = step.map_event() {
            probe.emit(event);
            events += selector.pump();
            continue;
        }
        match step {
            TraceStep::Enable => {
                selector.enable_drawing();
            }
            TraceStep::Disable => {
                selector.disable_drawing();
            }
            TraceStep::Restart => {
                selector.restart_drawing();
            }
            TraceStep::Finish => {
                selector.finish_drawing();
            }
            TraceStep::Mode { mode } => selector.set_input_mode(*mode),
            TraceStep::Frame => {
                budget.refill();
                if selector.is_computing() {
                    selector.run_frame(&mut budget);
                    frames += 1;
                }
            }
            TraceStep::Reload => ingest = selector.set_points(points.clone()),
            TraceStep::Close => {
                selector.close();
            }
            TraceStep::Viewport { .. }
            | TraceStep::Pointer { .. }
            | TraceStep::DoubleClick { .. } => {}
        }
    }
    frames += selector.run_until_idle();

    let counters = selector
        .metrics()
        .snapshot()
        .counters
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let report = ReplayReport {
        engine: handle.engine().name().to_string(),
        ingest,
        steps: steps.len(),
        events,
        frames,
        clusters: selector.clusters().as_deref().map(ClusterSummary::from),
        drawing: selector.drawing().session(),
        selection: selector.selection().as_deref().cloned(),
        counters,
    };
    info!(
        steps = report.steps,
        events = report.events,
        frames = report.frames,
        selected = report.selection.as_ref().map_or(0, SelectionResult::len),
        "replay finished"
    );
    selector.close();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use engine::headless::HeadlessEngine;
    use engine::loader::MapEngineLoader;
    use foundation::ids::ListingId;
    use pretty_assertions::assert_eq;
    use selection::drawing::DrawingState;
    use selection::selector::SelectorConfig;
    use serde_json::json;

    use super::{load_listings, replay};
    use crate::trace::parse_trace;

    fn records() -> serde_json::Value {
        json!([
            {"id": 1, "lat": 1.0, "lng": 1.0, "title": "loft"},
            {"id": "2", "lat": "3.0", "lng": "3.0"},
            {"id": 3, "location": {"latitude": 0.5, "longitude": 1.5}},
            {"id": 4, "lat": null, "lng": 1.0},
            {"id": 5, "lat": 0, "lng": 0},
            {"lat": 1.0, "lng": 1.0}
        ])
    }

    #[tokio::test]
    async fn replays_a_square_selection() {
        let headless = HeadlessEngine::new();
        let loader = MapEngineLoader::new(headless.clone());
        let (points, extracted) = load_listings(&records()).unwrap();
        assert_eq!(extracted.missing_ids, 1);

        let trace = parse_trace(
            r#"[
                {"type": "viewport", "lat": 1.0, "lng": 1.0, "zoom": 12},
                {"type": "enable"},
                {"type": "pointer", "phase": "down", "lat": 0.0, "lng": 0.0},
                {"type": "pointer", "phase": "down", "lat": 0.0, "lng": 2.0},
                {"type": "pointer", "phase": "down", "lat": 2.0, "lng": 2.0},
                {"type": "pointer", "phase": "down", "lat": 2.0, "lng": 0.0},
                {"type": "double_click", "lat": 2.0, "lng": 0.0}
            ]"#,
        )
        .unwrap();

        let report = replay(&loader, &headless, "k", SelectorConfig::default(), points, &trace)
            .await
            .unwrap();

        assert_eq!(report.engine, "headless");
        assert_eq!(report.ingest.accepted, 3);
        assert_eq!(report.ingest.invalid_coordinates, 2);
        assert_eq!(report.events, 6);
        assert_eq!(report.frames, 1);
        assert_eq!(report.drawing.state, DrawingState::Idle);
        let selection = report.selection.unwrap();
        assert_eq!(
            selection.included_ids.into_iter().collect::<Vec<_>>(),
            vec![ListingId::Num(1), ListingId::Num(3)]
        );
        assert_eq!(report.clusters.unwrap().zoom_level, 12);
        assert!(headless.last_probe().unwrap().is_destroyed());
    }

    #[tokio::test]
    async fn closing_mid_computation_publishes_nothing() {
        let headless = HeadlessEngine::new();
        let loader = MapEngineLoader::new(headless.clone());
        let (points, _) = load_listings(&records()).unwrap();
        let trace = parse_trace(
            r#"[
                {"type": "enable"},
                {"type": "pointer", "phase": "down", "lat": 0.0, "lng": 0.0},
                {"type": "pointer", "phase": "down", "lat": 0.0, "lng": 2.0},
                {"type": "pointer", "phase": "down", "lat": 2.0, "lng": 2.0},
                {"type": "finish"},
                {"type": "close"}
            ]"#,
        )
        .unwrap();
        let report = replay(&loader, &headless, "k", SelectorConfig::default(), points, &trace)
            .await
            .unwrap();
        assert!(report.selection.is_none());
        assert_eq!(report.frames, 0);
        assert_eq!(report.counters.get("containment.abandoned"), Some(&1));
    }

    #[tokio::test]
    async fn empty_api_key_fails_to_load() {
        let headless = HeadlessEngine::new();
        let loader = MapEngineLoader::new(headless.clone());
        let err = replay(&loader, &headless, "", SelectorConfig::default(), Vec::new(), &[])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("api key"));
    }

    #[test]
    fn listings_must_be_an_array() {
        assert!(load_listings(&json!({"id": 1})).is_err());
    }
}
