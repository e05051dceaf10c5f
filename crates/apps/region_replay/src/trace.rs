//! Recorded interaction traces.
//!
//! A trace is a JSON array of steps, e.g.
//! `[{"type":"enable"},{"type":"pointer","phase":"down","lat":1,"lng":1}]`.

use engine::native::{MapEvent, PointerEvent, PointerPhase, Viewport};
use foundation::geo::LatLng;
use selection::drawing::InputMode;
use serde::Deserialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Down,
    Move,
    Up,
}

impl From<Phase> for PointerPhase {
    fn from(p: Phase) -> Self {
        match p {
            Phase::Down => PointerPhase::Down,
            Phase::Move => PointerPhase::Move,
            Phase::Up => PointerPhase::Up,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceStep {
    Viewport { lat: f64, lng: f64, zoom: f64 },
    Pointer { phase: Phase, lat: f64, lng: f64 },
    DoubleClick { lat: f64, lng: f64 },
    Enable,
    Disable,
    Restart,
    Finish,
    Mode { mode: InputMode },
    /// Runs one containment frame.
    Frame,
    /// Replaces the listings with the ones in the listings file again.
    Reload,
    Close,
}

impl TraceStep {
    /// The native event this step stands for, if it is one.
    pub fn map_event(&self) -> Option<MapEvent> {
        match *self {
            TraceStep::Viewport { lat, lng, zoom } => {
                Some(MapEvent::ViewportChanged(Viewport::new(LatLng::new(lat, lng), zoom)))
            }
            TraceStep::Pointer { phase, lat, lng } => Some(MapEvent::Pointer(PointerEvent {
                phase: phase.into(),
                at: LatLng::new(lat, lng),
            })),
            TraceStep::DoubleClick { lat, lng } => {
                Some(MapEvent::DoubleClick(LatLng::new(lat, lng)))
            }
            _ => None,
        }
    }
}

pub fn parse_trace(json: &str) -> serde_json::Result<Vec<TraceStep>> {
    serde_json::from_str(json)
}
