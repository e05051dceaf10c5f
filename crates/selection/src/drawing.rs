//! Region drawing state machine.
//!
//! `Idle -> Drawing` on enable; vertices accumulate while drawing; a double
//! click or explicit finish with enough vertices hands a [`Polygon`] off and
//! returns to `Idle`. Disable and restart always discard the buffer.

use engine::native::{PointerEvent, PointerPhase};
use foundation::geo::LatLng;
use foundation::math::haversine_m;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DrawError;
use crate::polygon::{MIN_POLYGON_VERTICES, Polygon};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Every pointer press adds one vertex.
    #[default]
    Click,
    /// Press starts a stroke; moves while pressed add vertices.
    Freehand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingOptions {
    pub input_mode: InputMode,
    /// Freehand moves closer than this to the previous vertex are skipped.
    pub min_vertex_spacing_m: f64,
    pub max_vertices: usize,
}

impl Default for DrawingOptions {
    fn default() -> Self {
        Self {
            input_mode: InputMode::Click,
            min_vertex_spacing_m: 5.0,
            max_vertices: 2_000,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawingState {
    Idle,
    Drawing,
    /// Only ever seen inside [`DrawOutcome::Finalized`]; the controller is
    /// back in `Idle` by the time `handle` returns.
    Finalized,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DrawCommand {
    Enable,
    Disable,
    Restart,
    Finish,
    Pointer(PointerEvent),
    DoubleClick(LatLng),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOutcome {
    Ignored,
    /// Drawing began; `discarded` vertices of a previous buffer were dropped.
    Started { discarded: usize },
    VertexAdded { count: usize },
    /// Drawing ended without a region.
    Discarded { vertices: usize },
    Finalized(Polygon),
    Rejected(DrawError),
}

/// Read-only view of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawingSession {
    pub state: DrawingState,
    pub vertices: Vec<LatLng>,
    pub input_mode: InputMode,
}

#[derive(Debug)]
pub struct DrawingController {
    options: DrawingOptions,
    state: DrawingState,
    vertices: Vec<LatLng>,
    stroke_active: bool,
    finalized: u64,
}

impl Default for DrawingController {
    fn default() -> Self {
        Self::new(DrawingOptions::default())
    }
}

impl DrawingController {
    pub fn new(options: DrawingOptions) -> Self {
        Self {
            options,
            state: DrawingState::Idle,
            vertices: Vec::new(),
            stroke_active: false,
            finalized: 0,
        }
    }

    pub fn options(&self) -> &DrawingOptions {
        &self.options
    }

    pub fn state(&self) -> DrawingState {
        self.state
    }

    pub fn is_drawing(&self) -> bool {
        self.state == DrawingState::Drawing
    }

    pub fn vertices(&self) -> &[LatLng] {
        &self.vertices
    }

    pub fn input_mode(&self) -> InputMode {
        self.options.input_mode
    }

    /// Takes effect for the next pointer event; an open freehand stroke ends.
    pub fn set_input_mode(&mut self, mode: InputMode) {
        self.options.input_mode = mode;
        self.stroke_active = false;
    }

    /// Number of regions handed off so far.
    pub fn finalized_count(&self) -> u64 {
        self.finalized
    }

    pub fn session(&self) -> DrawingSession {
        DrawingSession {
            state: self.state,
            vertices: self.vertices.clone(),
            input_mode: self.options.input_mode,
        }
    }

    pub fn handle(&mut self, cmd: DrawCommand) -> DrawOutcome {
        match cmd {
            DrawCommand::Enable => self.start(),
            DrawCommand::Disable | DrawCommand::Restart => self.discard(),
            DrawCommand::Finish => {
                if !self.is_drawing() {
                    debug!("finish requested while not drawing");
                    return DrawOutcome::Rejected(DrawError::NotDrawing);
                }
                self.finalize()
            }
            DrawCommand::DoubleClick(_) if self.is_drawing() => self.finalize(),
            DrawCommand::DoubleClick(_) => DrawOutcome::Ignored,
            DrawCommand::Pointer(ev) => self.pointer(ev),
        }
    }

    fn start(&mut self) -> DrawOutcome {
        let discarded = self.vertices.len();
        self.vertices.clear();
        self.stroke_active = false;
        self.state = DrawingState::Drawing;
        debug!(discarded, mode = ?self.options.input_mode, "drawing started");
        DrawOutcome::Started { discarded }
    }

    fn discard(&mut self) -> DrawOutcome {
        if !self.is_drawing() {
            return DrawOutcome::Ignored;
        }
        let vertices = self.vertices.len();
        self.vertices.clear();
        self.stroke_active = false;
        self.state = DrawingState::Idle;
        debug!(vertices, "drawing discarded");
        DrawOutcome::Discarded { vertices }
    }

    fn finalize(&mut self) -> DrawOutcome {
        let have = self.vertices.len();
        if have < MIN_POLYGON_VERTICES {
            warn!(have, need = MIN_POLYGON_VERTICES, "region needs more vertices");
            return DrawOutcome::Rejected(DrawError::InsufficientVertices {
                have,
                need: MIN_POLYGON_VERTICES,
            });
        }
        let polygon = match Polygon::new(std::mem::take(&mut self.vertices)) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "region rejected");
                self.state = DrawingState::Idle;
                self.stroke_active = false;
                return DrawOutcome::Rejected(e);
            }
        };
        self.state = DrawingState::Idle;
        self.stroke_active = false;
        self.finalized += 1;
        info!(vertices = polygon.len(), finalized = self.finalized, "region finalized");
        DrawOutcome::Finalized(polygon)
    }

    fn pointer(&mut self, ev: PointerEvent) -> DrawOutcome {
        if !self.is_drawing() || !ev.at.is_finite() {
            return DrawOutcome::Ignored;
        }
        match (self.options.input_mode, ev.phase) {
            (InputMode::Click, PointerPhase::Down) => self.push(ev.at, 0.0),
            (InputMode::Click, _) => DrawOutcome::Ignored,
            (InputMode::Freehand, PointerPhase::Down) => {
                self.stroke_active = true;
                self.push(ev.at, 0.0)
            }
            (InputMode::Freehand, PointerPhase::Move) if self.stroke_active => {
                self.push(ev.at, self.options.min_vertex_spacing_m)
            }
            (InputMode::Freehand, PointerPhase::Move) => DrawOutcome::Ignored,
            (InputMode::Freehand, PointerPhase::Up) => {
                self.stroke_active = false;
                DrawOutcome::Ignored
            }
        }
    }

    fn push(&mut self, at: LatLng, min_spacing_m: f64) -> DrawOutcome {
        if let Some(&last) = self.vertices.last() {
            if last == at {
                return DrawOutcome::Ignored;
            }
            if min_spacing_m > 0.0 && haversine_m(last, at) < min_spacing_m {
                return DrawOutcome::Ignored;
            }
        }
        if self.vertices.len() >= self.options.max_vertices {
            return DrawOutcome::Rejected(DrawError::TooManyVertices {
                max: self.options.max_vertices,
            });
        }
        self.vertices.push(at);
        DrawOutcome::VertexAdded {
            count: self.vertices.len(),
        }
    }
}
