//! Boundary to the external mapping SDK.
//!
//! Everything the core needs from a concrete map engine is expressed by two
//! traits: [`MapEngine`] creates native map instances, [`NativeMap`] is one
//! such instance. Native callbacks are delivered back to the owning session
//! through an [`EventSink`].

use std::sync::Weak;

use foundation::geo::LatLng;
use parking_lot::Mutex;
use runtime::event_queue::EventQueue;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Host element a map is rendered into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef(String);

impl ContainerRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Initial camera and zoom limits for a new map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    pub center: LatLng,
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            center: LatLng::new(55.7558, 37.6173),
            zoom: 10.0,
            min_zoom: 0.0,
            max_zoom: 19.0,
        }
    }
}

impl MapOptions {
    pub fn clamp_zoom(&self, zoom: f64) -> f64 {
        if !zoom.is_finite() {
            return self.min_zoom;
        }
        zoom.clamp(self.min_zoom, self.max_zoom)
    }
}

/// The three event streams a session subscribes to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Viewport,
    Pointer,
    DoubleClick,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::Viewport,
        EventKind::Pointer,
        EventKind::DoubleClick,
    ];
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub at: LatLng,
}

impl PointerEvent {
    pub fn down(at: LatLng) -> Self {
        Self {
            phase: PointerPhase::Down,
            at,
        }
    }

    pub fn moved(at: LatLng) -> Self {
        Self {
            phase: PointerPhase::Move,
            at,
        }
    }

    pub fn up(at: LatLng) -> Self {
        Self {
            phase: PointerPhase::Up,
            at,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub center: LatLng,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(center: LatLng, zoom: f64) -> Self {
        Self { center, zoom }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum MapEvent {
    ViewportChanged(Viewport),
    Pointer(PointerEvent),
    DoubleClick(LatLng),
}

impl MapEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MapEvent::ViewportChanged(_) => EventKind::Viewport,
            MapEvent::Pointer(_) => EventKind::Pointer,
            MapEvent::DoubleClick(_) => EventKind::DoubleClick,
        }
    }
}

/// A loaded mapping SDK.
pub trait MapEngine: Send + Sync {
    fn name(&self) -> &str;

    fn create_map(
        &self,
        container: &ContainerRef,
        options: &MapOptions,
    ) -> Result<Box<dyn NativeMap>, EngineError>;
}

/// One native map instance owned by a [`crate::MapSession`].
pub trait NativeMap {
    /// Registers `sink` for `kind` events and returns a handle for removal.
    fn listen(&mut self, kind: EventKind, sink: EventSink) -> ListenerId;

    /// Returns `false` if `id` was not registered.
    fn unlisten(&mut self, id: ListenerId) -> bool;

    /// Drag-to-pan must be off while the user draws a region.
    fn set_panning_enabled(&mut self, enabled: bool);

    fn destroy(&mut self);
}

/// Delivery handle given to a native listener.
///
/// Holds only a weak reference to the session inbox: once the session is
/// closed every emit is silently dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    kind: EventKind,
    inbox: Weak<Mutex<EventQueue<MapEvent>>>,
}

impl EventSink {
    pub(crate) fn new(kind: EventKind, inbox: Weak<Mutex<EventQueue<MapEvent>>>) -> Self {
        Self { kind, inbox }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Queues `event` on the owning session.
    ///
    /// Returns `false` when the session is gone or the event belongs to a
    /// different stream than this sink was registered for.
    pub fn emit(&self, event: MapEvent) -> bool {
        if event.kind() != self.kind {
            return false;
        }
        let Some(inbox) = self.inbox.upgrade() else {
            return false;
        };
        inbox.lock().push(event);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.strong_count() == 0
    }
}
