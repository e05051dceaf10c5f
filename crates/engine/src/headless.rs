//! In-process map engine with no rendering.
//!
//! Used to replay recorded interaction traces and to drive sessions in
//! tests. Each created map exposes a [`HeadlessProbe`] that plays the part of
//! the SDK's event dispatcher.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::EngineError;
use crate::loader::{EngineHandle, LoadResult, ScriptSource};
use crate::native::{
    ContainerRef, EventKind, EventSink, ListenerId, MapEngine, MapEvent, MapOptions, NativeMap,
};

#[derive(Debug)]
struct MapState {
    container: ContainerRef,
    listeners: BTreeMap<ListenerId, EventSink>,
    next_listener: u64,
    panning_enabled: bool,
    destroyed: bool,
    destroy_calls: u32,
    unlisten_calls: u32,
}

#[derive(Debug, Clone, Default)]
pub struct HeadlessEngine {
    maps: Arc<Mutex<Vec<Arc<Mutex<MapState>>>>>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_count(&self) -> usize {
        self.maps.lock().len()
    }

    /// Probe for the `index`-th map created by this engine.
    pub fn probe(&self, index: usize) -> Option<HeadlessProbe> {
        self.maps.lock().get(index).cloned().map(HeadlessProbe)
    }

    pub fn last_probe(&self) -> Option<HeadlessProbe> {
        self.maps.lock().last().cloned().map(HeadlessProbe)
    }
}

impl MapEngine for HeadlessEngine {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_map(
        &self,
        container: &ContainerRef,
        _options: &MapOptions,
    ) -> Result<Box<dyn NativeMap>, EngineError> {
        if container.as_str().is_empty() {
            return Err(EngineError::MapCreation("empty container id".to_string()));
        }
        let state = Arc::new(Mutex::new(MapState {
            container: container.clone(),
            listeners: BTreeMap::new(),
            next_listener: 1,
            panning_enabled: true,
            destroyed: false,
            destroy_calls: 0,
            unlisten_calls: 0,
        }));
        self.maps.lock().push(Arc::clone(&state));
        Ok(Box::new(HeadlessMap { state }))
    }
}

/// Loading a headless engine never touches the network.
impl ScriptSource for HeadlessEngine {
    fn fetch(&self, _api_key: &str) -> BoxFuture<'static, LoadResult> {
        future::ready(Ok(EngineHandle::new(self.clone()))).boxed()
    }
}

struct HeadlessMap {
    state: Arc<Mutex<MapState>>,
}

impl NativeMap for HeadlessMap {
    fn listen(&mut self, kind: EventKind, sink: EventSink) -> ListenerId {
        let mut s = self.state.lock();
        let id = ListenerId(s.next_listener);
        s.next_listener += 1;
        debug_assert_eq!(sink.kind(), kind);
        s.listeners.insert(id, sink);
        id
    }

    fn unlisten(&mut self, id: ListenerId) -> bool {
        let mut s = self.state.lock();
        s.unlisten_calls += 1;
        s.listeners.remove(&id).is_some()
    }

    fn set_panning_enabled(&mut self, enabled: bool) {
        self.state.lock().panning_enabled = enabled;
    }

    fn destroy(&mut self) {
        let mut s = self.state.lock();
        s.destroy_calls += 1;
        s.destroyed = true;
        s.listeners.clear();
    }
}

/// Test/replay handle onto one headless map.
#[derive(Debug, Clone)]
pub struct HeadlessProbe(Arc<Mutex<MapState>>);

impl HeadlessProbe {
    /// Dispatches `event` to every listener registered for its stream and
    /// returns how many accepted it.
    pub fn emit(&self, event: MapEvent) -> usize {
        let sinks = self.sinks_for(event.kind());
        let delivered = sinks.iter().filter(|sink| sink.emit(event)).count();
        trace!(?event, delivered, "headless dispatch");
        delivered
    }

    pub fn container(&self) -> ContainerRef {
        self.0.lock().container.clone()
    }

    pub fn sinks(&self) -> Vec<EventSink> {
        self.0.lock().listeners.values().cloned().collect()
    }

    pub fn active_listeners(&self) -> usize {
        self.0.lock().listeners.len()
    }

    pub fn panning_enabled(&self) -> bool {
        self.0.lock().panning_enabled
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.lock().destroyed
    }

    pub fn destroy_calls(&self) -> u32 {
        self.0.lock().destroy_calls
    }

    pub fn unlisten_calls(&self) -> u32 {
        self.0.lock().unlisten_calls
    }

    fn sinks_for(&self, kind: EventKind) -> Vec<EventSink> {
        // Collect first so sinks are not invoked under the map lock.
        self.0
            .lock()
            .listeners
            .values()
            .filter(|s| s.kind() == kind)
            .cloned()
            .collect()
    }
}
