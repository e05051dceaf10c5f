use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use runtime::event_queue::EventQueue;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::loader::EngineHandle;
use crate::native::{
    ContainerRef, EventKind, EventSink, ListenerId, MapEvent, MapOptions, NativeMap, Viewport,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One native map bound to one container.
///
/// The session registers exactly one listener per [`EventKind`] and owns the
/// inbox those listeners write into. Closing unregisters every listener,
/// destroys the native instance and drops the inbox, so late native callbacks
/// become no-ops.
pub struct MapSession {
    id: u64,
    container: ContainerRef,
    options: MapOptions,
    native: Option<Box<dyn NativeMap>>,
    listeners: Vec<ListenerId>,
    inbox: Option<Arc<Mutex<EventQueue<MapEvent>>>>,
}

impl MapSession {
    pub fn open(
        engine: &EngineHandle,
        container: ContainerRef,
        options: MapOptions,
    ) -> Result<Self, EngineError> {
        let mut native = engine.engine().create_map(&container, &options)?;
        let inbox = Arc::new(Mutex::new(EventQueue::new()));

        let listeners = EventKind::ALL
            .into_iter()
            .map(|kind| native.listen(kind, EventSink::new(kind, Arc::downgrade(&inbox))))
            .collect();

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            session = id,
            container = container.as_str(),
            engine = engine.engine().name(),
            "map session opened"
        );

        Ok(Self {
            id,
            container,
            options,
            native: Some(native),
            listeners,
            inbox: Some(inbox),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn container(&self) -> &ContainerRef {
        &self.container
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.native.is_some()
    }

    /// Number of native listeners this session currently holds.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn pending_events(&self) -> usize {
        self.inbox.as_ref().map_or(0, |inbox| inbox.lock().len())
    }

    /// Takes every queued event in the order the engine emitted it.
    ///
    /// Viewport zooms are clamped to the session's zoom limits. A closed
    /// session yields nothing.
    pub fn drain_events(&mut self) -> Vec<MapEvent> {
        let Some(inbox) = self.inbox.as_ref() else {
            return Vec::new();
        };
        let drained = inbox.lock().drain();
        drained
            .into_iter()
            .map(|event| match event {
                MapEvent::ViewportChanged(v) => MapEvent::ViewportChanged(Viewport::new(
                    v.center,
                    self.options.clamp_zoom(v.zoom),
                )),
                other => other,
            })
            .collect()
    }

    pub fn set_panning_enabled(&mut self, enabled: bool) -> Result<(), EngineError> {
        let native = self.native.as_mut().ok_or(EngineError::SessionClosed)?;
        native.set_panning_enabled(enabled);
        Ok(())
    }

    /// Tears the session down. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        let Some(mut native) = self.native.take() else {
            return false;
        };
        for id in self.listeners.drain(..) {
            if !native.unlisten(id) {
                debug!(session = self.id, listener = id.0, "listener already gone");
            }
        }
        native.destroy();

        let dropped = self.inbox.take().map_or(0, |inbox| inbox.lock().clear());
        info!(session = self.id, dropped_events = dropped, "map session closed");
        true
    }
}

impl Drop for MapSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapSession")
            .field("id", &self.id)
            .field("container", &self.container)
            .field("open", &self.is_open())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
