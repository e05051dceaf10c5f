//! Single-flight loader for the external mapping SDK.
//!
//! The SDK is process-wide state: it must be fetched at most once, no matter
//! how many map views ask for it at the same time.
//!
//! ```text
//! view A ─┐
//!         │                          ScriptSource
//! view B ─┼──► MapEngineLoader ──► fetch (once)
//!         │         │                    │
//! view C ─┘         ▼                    ▼
//!            [A, B, C await the same Shared future]
//! ```
//!
//! A failed load is delivered to every waiter, then the loader returns to
//! idle so the next call starts a fresh attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::native::MapEngine;

pub type LoadResult = Result<EngineHandle, EngineError>;

type InFlight = Shared<BoxFuture<'static, LoadResult>>;

/// Cloneable handle to a loaded map engine.
#[derive(Clone)]
pub struct EngineHandle(Arc<dyn MapEngine>);

impl EngineHandle {
    pub fn new(engine: impl MapEngine + 'static) -> Self {
        Self(Arc::new(engine))
    }

    pub fn from_arc(engine: Arc<dyn MapEngine>) -> Self {
        Self(engine)
    }

    pub fn engine(&self) -> &dyn MapEngine {
        self.0.as_ref()
    }

    /// Whether both handles point at the same loaded engine.
    pub fn same_engine(&self, other: &EngineHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EngineHandle").field(&self.0.name()).finish()
    }
}

/// Where the SDK actually comes from (script tag, wasm module, test double).
pub trait ScriptSource: Send + Sync {
    /// Starts one load. Called at most once per in-flight attempt.
    fn fetch(&self, api_key: &str) -> BoxFuture<'static, LoadResult>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderStatus {
    Idle,
    Loading,
    Ready,
    /// Last attempt failed; stays here until the next `ensure_loaded`.
    Failed(EngineError),
}

enum LoadState {
    Idle {
        last_error: Option<EngineError>,
    },
    Loading {
        attempt: u64,
        api_key: String,
        future: InFlight,
    },
    Ready(EngineHandle),
}

pub struct MapEngineLoader {
    source: Arc<dyn ScriptSource>,
    state: Arc<Mutex<LoadState>>,
    fetches: AtomicU64,
}

static GLOBAL: OnceCell<MapEngineLoader> = OnceCell::new();

impl MapEngineLoader {
    pub fn new(source: impl ScriptSource + 'static) -> Self {
        Self::from_arc(Arc::new(source))
    }

    pub fn from_arc(source: Arc<dyn ScriptSource>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(LoadState::Idle { last_error: None })),
            fetches: AtomicU64::new(0),
        }
    }

    /// Installs the process-wide loader. The first installed source wins;
    /// later calls return the existing loader.
    pub fn install_global(source: impl ScriptSource + 'static) -> &'static MapEngineLoader {
        GLOBAL.get_or_init(|| MapEngineLoader::new(source))
    }

    /// Resolves to the loaded engine, starting a load if none is in flight.
    ///
    /// Once loaded the returned future is already complete. Concurrent
    /// callers share one fetch; a key passed while a load is in flight is
    /// ignored in favor of the one that started it.
    pub fn ensure_loaded(&self, api_key: &str) -> BoxFuture<'static, LoadResult> {
        let mut state = self.state.lock();
        match &*state {
            LoadState::Ready(handle) => return future::ready(Ok(handle.clone())).boxed(),
            LoadState::Loading {
                api_key: in_flight_key,
                future,
                ..
            } => {
                if in_flight_key != api_key {
                    warn!("map engine already loading with a different api key");
                }
                debug!("joining in-flight map engine load");
                return future.clone().boxed();
            }
            LoadState::Idle { .. } => {}
        }

        if api_key.trim().is_empty() {
            return future::ready(Err(EngineError::MissingApiKey)).boxed();
        }

        let attempt = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attempt, "loading map engine");

        let fetch = self.source.fetch(api_key);
        let settle_into = Arc::clone(&self.state);
        let in_flight: InFlight = async move {
            let result = fetch.await;
            let mut state = settle_into.lock();
            let current = matches!(&*state, LoadState::Loading { attempt: a, .. } if *a == attempt);
            if current {
                match &result {
                    Ok(handle) => {
                        info!(attempt, engine = handle.engine().name(), "map engine ready");
                        *state = LoadState::Ready(handle.clone());
                    }
                    Err(err) => {
                        warn!(attempt, error = %err, "map engine load failed");
                        *state = LoadState::Idle {
                            last_error: Some(err.clone()),
                        };
                    }
                }
            }
            result
        }
        .boxed()
        .shared();

        *state = LoadState::Loading {
            attempt,
            api_key: api_key.to_string(),
            future: in_flight.clone(),
        };
        in_flight.boxed()
    }

    /// The loaded engine, if loading already finished successfully.
    pub fn get(&self) -> Option<EngineHandle> {
        match &*self.state.lock() {
            LoadState::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> LoaderStatus {
        match &*self.state.lock() {
            LoadState::Idle { last_error: None } => LoaderStatus::Idle,
            LoadState::Idle {
                last_error: Some(err),
            } => LoaderStatus::Failed(err.clone()),
            LoadState::Loading { .. } => LoaderStatus::Loading,
            LoadState::Ready(_) => LoaderStatus::Ready,
        }
    }

    /// Number of underlying fetches started so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}
