//! Debounced input monitor with press/release callbacks
//!
//! The monitor owns a watcher thread that samples its [`DigitalLine`],
//! runs the samples through a [`Debouncer`] and, on each settled edge,
//! invokes every callback registered for that edge. The callback sets are
//! guarded by one mutex, so registration never races a firing set.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::debounce::{Debouncer, Edge};
use super::line::DigitalLine;
use crate::config::InputConfig;
use crate::lifecycle::CancelToken;

/// Errors that can occur while monitoring an input line
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("gpio line {line}: {source}")]
    Io {
        line: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("gpio line {line} reported unexpected level {value:?}")]
    InvalidLevel { line: u32, value: String },

    #[error("failed to spawn input watcher thread: {0}")]
    ThreadSpawn(String),
}

/// Stable identity of a registered callback
///
/// Callbacks are keyed by identity rather than by value, so the owner can
/// unregister a closure without holding on to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    /// Allocate a process-unique identity
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

/// Per-line sampling parameters
#[derive(Debug, Clone, Copy)]
pub struct InputSettings {
    pub debounce: Duration,
    pub active_low: bool,
    pub sample_period: Duration,
}

impl From<&InputConfig> for InputSettings {
    fn from(config: &InputConfig) -> Self {
        Self {
            debounce: config.debounce(),
            active_low: config.active_low,
            sample_period: config.sample_period(),
        }
    }
}

type Callback = Box<dyn Fn() + Send>;

#[derive(Default)]
struct Callbacks {
    press: HashMap<CallbackId, Callback>,
    release: HashMap<CallbackId, Callback>,
}

impl Callbacks {
    fn for_edge(&mut self, edge: Edge) -> &mut HashMap<CallbackId, Callback> {
        match edge {
            Edge::Press => &mut self.press,
            Edge::Release => &mut self.release,
        }
    }
}

struct Shared {
    name: String,
    active: AtomicBool,
    callbacks: Mutex<Callbacks>,
}

impl Shared {
    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run every callback for `edge`, isolating panics per callback
    fn fire(&self, edge: Edge) {
        let mut callbacks = self.callbacks();
        for (id, callback) in callbacks.for_edge(edge).iter() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                error!(
                    input = %self.name,
                    callback = %id,
                    ?edge,
                    "input callback panicked; continuing with remaining callbacks"
                );
            }
        }
    }
}

/// Debounced monitor for one physical input
pub struct InputMonitor {
    shared: Arc<Shared>,
    stop: CancelToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InputMonitor {
    /// Start monitoring `line`
    ///
    /// The initial level is read synchronously so [`sample`](Self::sample)
    /// is meaningful as soon as this returns.
    pub fn start(
        name: impl Into<String>,
        mut line: impl DigitalLine,
        settings: InputSettings,
    ) -> Result<Self, InputError> {
        let name = name.into();
        let initial = line.read()? != settings.active_low;

        let shared = Arc::new(Shared {
            name: name.clone(),
            active: AtomicBool::new(initial),
            callbacks: Mutex::new(Callbacks::default()),
        });
        let stop = CancelToken::new();

        let worker = {
            let shared = Arc::clone(&shared);
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("input-{}", name))
                .spawn(move || watch(line, settings, shared, stop))
                .map_err(|e| InputError::ThreadSpawn(e.to_string()))?
        };

        info!(input = %name, active = initial, "input monitor started");

        Ok(Self {
            shared,
            stop,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Debounced "currently active" state
    pub fn sample(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Register a press callback; returns `false` if `id` was already present
    ///
    /// Callbacks run on the watcher thread while the callback lock is held,
    /// so they must not register or unregister callbacks themselves.
    pub fn register_press<F>(&self, id: CallbackId, action: F) -> bool
    where
        F: Fn() + Send + 'static,
    {
        self.register(Edge::Press, id, Box::new(action))
    }

    /// Register a release callback; returns `false` if `id` was already present
    pub fn register_release<F>(&self, id: CallbackId, action: F) -> bool
    where
        F: Fn() + Send + 'static,
    {
        self.register(Edge::Release, id, Box::new(action))
    }

    /// Remove a press callback; a no-op if `id` is absent
    pub fn unregister_press(&self, id: CallbackId) -> bool {
        self.shared.callbacks().press.remove(&id).is_some()
    }

    /// Remove a release callback; a no-op if `id` is absent
    pub fn unregister_release(&self, id: CallbackId) -> bool {
        self.shared.callbacks().release.remove(&id).is_some()
    }

    /// Stop the watcher thread and wait for it
    pub fn stop(&self) {
        self.stop.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!(input = %self.name(), "input watcher thread panicked");
            }
        }
    }

    fn register(&self, edge: Edge, id: CallbackId, action: Callback) -> bool {
        let mut callbacks = self.shared.callbacks();
        let set = callbacks.for_edge(edge);
        if set.contains_key(&id) {
            return false;
        }
        set.insert(id, action);
        debug!(input = %self.name(), callback = %id, ?edge, "callback registered");
        true
    }
}

impl Drop for InputMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch(mut line: impl DigitalLine, settings: InputSettings, shared: Arc<Shared>, stop: CancelToken) {
    let mut debouncer = Debouncer::new(
        shared.active.load(Ordering::SeqCst),
        settings.debounce,
        Instant::now(),
    );
    let mut failing = false;

    while !stop.wait_timeout(settings.sample_period) {
        let level = match line.read() {
            Ok(raw) => {
                if failing {
                    info!(input = %shared.name, "input line readable again");
                    failing = false;
                }
                raw != settings.active_low
            }
            Err(e) => {
                if !failing {
                    warn!(input = %shared.name, error = %e, "failed to read input line");
                    failing = true;
                }
                continue;
            }
        };

        if let Some(edge) = debouncer.update(level, Instant::now()) {
            shared.active.store(debouncer.state(), Ordering::SeqCst);
            debug!(input = %shared.name, ?edge, "input edge");
            shared.fire(edge);
        }
    }

    debug!(input = %shared.name, "input watcher stopped");
}
