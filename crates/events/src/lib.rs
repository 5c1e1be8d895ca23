//! Synchronous publish/subscribe channel between agents.
//!
//! Producers hold an [`EventEmitter`]; the orchestrator owns the
//! [`EventBus`] and registers subscribers on it.  Dispatch runs every
//! subscriber inline, in subscription order, before returning.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, error, info};

use lakeops_core::{Event, EventType, Payload};

const DEFAULT_LOG_CAPACITY: usize = 10_000;

pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Bus ──────────────────────────────────────────────────────────────────────

pub struct EventBus {
    handlers: Mutex<HashMap<EventType, Vec<EventHandler>>>,
    log: Mutex<VecDeque<Event>>,
    capacity: usize,
    dispatched: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EventBus {
    /// A bus retaining at most `capacity` events (`0` = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            log: Mutex::new(VecDeque::new()),
            capacity,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Append `handler` to the subscribers of `event_type`.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.handlers)
            .entry(event_type)
            .or_default()
            .push(Arc::new(handler));
        debug!(event = %event_type, "subscriber added");
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        lock(&self.handlers).get(&event_type).map_or(0, Vec::len)
    }

    /// Log `event`, then hand it to each subscriber in order.
    ///
    /// A subscriber that errors or panics is logged and skipped; the rest
    /// still run and nothing propagates to the caller.  The subscriber list
    /// is copied out first, so handlers may subscribe or dispatch themselves.
    pub fn dispatch(&self, event: Event) {
        {
            let mut log = lock(&self.log);
            if self.capacity > 0 && log.len() >= self.capacity {
                log.pop_front();
            }
            log.push_back(event.clone());
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        info!(event = %event.event_type, source = %event.source_agent, "event dispatched");

        let handlers: Vec<EventHandler> = lock(&self.handlers)
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        for (index, handler) in handlers.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(event = %event.event_type, handler = index, "event handler error: {err:#}");
                }
                Err(_) => {
                    error!(event = %event.event_type, handler = index, "event handler panicked");
                }
            }
        }
    }

    /// Total events dispatched since creation, including evicted ones.
    pub fn dispatched_total(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Retained events, oldest first.
    pub fn log(&self) -> Vec<Event> {
        lock(&self.log).iter().cloned().collect()
    }

    pub fn log_len(&self) -> usize {
        lock(&self.log).len()
    }
}

// ── Emitter ──────────────────────────────────────────────────────────────────

/// Handle an agent and its tool handlers use to publish events.
///
/// Clones share one attachment slot, so handlers can capture an emitter
/// before the agent is registered.  Until [`attach`](Self::attach) is
/// called, `emit` does nothing.
#[derive(Clone)]
pub struct EventEmitter {
    source: Arc<str>,
    bus: Arc<RwLock<Option<Arc<EventBus>>>>,
}

impl EventEmitter {
    pub fn new(source: impl AsRef<str>) -> Self {
        Self {
            source: Arc::from(source.as_ref()),
            bus: Arc::new(RwLock::new(None)),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn attach(&self, bus: Arc<EventBus>) {
        *self.bus.write().unwrap_or_else(PoisonError::into_inner) = Some(bus);
    }

    pub fn is_attached(&self) -> bool {
        self.bus
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn emit(&self, event_type: EventType, data: Payload) {
        let bus = self
            .bus
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match bus {
            Some(bus) => bus.dispatch(Event::new(event_type, self.source.as_ref(), data)),
            None => debug!(event = %event_type, source = %self.source, "emitter detached; event dropped"),
        }
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("source", &self.source)
            .field("attached", &self.is_attached())
            .finish()
    }
}
