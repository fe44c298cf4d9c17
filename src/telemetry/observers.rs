use super::{DispatchEvent, DispatchEventKind, DispatchObserver, TaskState, UsageKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

/// Logs every event at debug level (trace for gauge movements).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn on_event(&self, event: &DispatchEvent) {
        match &event.kind {
            DispatchEventKind::Task { state, delta } => tracing::trace!(
                component = %event.component,
                backend = %event.backend,
                state = state.as_str(),
                delta,
                "task gauge"
            ),
            kind => tracing::debug!(
                component = %event.component,
                backend = %event.backend,
                event = ?kind,
                "dispatch event"
            ),
        }
    }
}

/// Per-backend aggregate of the events seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCounters {
    pub weight: u32,
    pub selections: u64,
    /// Current gauge values.
    pub pending: i64,
    pub processing: i64,
    pub succeeded: u64,
    pub failed: u64,
    pub up: bool,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl BackendCounters {
    fn apply(&mut self, kind: &DispatchEventKind) {
        match kind {
            DispatchEventKind::Registered { weight } => self.weight = *weight,
            DispatchEventKind::Selected => self.selections += 1,
            DispatchEventKind::Task { state, delta } => match state {
                TaskState::Pending => self.pending += delta,
                TaskState::Processing => self.processing += delta,
                TaskState::Succeeded => self.succeeded += delta.unsigned_abs(),
                TaskState::Failed => self.failed += delta.unsigned_abs(),
            },
            DispatchEventKind::Up { up } => self.up = *up,
            DispatchEventKind::Usage { kind, amount } => match kind {
                UsageKind::Prompt => self.prompt_tokens += amount,
                UsageKind::Completion => self.completion_tokens += amount,
            },
        }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    events: VecDeque<DispatchEvent>,
    counters: HashMap<(String, String), BackendCounters>,
}

/// In-memory recorder for testing.
///
/// Keeps the last `max_events` events; counters cover every event ever seen.
#[derive(Debug)]
pub struct InMemoryObserver {
    inner: RwLock<Recorded>,
    max_events: usize,
}

impl InMemoryObserver {
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: RwLock::new(Recorded::default()),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.read().events.iter().cloned().collect()
    }

    pub fn events_for(&self, backend: &str) -> Vec<DispatchEvent> {
        self.read()
            .events
            .iter()
            .filter(|e| e.backend == backend)
            .cloned()
            .collect()
    }

    pub fn counters(&self, component: &str, backend: &str) -> Option<BackendCounters> {
        self.read()
            .counters
            .get(&(component.to_string(), backend.to_string()))
            .cloned()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.events.clear();
        inner.counters.clear();
    }

    pub fn len(&self) -> usize {
        self.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Recorded> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryObserver {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl DispatchObserver for InMemoryObserver {
    fn on_event(&self, event: &DispatchEvent) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .counters
            .entry((event.component.clone(), event.backend.clone()))
            .or_default()
            .apply(&event.kind);
        inner.events.push_back(event.clone());
        if inner.events.len() > self.max_events {
            inner.events.pop_front();
        }
    }
}

/// Fans every event out to several observers, in order.
#[derive(Default, Clone)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl DispatchObserver for CompositeObserver {
    fn on_event(&self, event: &DispatchEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }
}
