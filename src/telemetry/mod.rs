//! 遥测模块：调度事件钩子与日志初始化。
//!
//! # Telemetry Module
//!
//! The dispatch layer does not own a metrics backend. It reports transitions to
//! a [`DispatchObserver`], and whatever sits behind the observer (Prometheus,
//! StatsD, a test recorder) turns them into metrics.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`DispatchEvent`] | One transition, labelled with component and backend |
//! | [`DispatchObserver`] | Trait for event destinations |
//! | [`NoopObserver`] | Drops everything |
//! | [`TracingObserver`] | Logs events through `tracing` |
//! | [`InMemoryObserver`] | Records events and per-backend counters, for tests |
//! | [`CompositeObserver`] | Fans out to several observers |
//!
//! Events are emitted:
//! - once per backend at build time (`Registered`, then `Up { up: true }`)
//! - on every selection
//! - around the admission wait (`Pending` ±1) and the invocation (`Processing` ±1)
//! - at the outcome (`Succeeded` / `Failed` +1, `Up` on success or on a failure
//!   that disabled the backend)
//! - for token usage on successful responses that report it

pub mod observers;

pub use observers::{BackendCounters, CompositeObserver, InMemoryObserver, TracingObserver};

use crate::{Error, Result};
use serde::Serialize;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Processing => "processing",
            TaskState::Succeeded => "success",
            TaskState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Prompt,
    Completion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEventKind {
    /// Backend added to a freshly built registry.
    Registered { weight: u32 },
    Selected,
    /// Gauge-style change; `delta` is +1/-1 for pending and processing, +1 for outcomes.
    Task { state: TaskState, delta: i64 },
    Up { up: bool },
    Usage { kind: UsageKind, amount: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchEvent {
    /// Which dispatch service, e.g. "translator" or "detector".
    pub component: String,
    pub backend: String,
    #[serde(flatten)]
    pub kind: DispatchEventKind,
}

impl DispatchEvent {
    pub fn new(component: &str, backend: &str, kind: DispatchEventKind) -> Self {
        Self {
            component: component.to_string(),
            backend: backend.to_string(),
            kind,
        }
    }
}

/// Destination for dispatch events.
///
/// Called inline on the dispatch path; implementations must not block.
pub trait DispatchObserver: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

/// Default observer (no collection).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {
    fn on_event(&self, _event: &DispatchEvent) {}
}

pub fn noop_observer() -> Arc<dyn DispatchObserver> {
    Arc::new(NoopObserver)
}

static GLOBAL_OBSERVER: once_cell::sync::Lazy<RwLock<Arc<dyn DispatchObserver>>> =
    once_cell::sync::Lazy::new(|| RwLock::new(noop_observer()));

/// Returns the globally configured observer, used by services built without one.
pub fn global_observer() -> Arc<dyn DispatchObserver> {
    GLOBAL_OBSERVER
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Sets the global observer. Affects services built afterwards.
pub fn set_global_observer(observer: Arc<dyn DispatchObserver>) {
    *GLOBAL_OBSERVER.write().unwrap_or_else(|e| e.into_inner()) = observer;
}

/// Install a fmt subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(level).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid log level: {}", e),
                crate::ErrorContext::new()
                    .with_field_path("log_level")
                    .with_details(level.to_string()),
            )
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::configuration(format!("failed to install logger: {}", e)))
}
