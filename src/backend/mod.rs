//! 后端模块：后端能力抽象及带故障转移与准入控制的可调度后端。
//!
//! # Backend Module
//!
//! A [`Backend`] is one opaque capability (an HTTP translation API, a local
//! language detector, ...). A [`Dispatchable`] wraps it with the per-instance
//! state the dispatch layer needs:
//!
//! - a [`FailoverHandler`] deciding whether selectors may pick it
//! - an [`AdmissionLimiter`] gating calls into it
//! - a fixed weight and per-call timeout
//!
//! Invocation order: admission wait (bounded by the backend timeout and the
//! caller's cancellation token), then the call itself under a fresh timeout
//! with panics contained, then failover bookkeeping.

use crate::error::BackendError;
use crate::resilience::{AdmissionDenied, AdmissionLimiter, FailoverConfig, FailoverHandler, RateLimitConfig};
use crate::routing::{SelectorItem, WeightedItem};
use crate::telemetry::{
    noop_observer, DispatchEvent, DispatchEventKind, DispatchObserver, TaskState, UsageKind,
};
use crate::types::{DispatchRequest, TokenUsage};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call information handed to a backend.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub trace_id: String,
    /// The call is abandoned at this instant.
    pub deadline: Instant,
}

impl CallContext {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// One backend instance.
#[async_trait]
pub trait Backend: Send + Sync {
    type Request: Send + Sync;
    type Response: Send;

    /// Stable and unique within a registry.
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        ctx: &CallContext,
        request: &Self::Request,
    ) -> std::result::Result<Self::Response, BackendError>;

    /// Token usage reported by a response, if this kind of backend has any.
    fn token_usage(&self, _response: &Self::Response) -> Option<TokenUsage> {
        None
    }
}

pub type DynBackend<Req, Resp> = Arc<dyn Backend<Request = Req, Response = Resp>>;

/// Returns `true` for backend errors that are not the backend's fault.
///
/// Such errors skip failover bookkeeping and end the dispatch without retrying.
pub type NonRetryableFilter = Arc<dyn Fn(&BackendError) -> bool + Send + Sync>;

/// Treats [`BackendError::rejected`] errors as non-retryable.
pub fn default_non_retryable() -> NonRetryableFilter {
    Arc::new(|e: &BackendError| e.is_rejected())
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn invalid(message: impl Into<String>, field: String, details: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("settings_validator"),
    )
}

/// Per-backend settings resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub weight: u32,
    pub timeout: Duration,
    pub failover: FailoverConfig,
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            weight: 1,
            timeout: DEFAULT_TIMEOUT,
            failover: FailoverConfig::default(),
            rate_limit: None,
        }
    }
}

impl BackendSettings {
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failover(mut self, failover: FailoverConfig) -> Self {
        self.failover = failover;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Reject values the dispatch layer can not run with. `at` prefixes field paths.
    pub fn validate(&self, name: &str, at: &str) -> Result<()> {
        if self.weight == 0 {
            return Err(invalid(
                format!("{}: weight must be positive", name),
                format!("{}.weight", at),
                "0",
            ));
        }
        if self.timeout.is_zero() {
            return Err(invalid(
                format!("{}: timeout must be positive", name),
                format!("{}.timeout_secs", at),
                "0",
            ));
        }

        let f = &self.failover;
        if f.max_failures == 0 {
            return Err(invalid(
                format!("{}: failover max failures must be at least 1", name),
                format!("{}.failover.max_failures", at),
                "0",
            ));
        }
        if f.cooldown_base_secs == 0 {
            return Err(invalid(
                format!("{}: the failover cooldown must be positive", name),
                format!("{}.failover.cooldown_base_secs", at),
                "0",
            ));
        }
        if f.max_disable_cycles == 0 {
            return Err(invalid(
                format!("{}: failover max disable cycles must be at least 1", name),
                format!("{}.failover.max_disable_cycles", at),
                "0",
            ));
        }
        if f.max_disable_cycles == 1 {
            tracing::warn!(
                backend = name,
                "failover max disable cycles is 1: the backend will be disabled permanently on its first disable cycle"
            );
        }

        if let Some(rl) = self.rate_limit.filter(|rl| rl.enabled) {
            if !(rl.refill_per_sec.is_finite() && rl.refill_per_sec > 0.0) {
                return Err(invalid(
                    format!("{}: limiter refill rate must be positive", name),
                    format!("{}.rate_limit.refill_tokens_per_sec", at),
                    rl.refill_per_sec.to_string(),
                ));
            }
            if rl.bucket_size == 0 {
                return Err(invalid(
                    format!("{}: limiter bucket size must be positive", name),
                    format!("{}.rate_limit.bucket_size", at),
                    "0",
                ));
            }
        }
        Ok(())
    }
}

/// A backend plus its failover, admission and weight state.
pub struct Dispatchable<Req, Resp> {
    name: String,
    component: String,
    backend: DynBackend<Req, Resp>,
    weight: u32,
    timeout: Duration,
    failover: FailoverHandler,
    limiter: AdmissionLimiter,
    observer: Arc<dyn DispatchObserver>,
}

impl<Req, Resp> Dispatchable<Req, Resp>
where
    Req: DispatchRequest + 'static,
    Resp: Send + 'static,
{
    pub fn new(backend: DynBackend<Req, Resp>) -> Self {
        let name = backend.name().to_string();
        Self {
            failover: FailoverHandler::new(name.clone(), FailoverConfig::default()),
            name,
            component: "dispatch".to_string(),
            backend,
            weight: 1,
            timeout: DEFAULT_TIMEOUT,
            limiter: AdmissionLimiter::unlimited(),
            observer: noop_observer(),
        }
    }

    /// Apply every setting at once.
    pub fn with_settings(self, settings: &BackendSettings) -> Self {
        self.with_weight(settings.weight)
            .with_timeout(settings.timeout)
            .with_failover(settings.failover)
            .with_rate_limit(settings.rate_limit)
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failover(mut self, cfg: FailoverConfig) -> Self {
        self.failover = FailoverHandler::new(self.name.clone(), cfg);
        self
    }

    pub fn with_rate_limit(mut self, cfg: Option<RateLimitConfig>) -> Self {
        if let Some(c) = cfg.filter(|c| c.enabled) {
            tracing::debug!(
                component = %self.component,
                backend = %self.name,
                refill_per_sec = c.refill_per_sec,
                bucket_size = c.bucket_size,
                "rate limiter configured"
            );
        }
        self.limiter = AdmissionLimiter::new(cfg);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn failover(&self) -> &FailoverHandler {
        &self.failover
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    pub(crate) fn emit(&self, kind: DispatchEventKind) {
        self.observer
            .on_event(&DispatchEvent::new(&self.component, &self.name, kind));
    }

    fn task(&self, state: TaskState, delta: i64) {
        self.emit(DispatchEventKind::Task { state, delta });
    }

    fn gauge(&self, state: TaskState) -> GaugeGuard<'_> {
        self.task(state, 1);
        GaugeGuard {
            observer: self.observer.as_ref(),
            component: &self.component,
            backend: &self.name,
            state,
        }
    }

    /// Metric initialisation for a freshly built registry.
    pub(crate) fn announce(&self) {
        self.emit(DispatchEventKind::Registered {
            weight: self.weight,
        });
        self.emit(DispatchEventKind::Up { up: true });
    }

    /// Admission, invocation and failover bookkeeping for one attempt.
    pub async fn invoke(
        &self,
        request: &Req,
        cancel: &CancellationToken,
        non_retryable: &(dyn Fn(&BackendError) -> bool + Send + Sync),
    ) -> Result<Resp> {
        let trace_id = request.trace_id();

        tracing::trace!(component = %self.component, backend = %self.name, trace_id, "waiting for limiter");
        let admitted = {
            let _pending = self.gauge(TaskState::Pending);
            self.limiter
                .acquire(Instant::now() + self.timeout, cancel)
                .await
        };
        if let Err(denied) = admitted {
            tracing::warn!(
                component = %self.component,
                backend = %self.name,
                trace_id,
                reason = ?denied,
                "rate limiter wait failed"
            );
            return Err(Error::AdmissionTimeout {
                component: self.component.clone(),
                backend: self.name.clone(),
                cancelled: denied == AdmissionDenied::Cancelled,
            });
        }
        tracing::trace!(component = %self.component, backend = %self.name, trace_id, "acquired limiter");

        let ctx = CallContext {
            trace_id: trace_id.to_string(),
            deadline: Instant::now() + self.timeout,
        };
        let outcome = {
            let _processing = self.gauge(TaskState::Processing);
            tracing::debug!(component = %self.component, backend = %self.name, trace_id, "waiting for backend response");
            self.call(&ctx, request).await
        };

        match outcome {
            Ok(resp) => {
                self.on_success();
                if let Some(usage) = self.backend.token_usage(&resp) {
                    self.report_usage(usage);
                }
                Ok(resp)
            }
            Err(source) if non_retryable(&source) => {
                // the backend answered; nothing to hold against it
                self.task(TaskState::Succeeded, 1);
                tracing::debug!(
                    component = %self.component,
                    backend = %self.name,
                    trace_id,
                    error = %source,
                    "non-retryable backend error"
                );
                Err(self.backend_error(source))
            }
            Err(source) => {
                tracing::warn!(
                    component = %self.component,
                    backend = %self.name,
                    trace_id,
                    error = %source,
                    "backend call failed"
                );
                self.on_failure();
                Err(self.backend_error(source))
            }
        }
    }

    async fn call(&self, ctx: &CallContext, request: &Req) -> std::result::Result<Resp, BackendError> {
        let fut = AssertUnwindSafe(self.backend.invoke(ctx, request)).catch_unwind();
        match tokio::time::timeout_at(ctx.deadline, fut).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(BackendError::panicked(panic_message(payload.as_ref()))),
            Err(_) => Err(BackendError::timeout(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }

    fn backend_error(&self, source: BackendError) -> Error {
        Error::Backend {
            component: self.component.clone(),
            backend: self.name.clone(),
            source,
        }
    }

    fn on_success(&self) {
        self.task(TaskState::Succeeded, 1);
        self.emit(DispatchEventKind::Up { up: true });
        self.failover.on_success();
    }

    fn on_failure(&self) {
        self.task(TaskState::Failed, 1);
        if self.failover.on_failure() {
            self.emit(DispatchEventKind::Up { up: false });
        }
    }

    fn report_usage(&self, usage: TokenUsage) {
        self.emit(DispatchEventKind::Usage {
            kind: UsageKind::Prompt,
            amount: usage.prompt,
        });
        self.emit(DispatchEventKind::Usage {
            kind: UsageKind::Completion,
            amount: usage.completion,
        });
    }
}

/// Holds a task gauge at +1 until dropped, including when the invoking future is dropped mid-await.
struct GaugeGuard<'a> {
    observer: &'a dyn DispatchObserver,
    component: &'a str,
    backend: &'a str,
    state: TaskState,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        let kind = DispatchEventKind::Task {
            state: self.state,
            delta: -1,
        };
        self.observer
            .on_event(&DispatchEvent::new(self.component, self.backend, kind));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("backend panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("backend panicked: {}", s)
    } else {
        "backend panicked".to_string()
    }
}

impl<Req, Resp> SelectorItem for Dispatchable<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_disabled(&self) -> bool {
        self.failover.is_disabled()
    }
}

impl<Req, Resp> WeightedItem for Dispatchable<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    fn config_weight(&self) -> u32 {
        self.weight
    }
}

impl<Req, Resp> std::fmt::Debug for Dispatchable<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatchable")
            .field("name", &self.name)
            .field("component", &self.component)
            .field("weight", &self.weight)
            .field("timeout", &self.timeout)
            .field("failover", &self.failover)
            .field("limiter", &self.limiter)
            .finish()
    }
}
