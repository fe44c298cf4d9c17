//! 调度服务：选择后端并在有界重试策略下调用。
//!
//! # Dispatch Module
//!
//! [`DispatchService`] is the entry point callers use. One attempt selects a
//! backend and invokes it; a failed attempt is followed by a fixed cooldown
//! and a fresh selection, which may land on a different backend because the
//! failed one may just have been disabled.
//!
//! | Outcome | Error |
//! |---------|-------|
//! | nothing selectable | [`Error::SelectionExhausted`] (counts as a failed attempt) |
//! | limiter wait too long | [`Error::AdmissionTimeout`] (counts as a failed attempt) |
//! | backend failed | [`Error::Backend`] |
//! | non-retryable backend error | [`Error::Backend`], returned at once |
//! | attempts used up | [`Error::RetriesExhausted`] wrapping the last error |
//! | caller cancelled | [`Error::Cancelled`] |
//!
//! ```rust,no_run
//! # use babel_dispatch::dispatch::{DispatchService, RetryPolicy};
//! # use babel_dispatch::backend::{BackendSettings, DynBackend};
//! # use babel_dispatch::routing::SelectorKind;
//! # use babel_dispatch::types::{TranslateRequest, TranslateResponse};
//! # async fn run(primary: DynBackend<TranslateRequest, TranslateResponse>) -> babel_dispatch::Result<()> {
//! let service = DispatchService::builder("translator")
//!     .selector(SelectorKind::WeightedRoundRobin)
//!     .retry_policy(RetryPolicy::new(2, std::time::Duration::from_secs(1)))
//!     .backend(primary, BackendSettings::default().with_weight(3))
//!     .build()?;
//!
//! let out = service.invoke(&TranslateRequest::new("こんにちは")).await?;
//! println!("{} answered after {} attempt(s)", out.backend, out.attempts);
//! # Ok(())
//! # }
//! ```

use crate::backend::{default_non_retryable, BackendSettings, Dispatchable, DynBackend, NonRetryableFilter};
use crate::error::BackendError;
use crate::resilience::{FailoverSnapshot, RateLimiterSnapshot};
use crate::routing::{Selector, SelectorKind};
use crate::telemetry::{global_observer, DispatchEventKind, DispatchObserver};
use crate::types::DispatchRequest;
use crate::{Error, ErrorContext, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request-level retry policy. The cooldown is fixed, not escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub retry_cooldown: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_cooldown: Duration) -> Self {
        Self {
            max_retries,
            retry_cooldown,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0, Duration::from_secs(1))
    }
}

/// A successful dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched<Resp> {
    pub response: Resp,
    /// Backend that produced the response.
    pub backend: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Point-in-time view of one registered backend.
#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub name: String,
    pub weight: u32,
    pub disabled: bool,
    pub failover: FailoverSnapshot,
    pub rate_limiter: Option<RateLimiterSnapshot>,
}

/// Selects and invokes backends of one kind under a bounded retry policy.
pub struct DispatchService<Req, Resp> {
    component: String,
    selector: Box<dyn Selector<Dispatchable<Req, Resp>>>,
    policy: RetryPolicy,
    non_retryable: NonRetryableFilter,
}

impl<Req, Resp> DispatchService<Req, Resp>
where
    Req: DispatchRequest + 'static,
    Resp: Send + 'static,
{
    pub fn builder(component: impl Into<String>) -> DispatchServiceBuilder<Req, Resp> {
        DispatchServiceBuilder::new(component)
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn selector_kind(&self) -> SelectorKind {
        self.selector.kind()
    }

    pub fn total_config_weight(&self) -> u64 {
        self.selector.total_config_weight()
    }

    /// Registered backends, in registration order.
    pub fn backends(&self) -> &[Arc<Dispatchable<Req, Resp>>] {
        self.selector.items()
    }

    /// Metric initialisation: registered weight and `up` for every backend.
    pub fn announce(&self) {
        for item in self.backends() {
            item.announce();
        }
    }

    pub async fn status(&self) -> Vec<BackendStatus> {
        let mut out = Vec::with_capacity(self.backends().len());
        for b in self.backends() {
            out.push(BackendStatus {
                name: b.name().to_string(),
                weight: b.weight(),
                disabled: b.failover().is_disabled(),
                failover: b.failover().snapshot(),
                rate_limiter: b.limiter().snapshot().await,
            });
        }
        out
    }

    /// Dispatch with retries; the cooldown between attempts always runs to completion.
    pub async fn invoke(&self, request: &Req) -> Result<Dispatched<Resp>> {
        self.invoke_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Dispatch with retries. Cancelling `cancel` ends admission waits and
    /// retry cooldowns early with [`Error::Cancelled`]. A backend call already
    /// in flight keeps its own timeout.
    pub async fn invoke_with_cancel(
        &self,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Dispatched<Resp>> {
        let trace_id = request.trace_id();
        let max_attempts = self.policy.max_attempts();
        let mut last_backend: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(last_backend));
            }
            attempt += 1;

            let err = match self.attempt(request, cancel).await {
                Ok((response, backend)) => {
                    if attempt > 1 {
                        tracing::info!(
                            component = %self.component,
                            backend = %backend,
                            trace_id,
                            attempt,
                            "dispatch succeeded after retry"
                        );
                    }
                    return Ok(Dispatched {
                        response,
                        backend,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if let Some(b) = err.backend() {
                last_backend = Some(b.to_string());
            }

            if self.is_non_retryable(&err) {
                return Err(err);
            }
            if matches!(err, Error::AdmissionTimeout { cancelled: true, .. }) {
                return Err(self.cancelled(last_backend));
            }

            if attempt >= max_attempts {
                tracing::error!(
                    component = %self.component,
                    backend = last_backend.as_deref().unwrap_or("none"),
                    trace_id,
                    attempts = attempt,
                    error = %err,
                    "no more retries: maximum retries exceeded"
                );
                return Err(Error::RetriesExhausted {
                    component: self.component.clone(),
                    backend: last_backend,
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            tracing::warn!(
                component = %self.component,
                backend = last_backend.as_deref().unwrap_or("none"),
                trace_id,
                "{}. Retry attempt {}/{} in {:?}",
                err,
                attempt,
                self.policy.max_retries,
                self.policy.retry_cooldown
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancelled(last_backend)),
                _ = tokio::time::sleep(self.policy.retry_cooldown) => {}
            }
        }
    }

    async fn attempt(&self, request: &Req, cancel: &CancellationToken) -> Result<(Resp, String)> {
        let backend = self.selector.select()?;
        backend.emit(DispatchEventKind::Selected);
        let response = backend
            .invoke(request, cancel, self.non_retryable.as_ref())
            .await?;
        Ok((response, backend.name().to_string()))
    }

    fn is_non_retryable(&self, err: &Error) -> bool {
        match err {
            Error::Backend { source, .. } => (self.non_retryable)(source),
            _ => false,
        }
    }

    fn cancelled(&self, backend: Option<String>) -> Error {
        tracing::debug!(component = %self.component, "dispatch cancelled");
        Error::Cancelled {
            component: self.component.clone(),
            backend,
        }
    }
}

impl<Req, Resp> std::fmt::Debug for DispatchService<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchService")
            .field("component", &self.component)
            .field("selector", &self.selector.kind())
            .field("backends", &self.selector.items().len())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Builder for [`DispatchService`].
pub struct DispatchServiceBuilder<Req, Resp> {
    component: String,
    kind: SelectorKind,
    policy: RetryPolicy,
    non_retryable: NonRetryableFilter,
    observer: Option<Arc<dyn DispatchObserver>>,
    backends: Vec<(DynBackend<Req, Resp>, BackendSettings)>,
}

impl<Req, Resp> DispatchServiceBuilder<Req, Resp>
where
    Req: DispatchRequest + 'static,
    Resp: Send + 'static,
{
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            kind: SelectorKind::default(),
            policy: RetryPolicy::default(),
            non_retryable: default_non_retryable(),
            observer: None,
            backends: Vec::new(),
        }
    }

    pub fn selector(mut self, kind: SelectorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the non-retryable classification (default: rejected errors).
    pub fn non_retryable<F>(mut self, filter: F) -> Self
    where
        F: Fn(&BackendError) -> bool + Send + Sync + 'static,
    {
        self.non_retryable = Arc::new(filter);
        self
    }

    pub fn non_retryable_filter(mut self, filter: NonRetryableFilter) -> Self {
        self.non_retryable = filter;
        self
    }

    /// Defaults to the global observer at build time.
    pub fn observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Backends are registered in call order, which is the fallback priority.
    pub fn backend(mut self, backend: DynBackend<Req, Resp>, settings: BackendSettings) -> Self {
        self.backends.push((backend, settings));
        self
    }

    /// Build the registry and announce its backends to the observer.
    pub fn build(self) -> Result<DispatchService<Req, Resp>> {
        let service = self.build_deferred()?;
        service.announce();
        Ok(service)
    }

    /// Build the registry without emitting anything. The caller calls
    /// [`DispatchService::announce`] once the service is actually in use.
    /// Duplicate backend names or unusable settings fail the whole build.
    pub fn build_deferred(self) -> Result<DispatchService<Req, Resp>> {
        let observer = self.observer.unwrap_or_else(global_observer);

        let mut seen = HashSet::new();
        for (i, (backend, settings)) in self.backends.iter().enumerate() {
            if !seen.insert(backend.name().to_string()) {
                return Err(Error::configuration_with_context(
                    format!("duplicated {} name: {}", self.component, backend.name()),
                    ErrorContext::new()
                        .with_field_path(format!("backends[{}].name", i))
                        .with_source("dispatch_builder"),
                ));
            }
            settings.validate(backend.name(), &format!("backends[{}]", i))?;
        }

        let items: Vec<Arc<Dispatchable<Req, Resp>>> = self
            .backends
            .into_iter()
            .map(|(backend, settings)| {
                Arc::new(
                    Dispatchable::new(backend)
                        .with_component(self.component.clone())
                        .with_observer(Arc::clone(&observer))
                        .with_settings(&settings),
                )
            })
            .collect();

        let selector = self.kind.build(&self.component, items);
        tracing::debug!(
            component = %self.component,
            selector = %self.kind,
            total_weight = selector.total_config_weight(),
            backends = selector.items().len(),
            "dispatch service built"
        );

        Ok(DispatchService {
            component: self.component,
            selector,
            policy: self.policy,
            non_retryable: self.non_retryable,
        })
    }
}
