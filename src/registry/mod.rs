//! 后端注册表：按类型注册后端工厂，从配置重建调度服务，并支持原子热替换。
//!
//! # Registry Module
//!
//! - [`BackendRegistry`]: factories keyed by backend `type`, and
//!   [`BackendRegistry::rebuild`] which turns a [`DispatchConfig`] into a
//!   ready [`DispatchService`]
//! - [`Reloadable`]: holds the active value behind an `ArcSwap`; a reload
//!   either replaces it whole or leaves it untouched
//!
//! In-flight calls keep the `Arc` they loaded, so they finish against the old
//! backend set while new calls see the new one.

use crate::backend::{DynBackend, NonRetryableFilter};
use crate::config::{BackendConfig, DispatchConfig};
use crate::dispatch::DispatchService;
use crate::telemetry::DispatchObserver;
use crate::types::DispatchRequest;
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Creates one backend instance from its configuration entry.
pub type BackendFactory<Req, Resp> =
    Arc<dyn Fn(&BackendConfig) -> Result<DynBackend<Req, Resp>> + Send + Sync>;

/// Backend factories for one component ("translator", "detector", ...).
pub struct BackendRegistry<Req, Resp> {
    component: String,
    factories: HashMap<String, BackendFactory<Req, Resp>>,
    observer: Option<Arc<dyn DispatchObserver>>,
    non_retryable: Option<NonRetryableFilter>,
}

impl<Req, Resp> BackendRegistry<Req, Resp>
where
    Req: DispatchRequest + 'static,
    Resp: Send + 'static,
{
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            factories: HashMap::new(),
            observer: None,
            non_retryable: None,
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Register a factory. A second factory for the same type is an error.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&BackendConfig) -> Result<DynBackend<Req, Resp>> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(Error::configuration_with_context(
                format!("{} backend type '{}' already registered", self.component, kind),
                ErrorContext::new().with_source("backend_registry"),
            ));
        }
        tracing::debug!(component = %self.component, kind = %kind, "registered backend factory");
        self.factories.insert(kind, Arc::new(factory));
        Ok(())
    }

    pub fn with_factory<F>(mut self, kind: impl Into<String>, factory: F) -> Result<Self>
    where
        F: Fn(&BackendConfig) -> Result<DynBackend<Req, Resp>> + Send + Sync + 'static,
    {
        self.register(kind, factory)?;
        Ok(self)
    }

    pub fn with_observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_non_retryable(mut self, filter: NonRetryableFilter) -> Self {
        self.non_retryable = Some(filter);
        self
    }

    pub fn has(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Instantiate one backend.
    pub fn create(&self, cfg: &BackendConfig) -> Result<DynBackend<Req, Resp>> {
        let factory = self.factories.get(&cfg.kind).ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown {} type '{}', backend: {}", self.component, cfg.kind, cfg.name),
                ErrorContext::new()
                    .with_details(format!("registered types: {:?}", self.kinds()))
                    .with_source("backend_registry"),
            )
        })?;
        let backend = factory(cfg)?;
        if backend.name() != cfg.name {
            return Err(Error::configuration_with_context(
                format!(
                    "{} factory '{}' returned backend '{}' for '{}'",
                    self.component,
                    cfg.kind,
                    backend.name(),
                    cfg.name
                ),
                ErrorContext::new().with_source("backend_registry"),
            ));
        }
        Ok(backend)
    }

    /// Build a complete dispatch service from configuration.
    ///
    /// Validation, every factory call and the registry build must all succeed;
    /// on any error nothing is returned and the caller keeps its current service.
    /// Nothing is reported to the observer: call [`DispatchService::announce`]
    /// once the returned service replaces the running one.
    pub fn rebuild(&self, cfg: &DispatchConfig) -> Result<DispatchService<Req, Resp>> {
        self.rebuild_with(cfg, |backend| backend)
    }

    /// Like [`rebuild`](Self::rebuild), passing every created backend through `decorate`.
    pub fn rebuild_with<D>(&self, cfg: &DispatchConfig, decorate: D) -> Result<DispatchService<Req, Resp>>
    where
        D: Fn(DynBackend<Req, Resp>) -> DynBackend<Req, Resp>,
    {
        cfg.validate(&self.component)?;

        let mut builder = DispatchService::builder(self.component.clone())
            .selector(cfg.selector)
            .retry_policy(cfg.retry_policy());
        if let Some(observer) = &self.observer {
            builder = builder.observer(Arc::clone(observer));
        }
        if let Some(filter) = &self.non_retryable {
            builder = builder.non_retryable_filter(Arc::clone(filter));
        }

        for (backend_cfg, settings) in cfg.resolved_backends() {
            let backend = decorate(self.create(backend_cfg)?);
            builder = builder.backend(backend, settings);
        }

        let service = builder.build_deferred()?;
        tracing::info!(
            component = %self.component,
            selector = %cfg.selector,
            backends = service.backends().len(),
            total_weight = service.total_config_weight(),
            "dispatch service rebuilt"
        );
        Ok(service)
    }
}

impl<Req, Resp> std::fmt::Debug for BackendRegistry<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("BackendRegistry")
            .field("component", &self.component)
            .field("kinds", &kinds)
            .finish()
    }
}

/// Atomically replaceable value (typically a [`DispatchService`]).
pub struct Reloadable<T> {
    current: ArcSwap<T>,
    generation: AtomicU64,
}

impl<T> Reloadable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            generation: AtomicU64::new(0),
        }
    }

    /// The active value. Holding the `Arc` pins it across a reload.
    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Replace the active value, returning the previous one.
    pub fn store(&self, next: T) -> Arc<T> {
        let prev = self.current.swap(Arc::new(next));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "active value replaced");
        prev
    }

    /// Build a replacement and swap it in; a failed build leaves the current value in place.
    pub fn reload_with<F>(&self, build: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        match build() {
            Ok(next) => Ok(self.store(next)),
            Err(e) => {
                tracing::error!(error = %e, "reload failed, keeping current configuration");
                Err(e)
            }
        }
    }

    /// Number of successful replacements so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Reloadable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloadable")
            .field("current", &self.load())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_utils::{Script, ScriptedBackend};
    use crate::types::{TranslateRequest, TranslateResponse};

    type Registry = BackendRegistry<TranslateRequest, TranslateResponse>;

    fn registry() -> Registry {
        Registry::new("translator")
            .with_factory("scripted", |cfg: &BackendConfig| {
                let script = match cfg.option_str("script") {
                    Some("fail") => Script::Fail,
                    _ => Script::Succeed,
                };
                let backend: DynBackend<TranslateRequest, TranslateResponse> =
                    ScriptedBackend::new(&cfg.name, script);
                Ok(backend)
            })
            .unwrap()
    }

    fn dispatch_cfg(yaml: &str) -> DispatchConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_duplicate_factory_rejected() {
        let mut reg = registry();
        let err = reg
            .register("scripted", |cfg: &BackendConfig| {
                let backend: DynBackend<TranslateRequest, TranslateResponse> =
                    ScriptedBackend::new(&cfg.name, Script::Succeed);
                Ok(backend)
            })
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(reg.kinds(), vec!["scripted"]);
    }

    #[test]
    fn test_unknown_type_fails_whole_build() {
        let reg = registry();
        let cfg = dispatch_cfg(
            "backends: [ { name: a, type: scripted }, { name: b, type: http } ]",
        );
        let err = reg.rebuild(&cfg).unwrap_err();
        assert!(err.to_string().contains("unknown translator type 'http'"));
    }

    #[test]
    fn test_rebuild_applies_config() {
        let reg = registry();
        let cfg = dispatch_cfg(
            "selector: fallback\nmax_retries: 2\nbackends: [ { name: a, type: scripted, weight: 2 }, { name: b, type: scripted } ]",
        );
        let svc = reg.rebuild(&cfg).unwrap();
        assert_eq!(svc.component(), "translator");
        assert_eq!(svc.policy().max_retries, 2);
        assert_eq!(svc.backends().len(), 2);
        assert_eq!(svc.backends()[0].weight(), 2);
        assert_eq!(svc.backends()[1].name(), "b");
    }

    #[test]
    fn test_factory_name_mismatch_rejected() {
        let reg = Registry::new("translator")
            .with_factory("liar", |_cfg: &BackendConfig| {
                let backend: DynBackend<TranslateRequest, TranslateResponse> =
                    ScriptedBackend::new("someone-else", Script::Succeed);
                Ok(backend)
            })
            .unwrap();
        let cfg = dispatch_cfg("backends: [ { name: a, type: liar } ]");
        assert!(reg.rebuild(&cfg).is_err());
    }

    #[test]
    fn test_reloadable_keeps_old_value_on_failure() {
        let r = Reloadable::new(1u32);
        assert_eq!(*r.load(), 1);

        let pinned = r.load();
        r.store(2);
        assert_eq!(*pinned, 1);
        assert_eq!(*r.load(), 2);

        let res = r.reload_with(|| Err(Error::configuration("bad config")));
        assert!(res.is_err());
        assert_eq!(*r.load(), 2);
        assert_eq!(r.generation(), 1);

        let prev = r.reload_with(|| Ok(3)).unwrap();
        assert_eq!(*prev, 2);
        assert_eq!(r.generation(), 2);
    }
}
