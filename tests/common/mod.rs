//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use babel_dispatch::backend::{Backend, CallContext, DynBackend};
use babel_dispatch::config::BackendConfig;
use babel_dispatch::facade::{DetectorRegistry, TranslatorRegistry};
use babel_dispatch::types::{DetectRequest, DetectResponse, TokenUsage, TranslateRequest, TranslateResponse};
use babel_dispatch::BackendError;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Translator whose failure mode can be flipped at runtime.
pub struct FlakyTranslator {
    name: String,
    failing: AtomicBool,
    delay: Duration,
    calls: AtomicU32,
}

impl FlakyTranslator {
    pub fn new(name: &str, failing: bool) -> Arc<Self> {
        Self::with_delay(name, failing, Duration::ZERO)
    }

    pub fn with_delay(name: &str, failing: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing: AtomicBool::new(failing),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dyn_backend(self: &Arc<Self>) -> DynBackend<TranslateRequest, TranslateResponse> {
        self.clone()
    }
}

#[async_trait]
impl Backend for FlakyTranslator {
    type Request = TranslateRequest;
    type Response = TranslateResponse;

    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        request: &TranslateRequest,
    ) -> Result<TranslateResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::failed(format!("{} is down", self.name)));
        }
        Ok(TranslateResponse::new(format!("{}:{}", self.name, request.text))
            .with_usage(TokenUsage::new(10, 20)))
    }

    fn token_usage(&self, response: &TranslateResponse) -> Option<TokenUsage> {
        response.usage
    }
}

/// Detector that always reports the language given in its `language` option.
pub struct FixedDetector {
    name: String,
    language: String,
    confidence: f64,
}

#[async_trait]
impl Backend for FixedDetector {
    type Request = DetectRequest;
    type Response = DetectResponse;

    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        _request: &DetectRequest,
    ) -> Result<DetectResponse, BackendError> {
        Ok(DetectResponse::new(self.language.clone(), self.confidence))
    }
}

/// Registries with a `flaky` translator type (options `failing`, `delay_ms`) and a
/// `fixed` detector type (options `language`, `confidence`).
pub fn registries() -> (TranslatorRegistry, DetectorRegistry) {
    let translators = TranslatorRegistry::new("translator")
        .with_factory("flaky", |cfg: &BackendConfig| {
            let failing = cfg
                .options
                .get("failing")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let delay = cfg
                .options
                .get("delay_ms")
                .and_then(|v| v.as_u64())
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO);
            Ok(FlakyTranslator::with_delay(&cfg.name, failing, delay).dyn_backend())
        })
        .expect("register flaky");
    let detectors = DetectorRegistry::new("detector")
        .with_factory("fixed", |cfg: &BackendConfig| {
            let backend: DynBackend<DetectRequest, DetectResponse> = Arc::new(FixedDetector {
                name: cfg.name.clone(),
                language: cfg.option_str("language").unwrap_or("ja").to_string(),
                confidence: cfg
                    .options
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.9),
            });
            Ok(backend)
        })
        .expect("register fixed");
    (translators, detectors)
}
