//! 门面层：先检测语种、再翻译的便捷服务。
//!
//! # Facade Module
//!
//! [`LanguageGateway`] owns one translation dispatcher and, optionally, one
//! detection dispatcher, both built from an [`AppConfig`] through backend
//! registries. A text is first run through detection (when configured); a
//! detection outside the configured source languages ends the request with
//! [`Outcome::Skipped`], anything else goes on to translation.
//!
//! Both dispatchers are swapped together on [`LanguageGateway::reload`]: the
//! new pair is built completely before it replaces the old one.

pub mod filtered;

pub use filtered::SourceFiltered;

use crate::backend::DynBackend;
use crate::config::AppConfig;
use crate::dispatch::{DispatchService, Dispatched};
use crate::error::BackendErrorKind;
use crate::registry::{BackendRegistry, Reloadable};
use crate::types::{
    new_trace_id, DetectRequest, DetectResponse, SourceLanguageFilter, TranslateRequest,
    TranslateResponse,
};
use crate::Result;
use std::sync::Arc;

pub type TranslatorRegistry = BackendRegistry<TranslateRequest, TranslateResponse>;
pub type DetectorRegistry = BackendRegistry<DetectRequest, DetectResponse>;

/// The dispatchers active for one configuration generation.
#[derive(Debug)]
pub struct Services {
    pub translation: DispatchService<TranslateRequest, TranslateResponse>,
    pub detection: Option<DispatchService<DetectRequest, DetectResponse>>,
}

impl Services {
    /// Announce every backend of both dispatchers to their observers.
    pub fn announce(&self) {
        self.translation.announce();
        if let Some(detection) = &self.detection {
            detection.announce();
        }
    }
}

/// Result of [`LanguageGateway::process`].
#[derive(Debug)]
pub enum Outcome {
    Translated {
        translation: Dispatched<TranslateResponse>,
        /// Present when detection is configured.
        detection: Option<DetectResponse>,
    },
    /// Detection found no supported source language.
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }

    pub fn translation(&self) -> Option<&TranslateResponse> {
        match self {
            Outcome::Translated { translation, .. } => Some(&translation.response),
            Outcome::Skipped { .. } => None,
        }
    }
}

pub struct LanguageGateway {
    translators: TranslatorRegistry,
    detectors: DetectorRegistry,
    services: Reloadable<Services>,
}

impl LanguageGateway {
    pub fn new(
        translators: TranslatorRegistry,
        detectors: DetectorRegistry,
        cfg: &AppConfig,
    ) -> Result<Self> {
        let services = build_services(&translators, &detectors, cfg)?;
        services.announce();
        Ok(Self {
            translators,
            detectors,
            services: Reloadable::new(services),
        })
    }

    /// Rebuild both dispatchers from `cfg` and swap them in together.
    ///
    /// On error the running dispatchers stay untouched and nothing is reported
    /// to the observers.
    pub fn reload(&self, cfg: &AppConfig) -> Result<()> {
        self.services
            .reload_with(|| build_services(&self.translators, &self.detectors, cfg))?;
        self.services.load().announce();
        Ok(())
    }

    /// The active dispatchers; holding the `Arc` pins them across a reload.
    pub fn services(&self) -> Arc<Services> {
        self.services.load()
    }

    pub fn generation(&self) -> u64 {
        self.services.generation()
    }

    pub async fn process(&self, text: impl Into<String>) -> Result<Outcome> {
        self.process_with_trace(text, new_trace_id()).await
    }

    pub async fn process_with_trace(
        &self,
        text: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Result<Outcome> {
        let text = text.into();
        let trace_id = trace_id.into();
        let services = self.services.load();

        let detection = match &services.detection {
            Some(detector) => {
                let request = DetectRequest::new(text.clone()).with_trace_id(trace_id.clone());
                match detector.invoke(&request).await {
                    Ok(detected) => Some(detected.response),
                    Err(e) if e.backend_error_kind() == Some(BackendErrorKind::Rejected) => {
                        tracing::info!(trace_id = %trace_id, reason = %e, "translation skipped");
                        return Ok(Outcome::Skipped {
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };

        let request = TranslateRequest::new(text).with_trace_id(trace_id);
        let translation = services.translation.invoke(&request).await?;
        Ok(Outcome::Translated {
            translation,
            detection,
        })
    }
}

impl std::fmt::Debug for LanguageGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageGateway")
            .field("translators", &self.translators)
            .field("detectors", &self.detectors)
            .field("generation", &self.generation())
            .finish()
    }
}

fn build_services(
    translators: &TranslatorRegistry,
    detectors: &DetectorRegistry,
    cfg: &AppConfig,
) -> Result<Services> {
    cfg.validate()?;
    let translation = translators.rebuild(&cfg.translation)?;
    let detection = match &cfg.detection {
        Some(detection) => {
            let filter = cfg.source_language.as_ref().map(SourceLanguageFilter::new);
            Some(detectors.rebuild_with(detection, |backend| match &filter {
                Some(filter) => {
                    let filtered: DynBackend<DetectRequest, DetectResponse> =
                        Arc::new(SourceFiltered::new(backend, filter.clone()));
                    filtered
                }
                None => backend,
            })?)
        }
        None => None,
    };
    Ok(Services {
        translation,
        detection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_utils::{Script, ScriptedBackend};
    use crate::backend::{Backend, CallContext};
    use crate::config::BackendConfig;
    use crate::error::BackendError;
    use crate::telemetry::InMemoryObserver;
    use async_trait::async_trait;

    struct StaticDetector {
        name: String,
        language: String,
    }

    #[async_trait]
    impl Backend for StaticDetector {
        type Request = DetectRequest;
        type Response = DetectResponse;

        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(
            &self,
            _ctx: &CallContext,
            _request: &DetectRequest,
        ) -> std::result::Result<DetectResponse, BackendError> {
            Ok(DetectResponse::new(self.language.clone(), 0.9))
        }
    }

    fn registries(observer: Arc<InMemoryObserver>) -> (TranslatorRegistry, DetectorRegistry) {
        let translators = TranslatorRegistry::new("translator")
            .with_observer(observer.clone())
            .with_factory("scripted", |cfg: &BackendConfig| {
                let script = match cfg.option_str("script") {
                    Some("fail") => Script::Fail,
                    _ => Script::Succeed,
                };
                let backend: DynBackend<TranslateRequest, TranslateResponse> =
                    ScriptedBackend::new(&cfg.name, script);
                Ok(backend)
            })
            .unwrap();
        let detectors = DetectorRegistry::new("detector")
            .with_observer(observer)
            .with_factory("static", |cfg: &BackendConfig| {
                let backend: DynBackend<DetectRequest, DetectResponse> = Arc::new(StaticDetector {
                    name: cfg.name.clone(),
                    language: cfg.option_str("language").unwrap_or("ja").to_string(),
                });
                Ok(backend)
            })
            .unwrap();
        (translators, detectors)
    }

    fn gateway(yaml: &str) -> (LanguageGateway, Arc<InMemoryObserver>) {
        let observer = Arc::new(InMemoryObserver::default());
        let (t, d) = registries(observer.clone());
        let cfg = AppConfig::from_yaml_str(yaml).unwrap();
        (LanguageGateway::new(t, d, &cfg).unwrap(), observer)
    }

    const WITH_DETECTION: &str = r#"
translation:
  backends:
    - { name: mt, type: scripted }
detection:
  backends:
    - { name: det, type: static, options: { language: ja } }
source_language:
  confidence_threshold: 0.5
  langs: [ja]
"#;

    #[tokio::test]
    async fn test_translates_without_detection() {
        let (gw, _) = gateway("translation: { backends: [ { name: mt, type: scripted } ] }");
        let outcome = gw.process_with_trace("hello", "trace-1").await.unwrap();
        assert_eq!(outcome.translation().unwrap().text, "[mt] hello");
        match outcome {
            Outcome::Translated { detection, translation } => {
                assert!(detection.is_none());
                assert_eq!(translation.backend, "mt");
            }
            Outcome::Skipped { .. } => panic!("unexpected skip"),
        }
    }

    #[tokio::test]
    async fn test_detection_then_translation() {
        let (gw, _) = gateway(WITH_DETECTION);
        match gw.process("こんにちは").await.unwrap() {
            Outcome::Translated { detection, .. } => {
                assert_eq!(detection.unwrap().language, "ja");
            }
            Outcome::Skipped { reason } => panic!("unexpected skip: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_unsupported_language_is_skipped() {
        let yaml = WITH_DETECTION.replace("language: ja", "language: en");
        let (gw, observer) = gateway(&yaml);
        let outcome = gw.process("hello").await.unwrap();
        assert!(outcome.is_skipped());

        // Translation never ran and the detector is not penalised.
        assert_eq!(observer.counters("translator", "mt").unwrap().selections, 0);
        let det = observer.counters("detector", "det").unwrap();
        assert_eq!(det.failed, 0);
        assert!(det.up);
        assert!(!gw.services().detection.as_ref().unwrap().backends()[0]
            .failover()
            .is_disabled());
    }

    #[tokio::test]
    async fn test_translation_failure_is_returned() {
        let (gw, _) = gateway(
            "translation: { backends: [ { name: mt, type: scripted, options: { script: fail } } ] }",
        );
        let err = gw.process("hello").await.unwrap_err();
        assert_eq!(err.backend_error_kind(), Some(BackendErrorKind::Failed));
    }

    #[tokio::test]
    async fn test_failed_reload_leaves_metrics_alone() {
        let (gw, observer) = gateway(
            "translation: { backends: [ { name: mt, type: scripted, failover: { max_failures: 1 }, options: { script: fail } } ] }",
        );
        assert!(gw.process("hello").await.is_err());
        assert!(!observer.counters("translator", "mt").unwrap().up);

        let broken = AppConfig::from_yaml_str(
            "translation: { backends: [ { name: mt, type: scripted, weight: 5 } ] }\n\
             detection: { backends: [ { name: det, type: missing } ] }\n\
             source_language: { confidence_threshold: 0.5, langs: [ja] }",
        )
        .unwrap();
        assert!(gw.reload(&broken).is_err());

        let mt = observer.counters("translator", "mt").unwrap();
        assert!(!mt.up);
        assert_eq!(mt.weight, 1);
        assert!(observer.counters("detector", "det").is_none());
        assert!(gw.services().translation.backends()[0].failover().is_disabled());

        let next = AppConfig::from_yaml_str(
            "translation: { backends: [ { name: mt, type: scripted, weight: 5 } ] }",
        )
        .unwrap();
        gw.reload(&next).unwrap();
        let mt = observer.counters("translator", "mt").unwrap();
        assert!(mt.up);
        assert_eq!(mt.weight, 5);
    }

    #[tokio::test]
    async fn test_reload_is_all_or_nothing() {
        let (gw, _) = gateway("translation: { backends: [ { name: mt, type: scripted } ] }");
        let pinned = gw.services();

        let broken = AppConfig::from_yaml_str(
            "translation: { backends: [ { name: other, type: scripted } ] }\n\
             detection: { backends: [ { name: det, type: missing } ] }\n\
             source_language: { confidence_threshold: 0.5, langs: [ja] }",
        )
        .unwrap();
        assert!(gw.reload(&broken).is_err());
        assert_eq!(gw.generation(), 0);
        assert_eq!(gw.services().translation.backends()[0].name(), "mt");

        let next = AppConfig::from_yaml_str(WITH_DETECTION).unwrap();
        gw.reload(&next).unwrap();
        assert_eq!(gw.generation(), 1);
        assert!(gw.services().detection.is_some());
        assert!(pinned.detection.is_none());
    }
}
