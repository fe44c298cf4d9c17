//! Configuration loading, gateway routing and hot reload

mod common;

use babel_dispatch::config::AppConfig;
use babel_dispatch::facade::{LanguageGateway, Outcome};
use babel_dispatch::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const BASE: &str = r#"
log_level: debug
translation:
  selector: fallback
  max_retries: 1
  retry_cooldown_secs: 1
  defaults:
    timeout_secs: 5
    failover: { max_failures: 1, cooldown_base_secs: 30 }
  backends:
    - name: old-primary
      type: flaky
      options: { delay_ms: 1000 }
detection:
  backends:
    - name: lingua
      type: fixed
      options: { language: ja, confidence: 0.8 }
source_language:
  confidence_threshold: 0.5
  langs: [ja, ko]
"#;

const NEXT: &str = r#"
translation:
  backends:
    - name: new-primary
      type: flaky
"#;

struct TempConfig(PathBuf);

impl TempConfig {
    fn write(content: &str) -> Self {
        let path = std::env::temp_dir().join(format!("babel-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, content).unwrap();
        Self(path)
    }
}

impl Drop for TempConfig {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn gateway(yaml: &str) -> LanguageGateway {
    let (translators, detectors) = common::registries();
    let cfg = AppConfig::from_yaml_str(yaml).unwrap();
    LanguageGateway::new(translators, detectors, &cfg).unwrap()
}

#[tokio::test]
async fn test_load_from_file() {
    let file = TempConfig::write(BASE);
    let cfg = AppConfig::load(&file.0).await.unwrap();
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.translation.max_retries, 1);

    let resolved = cfg.translation.resolved_backends();
    let (backend, settings) = &resolved[0];
    assert_eq!(backend.kind, "flaky");
    assert_eq!(settings.timeout, Duration::from_secs(5));
    assert_eq!(settings.failover.max_failures, 1);
    assert_eq!(settings.failover.cooldown_base_secs, 30);
    assert_eq!(settings.failover.max_disable_cycles, 6);
}

#[tokio::test]
async fn test_invalid_file_reports_field() {
    let file = TempConfig::write(&BASE.replace("timeout_secs: 5", "timeout_secs: 0"));
    let err = AppConfig::load(&file.0).await.unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
    assert_eq!(
        err.context().and_then(|c| c.field_path.as_deref()),
        Some("translation.backends[0].timeout_secs")
    );

    let missing = AppConfig::load("/nonexistent/babel.yaml").await.unwrap_err();
    assert!(missing.to_string().contains("failed to read configuration"));
}

#[tokio::test(start_paused = true)]
async fn test_detect_then_translate() {
    let gw = gateway(BASE);
    match gw.process_with_trace("こんにちは", "trace-42").await.unwrap() {
        Outcome::Translated {
            translation,
            detection,
        } => {
            assert_eq!(translation.backend, "old-primary");
            assert_eq!(translation.response.text, "old-primary:こんにちは");
            let detection = detection.unwrap();
            assert_eq!(detection.language, "ja");
            assert!((detection.confidence - 0.8).abs() < f64::EPSILON);
        }
        Outcome::Skipped { reason } => panic!("unexpected skip: {}", reason),
    }
}

#[tokio::test]
async fn test_low_confidence_is_skipped() {
    let gw = gateway(&BASE.replace("confidence: 0.8", "confidence: 0.2"));
    let outcome = gw.process("안녕하세요").await.unwrap();
    assert!(outcome.is_skipped());
    assert!(outcome.translation().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reload_does_not_disturb_in_flight_calls() {
    let gw = Arc::new(gateway(BASE));

    let in_flight = {
        let gw = Arc::clone(&gw);
        tokio::spawn(async move { gw.process("first").await })
    };
    // Let the spawned call load the services and start its backend delay.
    tokio::time::sleep(Duration::from_millis(10)).await;

    gw.reload(&AppConfig::from_yaml_str(NEXT).unwrap()).unwrap();
    assert_eq!(gw.generation(), 1);
    assert!(gw.services().detection.is_none());

    let first = in_flight.await.unwrap().unwrap();
    assert_eq!(first.translation().unwrap().text, "old-primary:first");

    let second = gw.process("second").await.unwrap();
    assert_eq!(second.translation().unwrap().text, "new-primary:second");
}

#[tokio::test]
async fn test_failed_reload_keeps_running_configuration() {
    let gw = gateway(BASE);
    let before = gw.services();

    let unknown_type = AppConfig::from_yaml_str(&NEXT.replace("type: flaky", "type: http")).unwrap();
    let err = gw.reload(&unknown_type).unwrap_err();
    assert!(err.to_string().contains("unknown translator type 'http'"));

    assert_eq!(gw.generation(), 0);
    assert!(Arc::ptr_eq(&before, &gw.services()));
}
