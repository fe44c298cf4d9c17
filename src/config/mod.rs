//! 配置模块：YAML 配置模型、默认值合并与校验。
//!
//! # Configuration
//!
//! ```yaml
//! log_level: info
//! translation:
//!   selector: weighted-round-robin
//!   max_retries: 2
//!   retry_cooldown_secs: 1
//!   defaults:
//!     timeout_secs: 30
//!     failover: { max_failures: 3, cooldown_base_secs: 120, max_disable_cycles: 6 }
//!   backends:
//!     - name: primary
//!       type: openai
//!       weight: 3
//!       rate_limit: { enabled: true, bucket_size: 5, refill_tokens_per_sec: 0.5 }
//!       options: { model: gpt-4o-mini }
//! ```
//!
//! Unset per-backend values fall back to `defaults`, then to built-in values.
//! Validation rejects the whole file on the first problem; nothing is
//! partially applied.

use crate::backend::{BackendSettings, DEFAULT_TIMEOUT};
use crate::dispatch::RetryPolicy;
use crate::resilience::{FailoverConfig, RateLimitConfig};
use crate::routing::SelectorKind;
use crate::types::SourceLanguageConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retry_cooldown_secs() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub translation: DispatchConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<DispatchConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<SourceLanguageConfig>,
}

impl AppConfig {
    /// Parse and validate.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let cfg: AppConfig = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read configuration: {}", e),
                ErrorContext::new()
                    .with_details(path.to_string_lossy().to_string())
                    .with_source("config_loader"),
            )
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.translation.validate("translation")?;
        if let Some(detection) = &self.detection {
            detection.validate("detection")?;
            if self.source_language.is_none() {
                return Err(Error::configuration_with_context(
                    "language detection requires a source_language section",
                    ErrorContext::new()
                        .with_field_path("source_language")
                        .with_source("config_validator"),
                ));
            }
        }
        if let Some(source_language) = &self.source_language {
            source_language.validate("source_language")?;
            if self.detection.is_none() {
                tracing::warn!("source_language is set but detection is not configured; it has no effect");
            }
        }
        Ok(())
    }
}

/// One dispatch service: selector, retry policy and its backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub selector: SelectorKind,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
    #[serde(default)]
    pub defaults: BackendDefaults,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl DispatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_cooldown_secs),
        )
    }

    /// Backends with defaults merged in, in configuration order.
    pub fn resolved_backends(&self) -> Vec<(&BackendConfig, BackendSettings)> {
        self.backends
            .iter()
            .map(|b| (b, b.settings(&self.defaults)))
            .collect()
    }

    pub fn validate(&self, path: &str) -> Result<()> {
        if self.retry_cooldown_secs == 0 {
            return Err(invalid(
                "retry cooldown must be positive",
                format!("{}.retry_cooldown_secs", path),
                "0",
            ));
        }
        if self.backends.is_empty() {
            return Err(invalid(
                "no backends configured",
                format!("{}.backends", path),
                "[]",
            ));
        }

        let mut names = HashSet::new();
        for (i, backend) in self.backends.iter().enumerate() {
            let at = format!("{}.backends[{}]", path, i);
            if backend.name.trim().is_empty() {
                return Err(invalid("backend name is required", format!("{}.name", at), ""));
            }
            if !names.insert(backend.name.as_str()) {
                return Err(invalid(
                    format!("duplicated backend name: {}", backend.name),
                    format!("{}.name", at),
                    backend.name.clone(),
                ));
            }
            if backend.kind.trim().is_empty() {
                return Err(invalid(
                    format!("{}: type is required", backend.name),
                    format!("{}.type", at),
                    "",
                ));
            }
            backend.settings(&self.defaults).validate(&backend.name, &at)?;
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>, field: String, details: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details)
            .with_source("config_validator"),
    )
}

/// Failover fields that may be left unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_base_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_disable_cycles: Option<u32>,
}

impl FailoverOverrides {
    /// Field by field: self, then `fallback`, then the built-in default.
    pub fn resolve(&self, fallback: &FailoverOverrides) -> FailoverConfig {
        let builtin = FailoverConfig::default();
        FailoverConfig {
            max_failures: self
                .max_failures
                .or(fallback.max_failures)
                .unwrap_or(builtin.max_failures),
            cooldown_base_secs: self
                .cooldown_base_secs
                .or(fallback.cooldown_base_secs)
                .unwrap_or(builtin.cooldown_base_secs),
            max_disable_cycles: self
                .max_disable_cycles
                .or(fallback.max_disable_cycles)
                .unwrap_or(builtin.max_disable_cycles),
        }
    }
}

/// Values merged into every backend that leaves them unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub failover: FailoverOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    /// Factory key, e.g. "openai" or "lingua".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub failover: FailoverOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Free-form settings for the backend factory (endpoint, model, token, ...).
    #[serde(default)]
    pub options: serde_json::Value,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            weight: None,
            timeout_secs: None,
            failover: FailoverOverrides::default(),
            rate_limit: None,
            options: serde_json::Value::Null,
        }
    }

    pub fn settings(&self, defaults: &BackendDefaults) -> BackendSettings {
        BackendSettings {
            weight: self.weight.or(defaults.weight).unwrap_or(1),
            timeout: self
                .timeout_secs
                .or(defaults.timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TIMEOUT),
            failover: self.failover.resolve(&defaults.failover),
            rate_limit: self.rate_limit.or(defaults.rate_limit),
        }
    }

    /// String option, if present.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}
