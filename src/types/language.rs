use super::DetectResponse;
use crate::error::BackendError;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};

/// Which detected source languages are worth translating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLanguageConfig {
    /// Minimum detection confidence, in `(0, 1]`.
    pub confidence_threshold: f64,
    /// ISO 639-1 codes.
    pub langs: Vec<String>,
}

impl SourceLanguageConfig {
    pub fn validate(&self, field_path: &str) -> Result<()> {
        if self.langs.is_empty() {
            return Err(Error::configuration_with_context(
                "no source languages configured",
                ErrorContext::new()
                    .with_field_path(format!("{}.langs", field_path))
                    .with_source("config_validator"),
            ));
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(Error::configuration_with_context(
                "confidence threshold must be in (0, 1]",
                ErrorContext::new()
                    .with_field_path(format!("{}.confidence_threshold", field_path))
                    .with_details(self.confidence_threshold.to_string())
                    .with_source("config_validator"),
            ));
        }
        Ok(())
    }
}

/// Turns detections outside the configured languages, or below the
/// confidence threshold, into a rejected (non-retryable) backend error.
#[derive(Debug, Clone)]
pub struct SourceLanguageFilter {
    threshold: f64,
    langs: Vec<String>,
}

impl SourceLanguageFilter {
    pub fn new(cfg: &SourceLanguageConfig) -> Self {
        Self {
            threshold: cfg.confidence_threshold,
            langs: cfg.langs.iter().map(|l| l.to_ascii_lowercase()).collect(),
        }
    }

    pub fn accepts(&self, detection: &DetectResponse) -> bool {
        detection.confidence >= self.threshold
            && self
                .langs
                .iter()
                .any(|l| l.eq_ignore_ascii_case(&detection.language))
    }

    pub fn check(&self, detection: &DetectResponse) -> std::result::Result<(), BackendError> {
        if self.accepts(detection) {
            Ok(())
        } else {
            Err(BackendError::rejected(format!(
                "supported language not detected (got '{}' at {:.2})",
                detection.language, detection.confidence
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SourceLanguageConfig {
        SourceLanguageConfig {
            confidence_threshold: 0.5,
            langs: vec!["ja".into(), "KO".into()],
        }
    }

    #[test]
    fn test_filter_accepts_configured_language() {
        let f = SourceLanguageFilter::new(&cfg());
        assert!(f.accepts(&DetectResponse::new("ja", 0.9)));
        assert!(f.accepts(&DetectResponse::new("ko", 0.5)));
    }

    #[test]
    fn test_filter_rejects_low_confidence_and_other_languages() {
        let f = SourceLanguageFilter::new(&cfg());
        let err = f.check(&DetectResponse::new("ja", 0.49)).unwrap_err();
        assert!(err.is_rejected());
        assert!(f.check(&DetectResponse::new("en", 0.99)).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(cfg().validate("source_language").is_ok());

        let mut bad = cfg();
        bad.confidence_threshold = 0.0;
        let err = bad.validate("source_language").unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("source_language.confidence_threshold")
        );

        let mut bad = cfg();
        bad.confidence_threshold = 1.5;
        assert!(bad.validate("source_language").is_err());

        let mut bad = cfg();
        bad.langs.clear();
        assert!(bad.validate("source_language").is_err());
    }
}
