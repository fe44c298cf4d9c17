//! 请求与响应类型：翻译、语种检测及令牌用量。
//!
//! # Types Module
//!
//! Request and response types for the two backend kinds the dispatch layer is
//! instantiated for, plus the token usage they may report.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TranslateRequest`] / [`TranslateResponse`] | Translation calls |
//! | [`DetectRequest`] / [`DetectResponse`] | Language detection calls |
//! | [`TokenUsage`] | Prompt/completion token counts reported by a backend |
//! | [`SourceLanguageFilter`] | Accepts or rejects a detection result |
//!
//! ```rust
//! use babel_dispatch::types::{DispatchRequest, TranslateRequest};
//!
//! let req = TranslateRequest::new("こんにちは");
//! assert_eq!(req.trace_id().len(), 36);
//! ```

pub mod language;

pub use language::{SourceLanguageConfig, SourceLanguageFilter};

use serde::{Deserialize, Serialize};

/// Fresh request trace id (uuid v4).
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Requests routed by a dispatch service carry a trace id for log correlation.
pub trait DispatchRequest: Send + Sync {
    fn trace_id(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self { prompt, completion }
    }

    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub trace_id: String,
}

impl TranslateRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            trace_id: new_trace_id(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}

impl DispatchRequest for TranslateRequest {
    fn trace_id(&self) -> &str {
        &self.trace_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl TranslateResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectRequest {
    pub text: String,
    pub trace_id: String,
}

impl DetectRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            trace_id: new_trace_id(),
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }
}

impl DispatchRequest for DetectRequest {
    fn trace_id(&self) -> &str {
        &self.trace_id
    }
}

/// Most likely language of a text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    /// ISO 639-1 code.
    pub language: String,
    /// In `[0, 1]`.
    pub confidence: f64,
}

impl DetectResponse {
    pub fn new(language: impl Into<String>, confidence: f64) -> Self {
        Self {
            language: language.into(),
            confidence,
        }
    }
}
