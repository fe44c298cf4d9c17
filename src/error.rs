use std::fmt;
use thiserror::Error;

/// Structured error context for configuration and build failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key that caused the error (e.g., "translation.backends[1].weight")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., the offending value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_validator", "backend_registry")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// How a backend capability failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The capability itself reported an error.
    Failed,
    /// The per-call deadline elapsed before the capability answered.
    Timeout,
    /// The capability panicked; the panic was contained at the dispatch boundary.
    Panicked,
    /// The call worked but the answer is unusable for this request (for example a
    /// detected language outside the configured filter). Not a backend malfunction.
    Rejected,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendErrorKind::Failed => "failed",
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::Panicked => "panicked",
            BackendErrorKind::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Error returned by a backend instance.
#[derive(Debug)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Failed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, message)
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Panicked, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Rejected, message)
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_rejected(&self) -> bool {
        self.kind == BackendErrorKind::Rejected
    }
}

/// Unified error type for the dispatch layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("{component}: {message}")]
    SelectionExhausted { component: String, message: String },

    #[error("{component} '{backend}': rate limiter wait {}", admission_reason(.cancelled))]
    AdmissionTimeout {
        component: String,
        backend: String,
        cancelled: bool,
    },

    #[error("{component} '{backend}': {source}")]
    Backend {
        component: String,
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error("{component}: retries exhausted after {attempts} attempts (last backend: {}): {last}", backend_label(.backend))]
    RetriesExhausted {
        component: String,
        backend: Option<String>,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("{component}: dispatch cancelled (last backend: {})", backend_label(.backend))]
    Cancelled {
        component: String,
        backend: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn admission_reason(cancelled: &bool) -> &'static str {
    if *cancelled {
        "cancelled"
    } else {
        "exceeded deadline"
    }
}

fn backend_label(backend: &Option<String>) -> &str {
    backend.as_deref().unwrap_or("none")
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Name of the backend the error is attributed to, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            Error::AdmissionTimeout { backend, .. } | Error::Backend { backend, .. } => {
                Some(backend)
            }
            Error::RetriesExhausted { backend, .. } | Error::Cancelled { backend, .. } => {
                backend.as_deref()
            }
            _ => None,
        }
    }

    /// The innermost error, looking through `RetriesExhausted`.
    pub fn root(&self) -> &Error {
        match self {
            Error::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    pub fn is_selection_exhausted(&self) -> bool {
        matches!(self.root(), Error::SelectionExhausted { .. })
    }

    pub fn is_admission_timeout(&self) -> bool {
        matches!(self.root(), Error::AdmissionTimeout { .. })
    }

    /// The backend error kind, if the (root) error came from a backend.
    pub fn backend_error_kind(&self) -> Option<BackendErrorKind> {
        match self.root() {
            Error::Backend { source, .. } => Some(source.kind),
            _ => None,
        }
    }
}
