use crate::backend::{Backend, CallContext, DynBackend};
use crate::error::BackendError;
use crate::types::{DetectRequest, DetectResponse, SourceLanguageFilter, TokenUsage};
use async_trait::async_trait;

/// Detector decorator that rejects detections the filter does not accept.
///
/// The rejection is a [`BackendError::rejected`], so with the default error
/// classification it neither counts against the detector's failover state nor
/// triggers a retry.
pub struct SourceFiltered {
    inner: DynBackend<DetectRequest, DetectResponse>,
    filter: SourceLanguageFilter,
}

impl SourceFiltered {
    pub fn new(inner: DynBackend<DetectRequest, DetectResponse>, filter: SourceLanguageFilter) -> Self {
        Self { inner, filter }
    }
}

#[async_trait]
impl Backend for SourceFiltered {
    type Request = DetectRequest;
    type Response = DetectResponse;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(
        &self,
        ctx: &CallContext,
        request: &DetectRequest,
    ) -> Result<DetectResponse, BackendError> {
        let detection = self.inner.invoke(ctx, request).await?;
        self.filter.check(&detection)?;
        tracing::debug!(
            backend = %self.inner.name(),
            trace_id = %request.trace_id,
            language = %detection.language,
            confidence = detection.confidence,
            "source language accepted"
        );
        Ok(detection)
    }

    fn token_usage(&self, response: &DetectResponse) -> Option<TokenUsage> {
        self.inner.token_usage(response)
    }
}

impl std::fmt::Debug for SourceFiltered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFiltered")
            .field("backend", &self.inner.name())
            .field("filter", &self.filter)
            .finish()
    }
}
