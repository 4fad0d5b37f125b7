//! Default strategy: hand the URL straight to the transfer engine

use crate::core::progress::ProgressHook;
use crate::core::types::ExtractionResult;
use crate::download::engine::{TransferEngine, TransferReport, TransferSpec};
use crate::download::retry::{classify_failure, FailureKind};
use crate::error::AnimedlError;
use crate::platform::extractor::Extractor;
use crate::utils::derive_title_from_url;
use crate::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

pub const GENERIC_NAME: &str = "generic";

/// Candidates tried by the one-shot fallback pass
pub const FALLBACK_MAX_CANDIDATES: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct GenericExtractor;

impl GenericExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Single pass over up to `FALLBACK_MAX_CANDIDATES` candidates with a Referer,
    /// used after a specialized strategy has spent its attempts.
    /// Stops before the next candidate once `cancel` fires.
    pub async fn fallback(
        &self,
        extraction: &ExtractionResult,
        spec: &TransferSpec,
        referer: &str,
        engine: &dyn TransferEngine,
        hook: &ProgressHook,
        cancel: &CancellationToken,
    ) -> Result<TransferReport> {
        let mut last_error = None;

        for (index, candidate) in extraction
            .candidate_urls
            .iter()
            .take(FALLBACK_MAX_CANDIDATES)
            .enumerate()
        {
            if cancel.is_cancelled() {
                return Err(AnimedlError::Cancelled);
            }
            info!("Fallback {}: {}", index + 1, candidate);
            let attempt = spec.for_url(candidate).with_header("Referer", referer);
            match engine.transfer(&attempt, hook).await {
                Ok(report) => return Ok(report),
                Err(e) => {
                    warn!("Fallback candidate {} failed: {}", index + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(AnimedlError::AllCandidatesExhausted(match last_error {
            Some(e) => e.to_string(),
            None => "no candidates to fall back on".to_string(),
        }))
    }
}

#[async_trait]
impl Extractor for GenericExtractor {
    fn name(&self) -> &str {
        GENERIC_NAME
    }

    fn domains(&self) -> Vec<String> {
        Vec::new()
    }

    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    fn is_generic(&self) -> bool {
        true
    }

    /// No page fetch: the URL itself is the only candidate
    async fn extract(&self, url: &Url) -> Result<ExtractionResult> {
        let title = derive_title_from_url(url)
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "video".to_string());
        ExtractionResult::new(url.as_str(), title, vec![url.to_string()], GENERIC_NAME)
    }

    async fn retrieve(
        &self,
        extraction: &ExtractionResult,
        spec: &TransferSpec,
        engine: &dyn TransferEngine,
        hook: &ProgressHook,
    ) -> Result<TransferReport> {
        engine.transfer(&spec.for_url(extraction.primary()), hook).await
    }
}

/// Whether an error carries a rate-limit signature
pub(crate) fn is_rate_limit(error: &AnimedlError) -> bool {
    classify_failure(error, false) == FailureKind::RateLimited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::engine::testing::{ScriptedEngine, Step};

    fn extraction(candidates: &[&str]) -> ExtractionResult {
        ExtractionResult::new(
            "https://jkanime.net/show/1/",
            "Show - Episode 1",
            candidates.iter().map(|c| c.to_string()).collect(),
            "jkanime",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_extract_is_pass_through() {
        let url = Url::parse("https://www.youtube.com/watch?v=abc").unwrap();
        let result = GenericExtractor::new().extract(&url).await.unwrap();
        assert_eq!(result.candidate_urls, vec![url.to_string()]);
        assert_eq!(result.source_tag, "generic");
        assert_eq!(result.title, "Watch");
    }

    #[tokio::test]
    async fn test_retrieve_uses_spec_format() {
        let engine = ScriptedEngine::new(vec![Step::Ok(1)]);
        let spec = TransferSpec::new("", "/tmp").with_format("best[height<=720]");
        GenericExtractor::new()
            .retrieve(&extraction(&["https://cdn/a.mp4"]), &spec, &engine, &ProgressHook::silent())
            .await
            .unwrap();

        let seen = engine.seen();
        assert_eq!(seen[0].url, "https://cdn/a.mp4");
        assert_eq!(seen[0].format, "best[height<=720]");
    }

    #[tokio::test]
    async fn test_fallback_caps_candidates_and_sets_referer() {
        let engine = ScriptedEngine::with_default(vec![], Step::Fail("boom".into()));
        let spec = TransferSpec::new("", "/tmp");
        let err = GenericExtractor::new()
            .fallback(
                &extraction(&["https://a/1", "https://a/2", "https://a/3", "https://a/4"]),
                &spec,
                "https://jkanime.net/",
                &engine,
                &ProgressHook::silent(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AnimedlError::AllCandidatesExhausted(_)));
        assert_eq!(engine.calls(), 3);
        assert!(engine
            .seen()
            .iter()
            .all(|s| s.header("referer") == Some("https://jkanime.net/")));
    }

    #[tokio::test]
    async fn test_fallback_stops_at_first_success() {
        let engine = ScriptedEngine::new(vec![Step::Fail("boom".into()), Step::Ok(5)]);
        let report = GenericExtractor::new()
            .fallback(
                &extraction(&["https://a/1", "https://a/2", "https://a/3"]),
                &TransferSpec::new("", "/tmp"),
                "https://jkanime.net/",
                &engine,
                &ProgressHook::silent(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.bytes, Some(5));
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_fallback_stops_once_cancelled() {
        let cancel = CancellationToken::new();
        let engine = ScriptedEngine::new(vec![Step::CancelThenFail(
            cancel.clone(),
            "connection reset".into(),
        )]);
        let err = GenericExtractor::new()
            .fallback(
                &extraction(&["https://a/1", "https://a/2", "https://a/3"]),
                &TransferSpec::new("", "/tmp"),
                "https://jkanime.net/",
                &engine,
                &ProgressHook::silent(),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AnimedlError::Cancelled));
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn test_is_rate_limit() {
        assert!(is_rate_limit(&AnimedlError::Engine("HTTP Error 429".into())));
        assert!(!is_rate_limit(&AnimedlError::Engine("HTTP Error 500".into())));
        assert!(!is_rate_limit(&AnimedlError::Engine(
            "HTTP 404 for https://cdn.test/v/429abc.mp4".into()
        )));
    }
}
