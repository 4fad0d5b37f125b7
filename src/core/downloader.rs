//! Retrieval orchestrator: one episode from URL to file

use crate::core::progress::{ProgressCallback, ProgressHook, DEFAULT_PROGRESS_THROTTLE};
use crate::core::types::{AttemptOutcome, DownloadResult, EpisodeRequest, ExtractionResult, Quality};
use crate::download::engine::{SubtitleOptions, TransferEngine, TransferReport, TransferSpec};
use crate::download::retry::{RetryConfig, RetryExecutor};
use crate::error::AnimedlError;
use crate::platform::extractor::Extractor;
use crate::platform::registry::ExtractorRegistry;
use crate::utils::{
    sanitize_filename, validate_url, DiskGuard, SpaceCheck, DEFAULT_MAX_FILENAME_LENGTH,
    DEFAULT_MIN_FREE_SPACE,
};
use crate::Result;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Accepted range for the per-episode attempt budget
pub const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u32> = 1..=10;
/// Accepted range for the network timeout, in seconds
pub const TIMEOUT_RANGE_SECS: std::ops::RangeInclusive<u64> = 1..=300;

/// Main downloader configuration
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    pub quality: Quality,
    /// Attempt budget per episode
    pub max_retries: u32,
    /// Subtitle languages and embedding; `write` is the default toggle
    pub subtitles: SubtitleOptions,
    /// Network timeout handed to the engine
    pub timeout: Duration,
    /// Retries the engine may do internally for a single attempt
    pub engine_retries: u32,
    pub rate_limit_bps: Option<u64>,
    pub proxy: Option<String>,
    /// Minimum free space required in the output directory
    pub min_free_space: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            quality: Quality::default(),
            max_retries: 3,
            subtitles: SubtitleOptions::disabled(),
            timeout: Duration::from_secs(30),
            engine_retries: 1,
            rate_limit_bps: None,
            proxy: None,
            min_free_space: DEFAULT_MIN_FREE_SPACE,
        }
    }
}

impl DownloadOptions {
    /// Check bounds on user-supplied settings
    pub fn validate(&self) -> Result<()> {
        if !MAX_RETRIES_RANGE.contains(&self.max_retries) {
            return Err(AnimedlError::InvalidInput(format!(
                "retries must be between {} and {}, got {}",
                MAX_RETRIES_RANGE.start(),
                MAX_RETRIES_RANGE.end(),
                self.max_retries
            )));
        }
        if !TIMEOUT_RANGE_SECS.contains(&self.timeout.as_secs()) {
            return Err(AnimedlError::InvalidInput(format!(
                "timeout must be between {}s and {}s, got {}s",
                TIMEOUT_RANGE_SECS.start(),
                TIMEOUT_RANGE_SECS.end(),
                self.timeout.as_secs()
            )));
        }
        if self.subtitles.write && self.subtitles.languages.is_empty() {
            return Err(AnimedlError::InvalidInput(
                "subtitles enabled without any language".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main downloader struct
pub struct Downloader {
    options: DownloadOptions,
    registry: Arc<ExtractorRegistry>,
    engine: Arc<dyn TransferEngine>,
    progress: Option<ProgressCallback>,
    progress_throttle: Duration,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(registry: Arc<ExtractorRegistry>, engine: Arc<dyn TransferEngine>) -> Self {
        Self {
            options: DownloadOptions::default(),
            registry,
            engine,
            progress: None,
            progress_throttle: DEFAULT_PROGRESS_THROTTLE,
            retry: RetryConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    /// Set output directory
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.output_dir = path.into();
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.options.quality = quality;
        self
    }

    /// Set maximum retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    pub fn with_subtitles(mut self, subtitles: SubtitleOptions) -> Self {
        self.options.subtitles = subtitles;
        self
    }

    /// Set HTTP timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    /// Set rate limit
    pub fn with_rate_limit(mut self, bytes_per_second: u64) -> Self {
        self.options.rate_limit_bps = Some(bytes_per_second);
        self
    }

    pub fn with_min_free_space(mut self, bytes: u64) -> Self {
        self.options.min_free_space = bytes;
        self
    }

    /// Set progress callback
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_progress_throttle(mut self, throttle: Duration) -> Self {
        self.progress_throttle = throttle;
        self
    }

    /// Replace the backoff schedule; the attempt budget still comes from each request
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request for `url` carrying this downloader's defaults
    pub fn request_for(&self, url: Url) -> EpisodeRequest {
        EpisodeRequest::new(url, &self.options.output_dir)
            .with_quality(self.options.quality)
            .with_subtitles(self.options.subtitles.write)
            .with_max_retries(self.options.max_retries)
    }

    /// Resolve a URL to its extraction record without transferring anything
    pub async fn resolve(&self, raw_url: &str) -> Result<(String, ExtractionResult)> {
        let url = validate_url(raw_url)?;
        let extractor = self.registry.dispatch(&url);
        let extraction = extractor.extract(&url).await?;
        Ok((extractor.name().to_string(), extraction))
    }

    /// Validate and download a single URL string
    pub async fn download_url(&self, raw_url: &str) -> DownloadResult {
        match validate_url(raw_url) {
            Ok(url) => self.download(&self.request_for(url)).await,
            Err(e) => {
                warn!("Rejected {}: {}", raw_url, e);
                DownloadResult::failed(raw_url, &e, 0.0)
            }
        }
    }

    /// Run one episode through space check, resolution, attempts and fallback
    pub async fn download(&self, request: &EpisodeRequest) -> DownloadResult {
        let started = Instant::now();
        let url = request.url.to_string();
        let fail = |error: AnimedlError| {
            warn!("{} failed: {}", url, error);
            DownloadResult::failed(&url, &error, started.elapsed().as_secs_f64())
        };

        // Init
        if let Err(e) = request.validate() {
            return fail(e);
        }
        if self.cancel.is_cancelled() {
            return fail(AnimedlError::Cancelled);
        }
        if let Err(e) = std::fs::create_dir_all(&request.target_directory) {
            return fail(AnimedlError::InvalidInput(format!(
                "cannot create {}: {}",
                request.target_directory.display(),
                e
            )));
        }

        // SpaceCheck
        if let SpaceCheck::Insufficient {
            available,
            required,
        } = DiskGuard::new(self.options.min_free_space).check(&request.target_directory)
        {
            return fail(AnimedlError::InsufficientSpace {
                available,
                required,
            });
        }

        // Resolving
        let extractor = self.registry.dispatch(&request.url);
        info!("Downloading {} with {} extractor", url, extractor.name());
        let hook = ProgressHook::new(self.progress.clone()).with_throttle(self.progress_throttle);

        let extraction = match extractor.extract(&request.url).await {
            Ok(extraction) => extraction,
            Err(AnimedlError::NoCandidatesFound(page)) if !extractor.is_generic() => {
                warn!("No candidates on {}, trying the generic engine once", page);
                return self.generic_once(request, &hook, started).await;
            }
            Err(e) => {
                let mut result = fail(e);
                result.extractor = extractor.name().to_string();
                return result;
            }
        };
        debug!(
            "{} candidate(s) from {}",
            extraction.candidate_urls.len(),
            extraction.source_tag
        );

        // Attempting
        let spec = self.transfer_spec(request, &extraction, extractor.as_ref());
        let report = self
            .attempt_all(request, extractor.clone(), &extraction, &spec, &hook)
            .await;

        let mut result = DownloadResult {
            url: url.clone(),
            success: false,
            error: None,
            error_kind: None,
            duration_secs: 0.0,
            extractor: extractor.name().to_string(),
            title: Some(extraction.title.clone()),
            output_path: None,
            attempts: report.attempts,
            fallback: None,
        };

        let error = match report.outcome {
            Ok(transfer) => return finish_success(result, transfer, started),
            Err(e) => e,
        };

        // Falling back
        let cancelled = matches!(error, AnimedlError::Cancelled) || self.cancel.is_cancelled();
        let final_error = if cancelled {
            AnimedlError::Cancelled
        } else if extractor.is_generic() || error.is_fail_fast() {
            error
        } else {
            info!(
                "{} exhausted its attempts, falling back to the generic engine",
                extractor.name()
            );
            let fallback_spec = spec.clone();
            let fallback_started = Instant::now();
            let outcome = self
                .registry
                .generic()
                .fallback(
                    &extraction,
                    &fallback_spec,
                    request.url.as_str(),
                    self.engine.as_ref(),
                    &hook,
                    &self.cancel,
                )
                .await;
            let attempt = result.attempts.len() as u32 + 1;
            result.fallback = Some(outcome_record(attempt, &outcome, fallback_started));
            match outcome {
                Ok(transfer) => return finish_success(result, transfer, started),
                Err(AnimedlError::Cancelled) => AnimedlError::Cancelled,
                Err(fallback_error) => AnimedlError::AllCandidatesExhausted(format!(
                    "{}; fallback: {}",
                    error, fallback_error
                )),
            }
        };

        warn!("{} failed: {}", url, final_error);
        result.error = Some(final_error.to_string());
        result.error_kind = Some(final_error.kind());
        result.duration_secs = started.elapsed().as_secs_f64();
        result
    }

    /// Base transfer settings for an episode
    fn transfer_spec(
        &self,
        request: &EpisodeRequest,
        extraction: &ExtractionResult,
        extractor: &dyn Extractor,
    ) -> TransferSpec {
        let mut spec = TransferSpec::new(extraction.primary(), &request.target_directory)
            .with_format(request.quality.format_filter());
        if !extractor.is_generic() {
            spec = spec.with_title(sanitize_filename(
                &extraction.title,
                DEFAULT_MAX_FILENAME_LENGTH,
            ));
        }
        spec.subtitles = SubtitleOptions {
            write: request.enable_subtitles,
            ..self.options.subtitles.clone()
        };
        spec.timeout = self.options.timeout;
        spec.retries = self.options.engine_retries;
        spec.rate_limit_bps = self.options.rate_limit_bps;
        spec.proxy = self.options.proxy.clone();
        spec
    }

    async fn attempt_all(
        &self,
        request: &EpisodeRequest,
        extractor: Arc<dyn Extractor>,
        extraction: &ExtractionResult,
        spec: &TransferSpec,
        hook: &ProgressHook,
    ) -> crate::download::retry::RetryReport {
        let executor = RetryExecutor::with_config(RetryConfig {
            max_retries: request.max_retries,
            ..self.retry.clone()
        });
        let engine: &dyn TransferEngine = self.engine.as_ref();

        executor
            .run(&self.cancel, request.enable_subtitles, move |ctx| {
                let extractor = extractor.clone();
                let mut attempt_spec = spec.clone();
                attempt_spec.subtitles.write = ctx.subtitles;
                let attempt: BoxFuture<'_, Result<TransferReport>> = Box::pin(async move {
                    extractor
                        .retrieve(extraction, &attempt_spec, engine, hook)
                        .await
                });
                attempt
            })
            .await
    }

    /// Single generic pass for a page that yielded no candidates
    async fn generic_once(
        &self,
        request: &EpisodeRequest,
        hook: &ProgressHook,
        started: Instant,
    ) -> DownloadResult {
        let generic = self.registry.generic();
        let mut result = DownloadResult::failed(
            request.url.as_str(),
            &AnimedlError::NoCandidatesFound(request.url.to_string()),
            0.0,
        );
        result.extractor = generic.name().to_string();

        let outcome = match generic.extract(&request.url).await {
            Ok(_) if self.cancel.is_cancelled() => Err(AnimedlError::Cancelled),
            Ok(extraction) => {
                let spec = self.transfer_spec(request, &extraction, generic);
                let fallback_started = Instant::now();
                let outcome = generic
                    .retrieve(&extraction, &spec, self.engine.as_ref(), hook)
                    .await;
                result.fallback = Some(outcome_record(1, &outcome, fallback_started));
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(transfer) => finish_success(result, transfer, started),
            Err(e) => {
                let error = match e {
                    AnimedlError::Cancelled => AnimedlError::Cancelled,
                    e => AnimedlError::AllCandidatesExhausted(format!(
                        "no candidates on page; generic fallback: {}",
                        e
                    )),
                };
                warn!("{} failed: {}", request.url, error);
                result.error = Some(error.to_string());
                result.error_kind = Some(error.kind());
                result.duration_secs = started.elapsed().as_secs_f64();
                result
            }
        }
    }
}

fn outcome_record(
    attempt: u32,
    outcome: &Result<TransferReport>,
    started: Instant,
) -> AttemptOutcome {
    AttemptOutcome {
        attempt,
        success: outcome.is_ok(),
        error_kind: outcome.as_ref().err().map(AnimedlError::kind),
        error: outcome.as_ref().err().map(|e| e.to_string()),
        delay_before_secs: 0.0,
        duration_secs: started.elapsed().as_secs_f64(),
        bytes_transferred: outcome.as_ref().ok().and_then(|r| r.bytes),
    }
}

fn finish_success(
    mut result: DownloadResult,
    transfer: TransferReport,
    started: Instant,
) -> DownloadResult {
    result.success = true;
    result.error = None;
    result.error_kind = None;
    result.output_path = transfer.path;
    result.duration_secs = started.elapsed().as_secs_f64();
    info!(
        "Finished {} in {:.1}s after {} attempt(s)",
        result.url,
        result.duration_secs,
        result.attempts.len().max(1)
    );
    result
}
