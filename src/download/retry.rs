//! Retry logic for transfers: failure classification, the two backoff
//! schedules and the attempt loop

use crate::core::types::AttemptOutcome;
use crate::download::engine::TransferReport;
use crate::error::AnimedlError;
use crate::Result;
use futures::future::BoxFuture;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempt budget for one episode
    pub max_retries: u32,
    /// Standard backoff before attempt `n` is `base_delay * 2^n`, capped
    pub base_delay: Duration,
    /// Cap for the standard schedule
    pub max_delay: Duration,
    /// Rate-limit backoff after attempt `n` is `rate_limit_base + n * rate_limit_step`, capped
    pub rate_limit_base: Duration,
    pub rate_limit_step: Duration,
    pub rate_limit_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            rate_limit_base: Duration::from_secs(30),
            rate_limit_step: Duration::from_secs(10),
            rate_limit_max: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt` on the standard path (`min(2^n, 10)` s by default)
    pub fn standard_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay after a rate-limit signal on attempt `attempt` (`min(30 + 10n, 60)` s by default)
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        self.rate_limit_step
            .checked_mul(attempt)
            .and_then(|step| step.checked_add(self.rate_limit_base))
            .unwrap_or(self.rate_limit_max)
            .min(self.rate_limit_max)
    }
}

/// Retry configuration builder
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
        }
    }

    /// Set the attempt budget
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.config.base_delay = base_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.config.max_delay = max_delay;
        self
    }

    /// Set the rate-limit schedule: `base + n * step`, capped at `max`
    pub fn rate_limit(mut self, base: Duration, step: Duration, max: Duration) -> Self {
        self.config.rate_limit_base = base;
        self.config.rate_limit_step = step;
        self.config.rate_limit_max = max;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 429 or "Too Many Requests"
    RateLimited,
    /// Subtitle download failed while subtitles were requested
    Subtitles,
    Transient,
    /// Retrying cannot help
    Fatal,
}

/// A 429 status as engines and servers phrase it, never a bare "429" inside a URL or id
static RATE_LIMIT_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\bhttp\s*(?:error\s*)?429\b|\b(?:status|code)\s*:?\s*429\b|too many requests")
        .ok()
});

fn is_rate_limit_message(message: &str) -> bool {
    match RATE_LIMIT_PATTERN.as_ref() {
        Some(pattern) => pattern.is_match(message),
        None => message.to_ascii_lowercase().contains("too many requests"),
    }
}

/// Classify a failed attempt from its error and message text
pub fn classify_failure(error: &AnimedlError, subtitles_requested: bool) -> FailureKind {
    if matches!(error, AnimedlError::Cancelled) || error.is_fail_fast() {
        return FailureKind::Fatal;
    }
    if matches!(error, AnimedlError::RateLimited(_)) {
        return FailureKind::RateLimited;
    }

    let message = error.to_string();
    if is_rate_limit_message(&message) {
        FailureKind::RateLimited
    } else if subtitles_requested && message.to_ascii_lowercase().contains("subtitle") {
        FailureKind::Subtitles
    } else {
        FailureKind::Transient
    }
}

/// Next step after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        disable_subtitles: bool,
    },
    GiveUp,
}

/// Attempt counter plus the classified-failure branch and delay table
#[derive(Debug, Clone)]
pub struct RetryState {
    config: RetryConfig,
    attempt: u32,
    subtitles: bool,
}

impl RetryState {
    pub fn new(config: RetryConfig, subtitles: bool) -> Self {
        Self {
            config,
            attempt: 0,
            subtitles,
        }
    }

    /// Number of the attempt most recently started (0 before the first)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn subtitles(&self) -> bool {
        self.subtitles
    }

    /// Start the next attempt, or `None` once the budget is spent
    pub fn begin(&mut self) -> Option<u32> {
        if self.attempt >= self.config.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    /// Decide what follows a failure of the current attempt
    pub fn on_failure(&mut self, kind: FailureKind) -> RetryDecision {
        if kind == FailureKind::Fatal || self.attempt >= self.config.max_retries {
            return RetryDecision::GiveUp;
        }

        let next = self.attempt + 1;
        match kind {
            FailureKind::RateLimited => RetryDecision::Retry {
                delay: self.config.rate_limit_delay(self.attempt),
                disable_subtitles: false,
            },
            FailureKind::Subtitles => {
                self.subtitles = false;
                RetryDecision::Retry {
                    delay: self.config.standard_delay(next),
                    disable_subtitles: true,
                }
            }
            _ => RetryDecision::Retry {
                delay: self.config.standard_delay(next),
                disable_subtitles: false,
            },
        }
    }
}

/// Per-attempt inputs handed to the transfer closure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    pub attempt: u32,
    pub subtitles: bool,
}

/// Result of a full attempt sequence
#[derive(Debug)]
pub struct RetryReport {
    pub outcome: Result<TransferReport>,
    pub attempts: Vec<AttemptOutcome>,
}

/// Retry executor
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    pub fn with_config(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `transfer` until it succeeds, fails fatally, the budget runs out
    /// or `cancel` fires. Cancellation is observed before each attempt and
    /// during backoff sleeps.
    pub async fn run<'a, F>(
        &self,
        cancel: &CancellationToken,
        subtitles: bool,
        mut transfer: F,
    ) -> RetryReport
    where
        F: FnMut(AttemptContext) -> BoxFuture<'a, Result<TransferReport>>,
    {
        let mut state = RetryState::new(self.config.clone(), subtitles);
        let mut attempts = Vec::new();
        let mut delay = Duration::ZERO;
        let mut last_error = AnimedlError::InvalidInput("no attempts were made".to_string());

        while let Some(attempt) = state.begin() {
            if let Err(e) = pause(delay, cancel).await {
                return RetryReport {
                    outcome: Err(e),
                    attempts,
                };
            }

            let context = AttemptContext {
                attempt,
                subtitles: state.subtitles(),
            };
            debug!(
                "Attempt {}/{} (subtitles: {})",
                attempt, self.config.max_retries, context.subtitles
            );

            let started = Instant::now();
            let result = transfer(context).await;
            let elapsed = started.elapsed().as_secs_f64();

            match result {
                Ok(report) => {
                    attempts.push(AttemptOutcome {
                        attempt,
                        success: true,
                        error_kind: None,
                        error: None,
                        delay_before_secs: delay.as_secs_f64(),
                        duration_secs: elapsed,
                        bytes_transferred: report.bytes,
                    });
                    return RetryReport {
                        outcome: Ok(report),
                        attempts,
                    };
                }
                Err(error) => {
                    let kind = classify_failure(&error, context.subtitles);
                    let error = normalize_error(error, kind);

                    attempts.push(AttemptOutcome {
                        attempt,
                        success: false,
                        error_kind: Some(error.kind()),
                        error: Some(error.to_string()),
                        delay_before_secs: delay.as_secs_f64(),
                        duration_secs: elapsed,
                        bytes_transferred: None,
                    });

                    match state.on_failure(kind) {
                        RetryDecision::GiveUp => {
                            last_error = error;
                            break;
                        }
                        RetryDecision::Retry {
                            delay: next_delay,
                            disable_subtitles,
                        } => {
                            match kind {
                                FailureKind::RateLimited => warn!(
                                    "Rate limited on attempt {}, cooling down for {}s",
                                    attempt,
                                    next_delay.as_secs()
                                ),
                                _ if disable_subtitles => info!(
                                    "Subtitle download failed, retrying without subtitles"
                                ),
                                _ => warn!(
                                    "Attempt {} failed: {}; retrying in {}s",
                                    attempt,
                                    error,
                                    next_delay.as_secs()
                                ),
                            }
                            delay = next_delay;
                            last_error = error;
                        }
                    }
                }
            }
        }

        RetryReport {
            outcome: Err(last_error),
            attempts,
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep for `delay` unless `cancel` fires first
async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AnimedlError::Cancelled);
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(AnimedlError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Fold raw engine errors into the reported taxonomy
fn normalize_error(error: AnimedlError, kind: FailureKind) -> AnimedlError {
    match (kind, error) {
        (FailureKind::RateLimited, AnimedlError::RateLimited(m)) => AnimedlError::RateLimited(m),
        (FailureKind::RateLimited, other) => AnimedlError::RateLimited(other.to_string()),
        (FailureKind::Fatal, other) => other,
        (_, AnimedlError::Engine(m)) => AnimedlError::TransientTransferError(m),
        (_, other) => other,
    }
}
