//! Request and result records shared by the orchestrator and batch runner

use crate::error::{AnimedlError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Default per-episode attempt budget
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Requested maximum video height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum Quality {
    #[serde(rename = "480p")]
    #[value(name = "480p")]
    P480,
    #[serde(rename = "720p")]
    #[value(name = "720p")]
    P720,
    #[serde(rename = "1080p")]
    #[value(name = "1080p")]
    P1080,
    #[serde(rename = "best")]
    #[value(name = "best")]
    Best,
}

impl Quality {
    /// Height cap in pixels, `None` for best available
    pub fn max_height(&self) -> Option<u32> {
        match self {
            Quality::P480 => Some(480),
            Quality::P720 => Some(720),
            Quality::P1080 => Some(1080),
            Quality::Best => None,
        }
    }

    /// Format selector understood by the transfer engine
    pub fn format_filter(&self) -> String {
        match self.max_height() {
            Some(height) => format!("best[height<={}]", height),
            None => "best".to_string(),
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::P720
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max_height() {
            Some(height) => write!(f, "{}p", height),
            None => f.write_str("best"),
        }
    }
}

impl FromStr for Quality {
    type Err = AnimedlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "480" | "480p" => Ok(Quality::P480),
            "720" | "720p" => Ok(Quality::P720),
            "1080" | "1080p" => Ok(Quality::P1080),
            "best" => Ok(Quality::Best),
            other => Err(AnimedlError::InvalidInput(format!(
                "unknown quality '{}', expected 480p, 720p, 1080p or best",
                other
            ))),
        }
    }
}

/// One episode to fetch
#[derive(Debug, Clone)]
pub struct EpisodeRequest {
    pub url: Url,
    pub target_directory: PathBuf,
    pub quality: Quality,
    pub enable_subtitles: bool,
    pub max_retries: u32,
}

impl EpisodeRequest {
    pub fn new(url: Url, target_directory: impl Into<PathBuf>) -> Self {
        Self {
            url,
            target_directory: target_directory.into(),
            quality: Quality::default(),
            enable_subtitles: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_subtitles(mut self, enable: bool) -> Self {
        self.enable_subtitles = enable;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Reject requests that can never succeed
    pub fn validate(&self) -> Result<(), AnimedlError> {
        if self.max_retries == 0 {
            return Err(AnimedlError::InvalidInput(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.target_directory.as_os_str().is_empty() {
            return Err(AnimedlError::InvalidInput(
                "target directory is empty".to_string(),
            ));
        }
        if self.target_directory.is_file() {
            return Err(AnimedlError::InvalidInput(format!(
                "target {} is a file, not a directory",
                self.target_directory.display()
            )));
        }
        Ok(())
    }
}

/// Metadata and candidate media locations produced by an extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
    /// Ordered by discovery; never empty
    pub candidate_urls: Vec<String>,
    pub source_tag: String,
}

impl ExtractionResult {
    /// Build a result, failing with `NoCandidatesFound` when `candidates` is empty
    pub fn new(
        page: &str,
        title: impl Into<String>,
        candidates: Vec<String>,
        source_tag: impl Into<String>,
    ) -> Result<Self, AnimedlError> {
        if candidates.is_empty() {
            return Err(AnimedlError::NoCandidatesFound(page.to_string()));
        }
        Ok(Self {
            title: title.into(),
            description: String::new(),
            thumbnail: None,
            candidate_urls: candidates,
            source_tag: source_tag.into(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    /// First candidate in discovery order
    pub fn primary(&self) -> &str {
        self.candidate_urls
            .first()
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Record of a single transfer attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    /// 1-based attempt number
    pub attempt: u32,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    /// Backoff slept before this attempt started
    pub delay_before_secs: f64,
    pub duration_secs: f64,
    pub bytes_transferred: Option<u64>,
}

/// Final outcome for one episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub url: String,
    pub success: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration_secs: f64,
    pub extractor: String,
    pub title: Option<String>,
    pub output_path: Option<PathBuf>,
    pub attempts: Vec<AttemptOutcome>,
    /// Single generic pass after a specialized strategy gave up
    pub fallback: Option<AttemptOutcome>,
}

impl DownloadResult {
    /// Failure before any attempt was made
    pub fn failed(url: &str, error: &AnimedlError, duration_secs: f64) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            duration_secs,
            extractor: String::new(),
            title: None,
            output_path: None,
            attempts: Vec::new(),
            fallback: None,
        }
    }

    /// Retries consumed beyond the first attempt
    pub fn retries(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

/// Aggregate of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage in `[0, 100]`; 0 for an empty batch
    pub success_rate: f64,
    /// Mean duration over successful items only
    pub average_duration_secs: f64,
    pub total_duration_secs: f64,
    pub started_at: DateTime<Utc>,
    pub results: Vec<DownloadResult>,
}

impl BatchSummary {
    pub fn from_results(
        results: Vec<DownloadResult>,
        started_at: DateTime<Utc>,
        total_duration_secs: f64,
    ) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let failed = total - successful;

        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };

        let average_duration_secs = if successful == 0 {
            0.0
        } else {
            results
                .iter()
                .filter(|r| r.success)
                .map(|r| r.duration_secs)
                .sum::<f64>()
                / successful as f64
        };

        Self {
            total,
            successful,
            failed,
            success_rate,
            average_duration_secs,
            total_duration_secs,
            started_at,
            results,
        }
    }

    /// Failed items with their reasons
    pub fn failures(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// 0 = all succeeded, 1 = partial failure, 2 = nothing succeeded
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            0
        } else if self.successful > 0 {
            1
        } else {
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool, duration: f64) -> DownloadResult {
        let mut r = DownloadResult::failed(
            "https://example.com/ep",
            &AnimedlError::TransientTransferError("x".into()),
            duration,
        );
        if success {
            r.success = true;
            r.error = None;
            r.error_kind = None;
        }
        r
    }

    #[test]
    fn test_quality_parsing_and_filter() {
        assert_eq!("720p".parse::<Quality>().unwrap(), Quality::P720);
        assert_eq!("1080".parse::<Quality>().unwrap(), Quality::P1080);
        assert_eq!("BEST".parse::<Quality>().unwrap(), Quality::Best);
        assert!("4k".parse::<Quality>().is_err());

        assert_eq!(Quality::P480.format_filter(), "best[height<=480]");
        assert_eq!(Quality::Best.format_filter(), "best");
        assert_eq!(Quality::default(), Quality::P720);
        assert_eq!(Quality::P1080.to_string(), "1080p");
    }

    #[test]
    fn test_episode_request_validation() {
        let url = Url::parse("https://jkanime.net/show/1/").unwrap();
        let dir = tempfile::tempdir().unwrap();

        assert!(EpisodeRequest::new(url.clone(), dir.path()).validate().is_ok());
        assert!(matches!(
            EpisodeRequest::new(url.clone(), dir.path())
                .with_max_retries(0)
                .validate(),
            Err(AnimedlError::InvalidInput(_))
        ));

        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        assert!(EpisodeRequest::new(url, &file).validate().is_err());
    }

    #[test]
    fn test_extraction_result_requires_candidates() {
        let err = ExtractionResult::new("https://site/ep", "t", vec![], "jkanime").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCandidatesFound);

        let ok = ExtractionResult::new(
            "https://site/ep",
            "t",
            vec!["https://cdn/a.m3u8".into()],
            "jkanime",
        )
        .unwrap();
        assert_eq!(ok.primary(), "https://cdn/a.m3u8");
    }

    #[test]
    fn test_batch_summary_math() {
        let results = vec![
            result(true, 10.0),
            result(false, 99.0),
            result(true, 20.0),
            result(false, 1.0),
        ];
        let summary = BatchSummary::from_results(results, Utc::now(), 130.0);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.successful + summary.failed, summary.total);
        assert_eq!(summary.success_rate, 50.0);
        assert_eq!(summary.average_duration_secs, 15.0);
        assert_eq!(summary.failures().count(), 2);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_batch_summary_empty_and_exit_codes() {
        let empty = BatchSummary::from_results(vec![], Utc::now(), 0.0);
        assert_eq!(empty.success_rate, 0.0);
        assert_eq!(empty.average_duration_secs, 0.0);
        assert_eq!(empty.exit_code(), 0);

        let all_failed = BatchSummary::from_results(vec![result(false, 1.0)], Utc::now(), 1.0);
        assert_eq!(all_failed.exit_code(), 2);

        let all_ok = BatchSummary::from_results(vec![result(true, 1.0)], Utc::now(), 1.0);
        assert_eq!(all_ok.exit_code(), 0);
        assert_eq!(all_ok.success_rate, 100.0);
    }

    #[test]
    fn test_retries_count() {
        let mut r = result(true, 1.0);
        assert_eq!(r.retries(), 0);
        for attempt in 1..=3 {
            r.attempts.push(AttemptOutcome {
                attempt,
                success: attempt == 3,
                error_kind: None,
                error: None,
                delay_before_secs: 0.0,
                duration_secs: 0.0,
                bytes_transferred: None,
            });
        }
        assert_eq!(r.retries(), 2);
    }
}
