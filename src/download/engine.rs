//! Contract between the orchestrator and a byte-level transfer engine

use crate::core::progress::ProgressHook;
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Default output template: `<title>.<ext>` under the target directory
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Default subtitle languages, in preference order
pub const DEFAULT_SUBTITLE_LANGUAGES: &[&str] = &["es", "en", "ja"];

/// Subtitle handling requested for a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleOptions {
    pub write: bool,
    pub languages: Vec<String>,
    pub embed: bool,
}

impl SubtitleOptions {
    pub fn disabled() -> Self {
        Self {
            write: false,
            ..Self::default()
        }
    }
}

impl Default for SubtitleOptions {
    fn default() -> Self {
        Self {
            write: false,
            languages: DEFAULT_SUBTITLE_LANGUAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            embed: true,
        }
    }
}

/// Configuration bundle handed to the engine for one attempt
#[derive(Debug, Clone)]
pub struct TransferSpec {
    pub url: String,
    /// Format selector, e.g. `best[height<=720]`
    pub format: String,
    pub output_dir: PathBuf,
    pub output_template: String,
    /// Sanitized title used when the engine names the file itself
    pub title: Option<String>,
    pub subtitles: SubtitleOptions,
    pub timeout: Duration,
    /// Engine-internal retries for fragments; the orchestrator owns episode retries
    pub retries: u32,
    pub headers: Vec<(String, String)>,
    pub rate_limit_bps: Option<u64>,
    pub proxy: Option<String>,
}

impl TransferSpec {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            format: "best".to_string(),
            output_dir: output_dir.into(),
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            title: None,
            subtitles: SubtitleOptions::disabled(),
            timeout: Duration::from_secs(30),
            retries: 1,
            headers: Vec::new(),
            rate_limit_bps: None,
            proxy: None,
        }
    }

    /// Copy of this spec pointed at another URL
    pub fn for_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Name the output after `title`, which must already be sanitized
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.output_template = format!("{}.%(ext)s", title.replace('%', "%%"));
        self.title = Some(title);
        self
    }

    /// Set a header, replacing any existing value with the same name
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a successful transfer produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: Option<u64>,
    pub path: Option<PathBuf>,
}

/// A component that moves bytes for a resolved media URL.
///
/// Failures are returned as errors whose message is inspected for
/// rate-limit and subtitle signatures by the retry policy.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transfer(&self, spec: &TransferSpec, hook: &ProgressHook) -> Result<TransferReport>;
}
