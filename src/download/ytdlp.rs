//! Transfer engine backed by an external `yt-dlp` process

use crate::core::progress::ProgressHook;
use crate::download::engine::{TransferEngine, TransferReport, TransferSpec};
use crate::error::AnimedlError;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Prefix marking machine-readable progress lines on stdout
const PROGRESS_PREFIX: &str = "__ANIMEDL_PROGRESS__";
/// Prefix marking the final output path on stdout
const FILEPATH_PREFIX: &str = "__ANIMEDL_FILE__";
/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 5;

/// Runs `yt-dlp` once per attempt and feeds its progress to the hook
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary: PathBuf,
}

impl YtDlpEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Command-line arguments for one transfer
    pub fn build_args(spec: &TransferSpec) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--no-colors".to_string(),
            "-f".to_string(),
            spec.format.clone(),
            "-P".to_string(),
            spec.output_dir.display().to_string(),
            "-o".to_string(),
            spec.output_template.clone(),
            "--socket-timeout".to_string(),
            spec.timeout.as_secs().max(1).to_string(),
            "--retries".to_string(),
            spec.retries.to_string(),
            "--trim-filenames".to_string(),
            crate::utils::DEFAULT_MAX_FILENAME_LENGTH.to_string(),
            "--windows-filenames".to_string(),
            "--progress-template".to_string(),
            format!("download:{}%(progress)j", PROGRESS_PREFIX),
            "--print".to_string(),
            format!("after_move:{}%(filepath)s", FILEPATH_PREFIX),
        ];

        for (name, value) in &spec.headers {
            args.push("--add-header".to_string());
            args.push(format!("{}:{}", name, value));
        }

        if spec.subtitles.write {
            args.push("--write-subs".to_string());
            args.push("--sub-langs".to_string());
            args.push(spec.subtitles.languages.join(","));
            if spec.subtitles.embed {
                args.push("--embed-subs".to_string());
            }
        }

        if let Some(rate) = spec.rate_limit_bps {
            args.push("--limit-rate".to_string());
            args.push(rate.to_string());
        }

        if let Some(proxy) = &spec.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(spec.url.clone());
        args
    }
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

/// What a single stdout line carried
#[derive(Debug, Clone, PartialEq)]
enum StdoutLine {
    Progress(Value),
    FilePath(PathBuf),
    Other,
}

fn parse_stdout_line(line: &str) -> StdoutLine {
    let line = line.trim();
    if let Some(json) = line.strip_prefix(PROGRESS_PREFIX) {
        return match serde_json::from_str::<Value>(json) {
            Ok(value) => StdoutLine::Progress(value),
            Err(_) => StdoutLine::Other,
        };
    }
    if let Some(path) = line.strip_prefix(FILEPATH_PREFIX) {
        if !path.is_empty() {
            return StdoutLine::FilePath(PathBuf::from(path));
        }
    }
    StdoutLine::Other
}

/// Last few non-empty stderr lines, for error reporting
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

#[async_trait]
impl TransferEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn transfer(&self, spec: &TransferSpec, hook: &ProgressHook) -> Result<TransferReport> {
        let args = Self::build_args(spec);
        debug!("Running {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                // No attempt can succeed without the binary
                std::io::ErrorKind::NotFound => AnimedlError::InvalidInput(format!(
                    "{} not found; install yt-dlp or pass --ytdlp-path",
                    self.binary.display()
                )),
                _ => AnimedlError::Engine(format!(
                    "failed to start {}: {}",
                    self.binary.display(),
                    e
                )),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AnimedlError::Engine("failed to capture stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AnimedlError::Engine("failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move { drain_stderr(&mut stderr).await });

        let mut path = None;
        let mut bytes = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_stdout_line(&line) {
                StdoutLine::Progress(raw) => {
                    if let Some(done) = raw.get("downloaded_bytes").and_then(Value::as_u64) {
                        bytes = Some(done);
                    }
                    hook.handle_raw(&raw);
                }
                StdoutLine::FilePath(p) => path = Some(p),
                StdoutLine::Other => debug!("yt-dlp: {}", line),
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let tail = stderr_tail(&stderr);
            hook.handle_raw(&serde_json::json!({"status": "error", "error": tail}));
            return Err(AnimedlError::Engine(if tail.is_empty() {
                format!("yt-dlp exited with {}", status)
            } else {
                tail
            }));
        }

        if let Some(p) = &path {
            info!("Saved {}", p.display());
        }
        Ok(TransferReport { bytes, path })
    }
}

/// Collect stderr for the failure tail; a read error keeps what arrived before it
async fn drain_stderr<R: AsyncRead + Unpin>(reader: &mut R) -> String {
    let mut raw = Vec::new();
    if let Err(e) = reader.read_to_end(&mut raw).await {
        debug!("Failed to read yt-dlp stderr: {}", e);
    }
    String::from_utf8_lossy(&raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::engine::SubtitleOptions;
    use std::time::Duration;

    fn base_spec() -> TransferSpec {
        let mut spec = TransferSpec::new("https://cdn.example.com/master.m3u8", "/downloads")
            .with_format("best[height<=720]")
            .with_header("Referer", "https://jkanime.net/");
        spec.timeout = Duration::from_secs(30);
        spec.retries = 2;
        spec
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_build_args_core_flags() {
        let args = YtDlpEngine::build_args(&base_spec());

        assert!(has_pair(&args, "-f", "best[height<=720]"));
        assert!(has_pair(&args, "-P", "/downloads"));
        assert!(has_pair(&args, "--socket-timeout", "30"));
        assert!(has_pair(&args, "--retries", "2"));
        assert!(has_pair(&args, "--add-header", "Referer:https://jkanime.net/"));
        assert_eq!(args.last().unwrap(), "https://cdn.example.com/master.m3u8");
        assert!(!args.contains(&"--write-subs".to_string()));
        assert!(!args.contains(&"--proxy".to_string()));
    }

    #[test]
    fn test_build_args_optional_flags() {
        let mut spec = base_spec();
        spec.subtitles = SubtitleOptions {
            write: true,
            ..SubtitleOptions::default()
        };
        spec.rate_limit_bps = Some(1_048_576);
        spec.proxy = Some("socks5://127.0.0.1:9050".to_string());
        spec = spec.with_title("Show 100% Episode 1");

        let args = YtDlpEngine::build_args(&spec);
        assert!(has_pair(&args, "--sub-langs", "es,en,ja"));
        assert!(args.contains(&"--embed-subs".to_string()));
        assert!(has_pair(&args, "--limit-rate", "1048576"));
        assert!(has_pair(&args, "--proxy", "socks5://127.0.0.1:9050"));
        assert!(has_pair(&args, "-o", "Show 100%% Episode 1.%(ext)s"));
    }

    #[test]
    fn test_parse_stdout_line() {
        let line = format!(
            "{}{{\"status\":\"downloading\",\"downloaded_bytes\":10}}",
            PROGRESS_PREFIX
        );
        assert!(matches!(parse_stdout_line(&line), StdoutLine::Progress(_)));

        let line = format!("{}/downloads/ep.mp4", FILEPATH_PREFIX);
        assert_eq!(
            parse_stdout_line(&line),
            StdoutLine::FilePath(PathBuf::from("/downloads/ep.mp4"))
        );

        assert_eq!(parse_stdout_line("[info] whatever"), StdoutLine::Other);
        assert_eq!(
            parse_stdout_line(&format!("{}not json", PROGRESS_PREFIX)),
            StdoutLine::Other
        );
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = "a\n\nb\nc\nd\ne\nERROR: HTTP Error 429: Too Many Requests\n";
        let tail = stderr_tail(stderr);
        assert!(tail.starts_with("b |"));
        assert!(tail.ends_with("Too Many Requests"));
    }

    #[tokio::test]
    async fn test_stderr_read_error_keeps_partial_output() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"ERROR: HTTP Error 429: Too Many Requests\n")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"))
            .build();
        let captured = drain_stderr(&mut reader).await;
        assert_eq!(captured, "ERROR: HTTP Error 429: Too Many Requests\n");
    }

    #[tokio::test]
    async fn test_missing_binary_fails_fast() {
        let engine = YtDlpEngine::new("/nonexistent/animedl-yt-dlp");
        let err = engine
            .transfer(&base_spec(), &ProgressHook::silent())
            .await
            .unwrap_err();
        assert!(matches!(err, AnimedlError::InvalidInput(_)));
        assert!(err.to_string().contains("/nonexistent/animedl-yt-dlp"));
        assert_eq!(
            crate::download::retry::classify_failure(&err, false),
            crate::download::retry::FailureKind::Fatal
        );
    }
}
