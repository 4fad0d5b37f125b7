//! Command line argument parsing

use crate::core::batch::BatchMode;
use crate::core::downloader::DownloadOptions;
use crate::core::types::Quality;
use crate::download::engine::SubtitleOptions;
use crate::platform::client::HttpClientConfig;
use crate::utils::DEFAULT_MIN_FREE_SPACE;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Anime episode downloader with retry, fallback and batch support
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Episode page or video URL
    #[arg(conflicts_with = "file")]
    pub url: Option<String>,

    /// File with one URL per line ('#' starts a comment)
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Maximum video quality
    #[arg(long, value_enum, default_value = "720p", env = "ANIME_QUALITY")]
    pub quality: Quality,

    /// Output directory (default ~/Downloads/Anime)
    #[arg(short, long, value_name = "DIR", env = "ANIME_DOWNLOAD_PATH")]
    pub output: Option<PathBuf>,

    /// Attempts per episode (1-10)
    #[arg(long, default_value = "3", env = "ANIME_MAX_RETRIES")]
    pub retries: u32,

    /// Parallel workers for batches (1-10, at most 3 are used)
    #[arg(short, long, default_value = "1", env = "ANIME_CONCURRENT")]
    pub workers: usize,

    /// Download batch items one by one with a pause in between
    #[arg(long)]
    pub safe: bool,

    /// Pause between items in safe mode (e.g., 5s)
    #[arg(long, value_name = "DURATION", default_value = "5s")]
    pub pause: humantime::Duration,

    /// Download subtitles
    #[arg(long, env = "ANIME_SUBTITLES")]
    pub subtitles: bool,

    /// Subtitle languages, comma separated
    #[arg(long, value_name = "LANGS", value_delimiter = ',', default_value = "es,en,ja")]
    pub sub_langs: Vec<String>,

    /// Keep subtitles as separate files instead of embedding them
    #[arg(long)]
    pub no_embed_subs: bool,

    /// Network timeout (e.g., 30s, 1m)
    #[arg(long, value_name = "DURATION", default_value = "30s", env = "ANIME_TIMEOUT")]
    pub timeout: humantime::Duration,

    /// Minimum free space required before downloading (e.g., 1GiB, 500MB)
    #[arg(long, value_name = "SIZE")]
    pub min_free_space: Option<String>,

    /// Transfer engine
    #[arg(long, value_enum, default_value = "ytdlp")]
    pub engine: EngineKind,

    /// Path to the yt-dlp executable
    #[arg(long, value_name = "PATH", default_value = "yt-dlp", env = "ANIME_YTDLP")]
    pub ytdlp_path: PathBuf,

    /// Proxy URL (http/https/socks)
    #[arg(long, value_name = "URL", env = "ANIME_PROXY_URL")]
    pub proxy: Option<String>,

    /// Download rate limit (e.g., 2MiB/s, 500KiB/s)
    #[arg(long, value_name = "RATE")]
    pub rate_limit: Option<String>,

    /// Override User-Agent header for page requests
    #[arg(long, value_name = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Disable a site extractor by name (repeatable)
    #[arg(long, value_name = "NAME")]
    pub disable_extractor: Vec<String>,

    /// Resolve the URL and print what would be downloaded
    #[arg(long)]
    pub info: bool,

    /// List supported sites and exit
    #[arg(long)]
    pub list_extractors: bool,

    /// Write a sample URL file and exit
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "anime_urls.txt")]
    pub create_sample: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Disable progress output
    #[arg(long)]
    pub no_progress: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet output (only errors)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Transfer engine selection
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EngineKind {
    /// External yt-dlp process
    Ytdlp,
    /// Direct HTTP streaming of plain media files
    Http,
}

impl Args {
    /// Get HTTP timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        self.timeout.into()
    }

    pub fn pause_duration(&self) -> Duration {
        self.pause.into()
    }

    /// Parse rate limit string to bytes per second
    pub fn parse_rate_limit(&self) -> Option<u64> {
        self.rate_limit
            .as_ref()
            .and_then(|rate| parse_rate_limit(rate))
    }

    /// Free-space floor in bytes, rejecting unparsable sizes
    pub fn min_free_space_bytes(&self) -> Result<u64, String> {
        match &self.min_free_space {
            None => Ok(DEFAULT_MIN_FREE_SPACE),
            Some(raw) if raw.trim() == "0" => Ok(0),
            Some(raw) => parse_size(raw).ok_or_else(|| format!("invalid size '{}'", raw)),
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(default_output_dir)
    }

    /// Whether more than one URL is processed
    pub fn is_batch(&self) -> bool {
        self.file.is_some()
    }

    pub fn subtitle_options(&self) -> SubtitleOptions {
        SubtitleOptions {
            write: self.subtitles,
            languages: self
                .sub_langs
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            embed: !self.no_embed_subs,
        }
    }

    /// Orchestrator settings built from the flags
    pub fn download_options(&self) -> Result<DownloadOptions, String> {
        Ok(DownloadOptions {
            output_dir: self.output_dir(),
            quality: self.quality,
            max_retries: self.retries,
            subtitles: self.subtitle_options(),
            timeout: self.timeout_duration(),
            rate_limit_bps: self.parse_rate_limit(),
            proxy: self.proxy.clone(),
            min_free_space: self.min_free_space_bytes()?,
            ..DownloadOptions::default()
        })
    }

    /// Page client settings built from the flags
    pub fn http_client_config(&self) -> HttpClientConfig {
        let mut config = HttpClientConfig {
            timeout: self.timeout_duration(),
            proxy_url: self.proxy.clone(),
            ..HttpClientConfig::default()
        };
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        config
    }

    pub fn batch_mode(&self) -> crate::Result<BatchMode> {
        if self.safe {
            Ok(BatchMode::Sequential {
                pause: self.pause_duration(),
            })
        } else {
            BatchMode::parallel(self.workers)
        }
    }

    /// Get output verbosity level
    pub fn verbosity_level(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

/// Output verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    /// Quiet (only errors)
    Quiet,
    /// Normal
    Normal,
    /// Verbose (debug info)
    Verbose,
}

/// `~/Downloads/Anime`, or `./downloads` without a home directory
pub fn default_output_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Downloads").join("Anime"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

/// Parse rate limit string to bytes per second
pub fn parse_rate_limit(rate: &str) -> Option<u64> {
    let rate = rate.trim().to_uppercase();
    parse_size(rate.trim_end_matches("/S"))
}

/// Parse a byte size such as `500MB` or `1.5GiB`
pub fn parse_size(size: &str) -> Option<u64> {
    let size = size.trim().to_uppercase();
    if size.is_empty() {
        return None;
    }

    // Find the number and unit
    let mut number_end = 0;
    for (i, c) in size.char_indices() {
        if c.is_ascii_digit() || c == '.' {
            number_end = i + 1;
        } else {
            break;
        }
    }

    if number_end == 0 {
        return None;
    }

    let number_str = &size[..number_end];
    let unit = size[number_end..].trim();

    let number: f64 = number_str.parse().ok()?;
    if number <= 0.0 {
        return None;
    }

    let multiplier = match unit {
        "B" | "" => 1,
        "KB" => 1000,
        "KIB" => 1024,
        "MB" => 1000 * 1000,
        "MIB" => 1024 * 1024,
        "GB" => 1000 * 1000 * 1000,
        "GIB" => 1024 * 1024 * 1024,
        "TB" => 1000_u64.pow(4),
        "TIB" => 1024_u64.pow(4),
        _ => return None,
    };

    Some((number * multiplier as f64) as u64)
}

// Manual Default so tests can build Args with struct update syntax
impl Default for Args {
    fn default() -> Self {
        Self {
            url: None,
            file: None,
            quality: Quality::P720,
            output: None,
            retries: 3,
            workers: 1,
            safe: false,
            pause: humantime::Duration::from(Duration::from_secs(5)),
            subtitles: false,
            sub_langs: vec!["es".to_string(), "en".to_string(), "ja".to_string()],
            no_embed_subs: false,
            timeout: humantime::Duration::from(Duration::from_secs(30)),
            min_free_space: None,
            engine: EngineKind::Ytdlp,
            ytdlp_path: PathBuf::from("yt-dlp"),
            proxy: None,
            rate_limit: None,
            user_agent: None,
            disable_extractor: Vec::new(),
            info: false,
            list_extractors: false,
            create_sample: None,
            json: false,
            no_progress: false,
            verbose: false,
            quiet: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_limit() {
        assert_eq!(parse_rate_limit("1MB/s"), Some(1000 * 1000));
        assert_eq!(parse_rate_limit("1MiB/s"), Some(1024 * 1024));
        assert_eq!(parse_rate_limit("500KB/s"), Some(500 * 1000));
        assert_eq!(parse_rate_limit("1.5MB/s"), Some(1500 * 1000));
        assert_eq!(parse_rate_limit("1mb/s"), Some(1000 * 1000));
        assert_eq!(parse_rate_limit(" 1MB/s "), Some(1000 * 1000));
        assert_eq!(parse_rate_limit("1024"), Some(1024));
        assert_eq!(parse_rate_limit("0"), None);
        assert_eq!(parse_rate_limit(""), None);
        assert_eq!(parse_rate_limit("invalid"), None);
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("1B"), Some(1));
        assert_eq!(parse_size("1KiB"), Some(1024));
        assert_eq!(parse_size("1GiB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size("1TB"), Some(1000_u64.pow(4)));
        assert_eq!(parse_size("0.5MB"), Some(500 * 1000));
        assert_eq!(parse_size("-1MB"), None);
        assert_eq!(parse_size("1XB"), None);
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "animedl",
            "https://jkanime.net/show/1/",
            "--quality",
            "1080p",
            "--retries",
            "5",
            "--subtitles",
            "--sub-langs",
            "en,ja",
            "--timeout",
            "1m",
            "--engine",
            "http",
        ])
        .unwrap();

        assert_eq!(args.url.as_deref(), Some("https://jkanime.net/show/1/"));
        assert_eq!(args.quality, Quality::P1080);
        assert_eq!(args.retries, 5);
        assert_eq!(args.engine, EngineKind::Http);
        assert_eq!(args.timeout_duration(), Duration::from_secs(60));

        let subs = args.subtitle_options();
        assert!(subs.write);
        assert!(subs.embed);
        assert_eq!(subs.languages, vec!["en", "ja"]);
    }

    #[test]
    fn test_create_sample_default_path() {
        let args = Args::try_parse_from(["animedl", "--create-sample"]).unwrap();
        assert_eq!(args.create_sample, Some(PathBuf::from("anime_urls.txt")));
        assert!(args.url.is_none());
    }

    #[test]
    fn test_url_and_file_are_exclusive() {
        let err = Args::try_parse_from(["animedl", "https://jkanime.net/x/1/", "--file", "a.txt"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let args = Args::try_parse_from(["animedl", "--file", "a.txt"]).unwrap();
        assert_eq!(args.file, Some(PathBuf::from("a.txt")));
        assert!(args.url.is_none());
    }

    #[test]
    fn test_args_verbosity_level() {
        let args = Args::default();
        assert_eq!(args.verbosity_level(), VerbosityLevel::Normal);

        let args = Args {
            quiet: true,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(args.verbosity_level(), VerbosityLevel::Quiet);

        let args = Args {
            verbose: true,
            ..Default::default()
        };
        assert_eq!(args.verbosity_level(), VerbosityLevel::Verbose);
    }

    #[test]
    fn test_batch_mode_selection() {
        let args = Args {
            safe: true,
            workers: 3,
            ..Default::default()
        };
        assert_eq!(
            args.batch_mode().unwrap(),
            BatchMode::Sequential {
                pause: Duration::from_secs(5)
            }
        );

        let args = Args {
            workers: 7,
            ..Default::default()
        };
        assert_eq!(args.batch_mode().unwrap(), BatchMode::Parallel { workers: 3 });

        let args = Args {
            workers: 0,
            ..Default::default()
        };
        assert!(args.batch_mode().is_err());
    }

    #[test]
    fn test_download_options_mapping() {
        let args = Args {
            output: Some(PathBuf::from("/tmp/anime")),
            min_free_space: Some("2GB".to_string()),
            rate_limit: Some("1MiB/s".to_string()),
            quality: Quality::P480,
            ..Default::default()
        };
        let options = args.download_options().unwrap();

        assert_eq!(options.output_dir, PathBuf::from("/tmp/anime"));
        assert_eq!(options.min_free_space, 2 * 1000 * 1000 * 1000);
        assert_eq!(options.rate_limit_bps, Some(1024 * 1024));
        assert_eq!(options.quality, Quality::P480);
        assert!(!options.subtitles.write);
        assert!(options.validate().is_ok());

        let args = Args {
            min_free_space: Some("lots".to_string()),
            ..Default::default()
        };
        assert!(args.download_options().is_err());
    }

    #[test]
    fn test_args_default_values() {
        let args = Args::default();
        assert_eq!(args.url, None);
        assert_eq!(args.retries, 3);
        assert_eq!(args.workers, 1);
        assert_eq!(args.quality, Quality::P720);
        assert_eq!(args.engine, EngineKind::Ytdlp);
        assert_eq!(args.min_free_space_bytes().unwrap(), DEFAULT_MIN_FREE_SPACE);
        assert!(!args.is_batch());
        assert!(args.output_dir().ends_with("Anime") || args.output_dir() == PathBuf::from("downloads"));
    }
}
