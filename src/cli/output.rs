//! Output formatting and progress display

use crate::cli::args::VerbosityLevel;
use crate::core::batch::{BatchCallback, BatchProgress};
use crate::core::progress::{
    format_bytes, format_duration, ProgressCallback, ProgressEvent, ProgressStatus,
};
use crate::core::types::{BatchSummary, DownloadResult, ExtractionResult};
use crate::platform::registry::ExtractorInfo;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Output formatter for animedl
pub struct OutputFormatter {
    verbosity: VerbosityLevel,
    progress_bar: Option<ProgressBar>,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: None,
        }
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    /// Byte progress bar for a single download
    pub fn create_progress_bar(&mut self, total_size: u64) -> Option<ProgressBar> {
        self.install_bar(
            total_size,
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}",
            "Downloading...",
        )
    }

    /// Item counter bar for a batch
    pub fn create_batch_bar(&mut self, total_items: u64) -> Option<ProgressBar> {
        self.install_bar(
            total_items,
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} episodes {msg}",
            "Starting batch...",
        )
    }

    fn install_bar(&mut self, length: u64, template: &str, message: &str) -> Option<ProgressBar> {
        if self.verbosity == VerbosityLevel::Quiet {
            return None;
        }

        let style = ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        let progress_bar = ProgressBar::new(length);
        progress_bar.set_style(style);
        progress_bar.set_message(message.to_string());

        self.progress_bar = Some(progress_bar.clone());
        Some(progress_bar)
    }

    /// Update the byte bar from a normalised progress event
    pub fn update_progress(&self, event: &ProgressEvent) {
        let Some(progress_bar) = &self.progress_bar else {
            return;
        };

        if event.total_bytes > 0 {
            progress_bar.set_length(event.total_bytes);
        }
        progress_bar.set_position(event.downloaded_bytes);

        match event.status {
            ProgressStatus::Downloading => {
                progress_bar.set_message(format!("{:.1}% {}", event.percentage, event.speed_string()))
            }
            ProgressStatus::Finished => progress_bar.set_message("merging..."),
            ProgressStatus::Error => progress_bar.set_message(
                event
                    .message
                    .clone()
                    .unwrap_or_else(|| "transfer error".to_string()),
            ),
        }
    }

    /// Advance the batch bar by one finished item
    pub fn update_batch(&self, progress: &BatchProgress) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_position(progress.completed as u64);
            let mark = if progress.success { "ok" } else { "failed" };
            progress_bar.set_message(format!("{} {}", mark, progress.url));
        } else if self.verbosity == VerbosityLevel::Verbose {
            println!(
                "📥 [{}/{}] {} {}",
                progress.completed,
                progress.total,
                progress.url,
                if progress.success { "✅" } else { "❌" }
            );
        }
    }

    /// Finish progress bar
    pub fn finish_progress(&self, message: &str) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.finish_with_message(message.to_string());
        }
    }


    /// Print success message
    pub fn success(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            println!("✅ {}", message.green());
        }
    }

    /// Print warning message
    pub fn warning(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            eprintln!("⚠️  {}", message.yellow());
        }
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        eprintln!("❌ {}", message.red());
    }

    /// Print debug message
    pub fn debug(&self, message: &str) {
        if self.verbosity == VerbosityLevel::Verbose {
            println!("🐛 {}", message);
        }
    }

    /// Print download start message
    pub fn print_download_start(&self, url: &str, output_dir: &str) {
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }

        println!("🚀 Starting download...");
        println!("🔗 URL: {}", url);
        println!("💾 Output: {}", output_dir);
        println!();
    }

    /// Print batch start message
    pub fn print_batch_start(&self, total: usize, workers: usize, output_dir: &str) {
        if self.verbosity == VerbosityLevel::Quiet {
            return;
        }

        println!("📋 {} episode(s), {} worker(s)", total, workers);
        println!("💾 Output: {}", output_dir);
        println!();
    }

    /// Print the outcome of a single download
    pub fn print_result(&self, result: &DownloadResult) {
        let duration = Duration::from_secs_f64(result.duration_secs.max(0.0));
        if result.success {
            if self.verbosity == VerbosityLevel::Quiet {
                return;
            }
            println!();
            println!("{}", "✅ Download completed!".green().bold());
            if let Some(title) = &result.title {
                println!("📹 {}", title);
            }
            if let Some(path) = &result.output_path {
                println!("💾 Saved to: {}", path.display());
            }
            println!("⏱️  Time: {}", format_duration(duration));
            if result.retries() > 0 {
                println!("🔁 Retries: {}", result.retries());
            }
        } else {
            self.error(&format!(
                "Download failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            ));
            if self.verbosity == VerbosityLevel::Verbose {
                for attempt in &result.attempts {
                    println!(
                        "  attempt {} after {:.0}s: {}",
                        attempt.attempt,
                        attempt.delay_before_secs,
                        attempt.error.as_deref().unwrap_or("ok")
                    );
                }
                if let Some(fallback) = &result.fallback {
                    println!(
                        "  fallback: {}",
                        fallback.error.as_deref().unwrap_or("ok")
                    );
                }
            }
        }
    }

    /// Human report for a finished batch
    pub fn print_summary(&self, summary: &BatchSummary) {
        let rate = format!("{:.1}%", summary.success_rate);
        let rate = if summary.failed == 0 {
            rate.green()
        } else if summary.successful == 0 {
            rate.red()
        } else {
            rate.yellow()
        };

        if self.verbosity != VerbosityLevel::Quiet {
            println!();
            println!("{}", "📊 Batch summary".bold());
            println!("   Total:      {}", summary.total);
            println!("   Successful: {}", summary.successful.to_string().green());
            println!("   Failed:     {}", summary.failed.to_string().red());
            println!("   Success:    {}", rate);
            println!(
                "   Average:    {}",
                format_duration(Duration::from_secs_f64(summary.average_duration_secs.max(0.0)))
            );
            println!(
                "   Elapsed:    {}",
                format_duration(Duration::from_secs_f64(summary.total_duration_secs.max(0.0)))
            );
        }

        self.print_failures(summary);
    }

    /// Failed items with their reasons; shown even in quiet mode
    pub fn print_failures(&self, summary: &BatchSummary) {
        if summary.failed == 0 {
            return;
        }

        eprintln!();
        eprintln!("{}", "Failed downloads:".red().bold());
        for result in summary.failures() {
            let kind = result
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            eprintln!(
                "  ❌ {} [{}] {}",
                result.url,
                kind,
                result.error.as_deref().unwrap_or("")
            );
        }
    }

    /// Print what an extractor found, without downloading
    pub fn print_extraction(&self, extractor: &str, extraction: &ExtractionResult) {
        println!("📹 {}", extraction.title.bold());
        println!("🧩 Extractor: {} ({})", extractor, extraction.source_tag);
        if !extraction.description.is_empty() {
            println!("📝 {}", extraction.description);
        }
        if let Some(thumbnail) = &extraction.thumbnail {
            println!("🖼️  {}", thumbnail);
        }
        println!("📊 {} candidate(s):", extraction.candidate_urls.len());
        for (index, candidate) in extraction.candidate_urls.iter().enumerate() {
            println!("  {}. {}", index + 1, candidate);
        }
    }

    /// Print supported sites
    pub fn print_extractors(&self, extractors: &[ExtractorInfo]) {
        println!("{}", "Supported sites:".bold());
        for info in extractors {
            if info.domains.is_empty() {
                println!("  {:<10} any URL yt-dlp understands", info.name);
            } else {
                println!("  {:<10} {}", info.name, info.domains.join(", "));
            }
        }
    }

    /// Print a value as pretty JSON on stdout
    pub fn print_json<T: Serialize>(&self, value: &T) -> serde_json::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print help text
    pub fn print_help(&self) {
        println!("animedl - anime episode downloader");
        println!();
        println!("Usage: animedl [OPTIONS] <URL>");
        println!("       animedl [OPTIONS] --file <PATH>");
        println!();
        println!("Examples:");
        println!("  animedl https://jkanime.net/show/1/");
        println!("  animedl --quality 1080p --subtitles EPISODE_URL");
        println!("  animedl --file anime_urls.txt --workers 2");
        println!("  animedl --file anime_urls.txt --safe --pause 10s");
        println!("  animedl --info EPISODE_URL");
        println!();
        println!("For more information, run: animedl --help");
    }
}

/// Create a progress callback for the downloader
pub fn create_progress_callback(formatter: Arc<OutputFormatter>) -> ProgressCallback {
    Arc::new(move |event: &ProgressEvent| -> anyhow::Result<()> {
        formatter.update_progress(event);
        Ok(())
    })
}

/// Create a per-item callback for the batch runner
pub fn create_batch_callback(formatter: Arc<OutputFormatter>) -> BatchCallback {
    Arc::new(move |progress: &BatchProgress| -> anyhow::Result<()> {
        formatter.update_batch(progress);
        Ok(())
    })
}
