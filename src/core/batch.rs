//! Batch coordinator over many episode URLs

use crate::core::downloader::Downloader;
use crate::core::types::{BatchSummary, DownloadResult};
use crate::error::AnimedlError;
use crate::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::ops::RangeInclusive;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Worker counts accepted from configuration
pub const WORKERS_RANGE: RangeInclusive<usize> = 1..=10;
/// Workers actually used; target sites throttle beyond this
pub const MAX_WORKERS: usize = 3;
/// Pause between items in safe mode
pub const DEFAULT_SAFE_PAUSE: Duration = Duration::from_secs(5);

/// How batch items are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// One item at a time with a fixed pause between items
    Sequential { pause: Duration },
    /// Bounded worker pool
    Parallel { workers: usize },
}

impl BatchMode {
    /// Sequential mode with the default pause
    pub fn safe() -> Self {
        BatchMode::Sequential {
            pause: DEFAULT_SAFE_PAUSE,
        }
    }

    /// Parallel mode; accepts 1..=10 workers, runs at most `MAX_WORKERS`
    pub fn parallel(workers: usize) -> Result<Self> {
        if !WORKERS_RANGE.contains(&workers) {
            return Err(AnimedlError::InvalidInput(format!(
                "workers must be between {} and {}, got {}",
                WORKERS_RANGE.start(),
                WORKERS_RANGE.end(),
                workers
            )));
        }
        if workers > MAX_WORKERS {
            warn!(
                "{} workers requested, limiting to {} to avoid rate limiting",
                workers, MAX_WORKERS
            );
        }
        Ok(BatchMode::Parallel {
            workers: workers.min(MAX_WORKERS),
        })
    }

    pub fn workers(&self) -> usize {
        match self {
            BatchMode::Sequential { .. } => 1,
            BatchMode::Parallel { workers } => *workers,
        }
    }
}

impl Default for BatchMode {
    fn default() -> Self {
        BatchMode::Sequential {
            pause: Duration::ZERO,
        }
    }
}

/// Snapshot handed to the batch observer after each completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub url: String,
    pub success: bool,
}

pub type BatchCallback = Arc<dyn Fn(&BatchProgress) -> anyhow::Result<()> + Send + Sync>;

pub struct BatchDownloader {
    downloader: Arc<Downloader>,
    mode: BatchMode,
    callback: Option<BatchCallback>,
}

impl BatchDownloader {
    pub fn new(downloader: Arc<Downloader>) -> Self {
        Self {
            downloader,
            mode: BatchMode::default(),
            callback: None,
        }
    }

    pub fn with_mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_callback(mut self, callback: BatchCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Download every URL and summarise. One item's failure never stops the batch.
    pub async fn run(&self, urls: &[String]) -> BatchSummary {
        let started_at = Utc::now();
        let started = Instant::now();
        let total = urls.len();
        info!(
            "Starting batch of {} item(s), {} worker(s)",
            total,
            self.mode.workers()
        );

        let results = match self.mode {
            BatchMode::Sequential { pause } => self.run_sequential(urls, pause).await,
            BatchMode::Parallel { workers } => self.run_parallel(urls, workers).await,
        };

        let summary =
            BatchSummary::from_results(results, started_at, started.elapsed().as_secs_f64());
        info!(
            "Batch finished: {}/{} succeeded ({:.1}%)",
            summary.successful, summary.total, summary.success_rate
        );
        summary
    }

    async fn run_sequential(&self, urls: &[String], pause: Duration) -> Vec<DownloadResult> {
        let cancel = self.downloader.cancellation_token().clone();
        let total = urls.len();
        let mut results = Vec::with_capacity(total);

        for (index, url) in urls.iter().enumerate() {
            let result = self.download_one(url).await;
            self.notify(results.len() + 1, total, &result);
            results.push(result);

            let last = index + 1 == total;
            if !last && !pause.is_zero() && !cancel.is_cancelled() {
                debug!("Pausing {:?} before the next item", pause);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        results
    }

    async fn run_parallel(&self, urls: &[String], workers: usize) -> Vec<DownloadResult> {
        let total = urls.len();
        let mut results = Vec::with_capacity(total);

        let mut completions = stream::iter(urls)
            .map(|url| self.download_one(url))
            .buffer_unordered(workers.max(1));

        while let Some(result) = completions.next().await {
            self.notify(results.len() + 1, total, &result);
            results.push(result);
        }

        results
    }

    async fn download_one(&self, url: &str) -> DownloadResult {
        if self.downloader.cancellation_token().is_cancelled() {
            return DownloadResult::failed(url, &AnimedlError::Cancelled, 0.0);
        }
        self.downloader.download_url(url).await
    }

    fn notify(&self, completed: usize, total: usize, result: &DownloadResult) {
        let Some(callback) = &self.callback else {
            return;
        };

        let progress = BatchProgress {
            completed,
            total,
            url: result.url.clone(),
            success: result.success,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| callback(&progress))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Batch observer failed (ignored): {}", e),
            Err(_) => debug!("Batch observer panicked (ignored)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::engine::testing::{ScriptedEngine, Step};
    use crate::error::ErrorKind;
    use crate::platform::registry::ExtractorRegistry;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    fn downloader(engine: Arc<ScriptedEngine>, dir: &tempfile::TempDir) -> Downloader {
        Downloader::new(Arc::new(ExtractorRegistry::new()), engine)
            .with_output_dir(dir.path())
            .with_min_free_space(0)
            .with_max_retries(1)
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://videos.test/ep{}.mp4", i))
            .collect()
    }

    #[test]
    fn test_parallel_mode_bounds() {
        assert_eq!(BatchMode::parallel(2).unwrap(), BatchMode::Parallel { workers: 2 });
        assert_eq!(BatchMode::parallel(8).unwrap().workers(), MAX_WORKERS);
        assert!(BatchMode::parallel(0).is_err());
        assert!(BatchMode::parallel(11).is_err());
        assert_eq!(BatchMode::safe().workers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_never_exceeds_worker_bound() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::with_default(
            vec![],
            Step::Slow(Duration::from_millis(200)),
        ));
        let batch = BatchDownloader::new(Arc::new(downloader(engine.clone(), &dir)))
            .with_mode(BatchMode::parallel(2).unwrap());

        let summary = batch.run(&urls(6)).await;

        assert_eq!(summary.total, 6);
        assert_eq!(summary.successful, 6);
        assert_eq!(engine.calls(), 6);
        assert_eq!(engine.peak_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_pauses_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![
            Step::Ok(1),
            Step::Fail("Unsupported URL".into()),
            Step::Ok(1),
        ]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: BatchCallback = Arc::new(move |p: &BatchProgress| -> anyhow::Result<()> {
            sink.lock().unwrap().push((p.completed, p.total, p.success));
            Ok(())
        });

        let batch = BatchDownloader::new(Arc::new(downloader(engine.clone(), &dir)))
            .with_mode(BatchMode::Sequential {
                pause: Duration::from_secs(5),
            })
            .with_callback(callback);

        let started = Instant::now();
        let summary = batch.run(&urls(3)).await;

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(engine.peak_in_flight(), 1);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.successful + summary.failed, summary.total);
        assert!((summary.success_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 3, true), (2, 3, false), (3, 3, true)]
        );
    }

    #[tokio::test]
    async fn test_failing_observer_and_invalid_item_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let callback: BatchCallback = Arc::new(|_: &BatchProgress| -> anyhow::Result<()> {
            anyhow::bail!("observer broke")
        });
        let batch = BatchDownloader::new(Arc::new(downloader(engine.clone(), &dir)))
            .with_mode(BatchMode::parallel(3).unwrap())
            .with_callback(callback);

        let mut items = urls(2);
        items.push("not a url".to_string());
        let summary = batch.run(&items).await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 2);
        let failures: Vec<_> = summary.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_kind, Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_cancelled_batch_marks_remaining_items() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let downloader = downloader(engine.clone(), &dir).with_cancellation(cancel);
        let batch = BatchDownloader::new(Arc::new(downloader)).with_mode(BatchMode::safe());

        let summary = batch.run(&urls(3)).await;

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.exit_code(), 2);
        assert!(summary
            .results
            .iter()
            .all(|r| r.error_kind == Some(ErrorKind::Cancelled)));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![]));
        let batch = BatchDownloader::new(Arc::new(downloader(engine, &dir)));
        let summary = batch.run(&[]).await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
    }
}
