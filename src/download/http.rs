//! Direct HTTP transfer engine for plain media files

use crate::core::progress::ProgressHook;
use crate::download::engine::{TransferEngine, TransferReport, TransferSpec};
use crate::error::AnimedlError;
use crate::platform::client::HttpClientConfig;
use crate::utils::{derive_title_from_url, ext_from_mime, ext_from_url, is_manifest_url, to_safe_filename};
use crate::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

/// Extension used when neither the URL nor the response names one
const FALLBACK_EXTENSION: &str = "mp4";

/// Rate limiter for controlling download speed
struct RateLimiter {
    bytes_per_second: u64,
    started: Instant,
    bytes_sent: u64,
}

impl RateLimiter {
    fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second,
            started: Instant::now(),
            bytes_sent: 0,
        }
    }

    /// Delay needed so the running average stays under the cap
    fn delay_for(&mut self, bytes: u64) -> Duration {
        self.bytes_sent += bytes;
        if self.bytes_per_second == 0 {
            return Duration::ZERO;
        }
        let due = Duration::from_secs_f64(self.bytes_sent as f64 / self.bytes_per_second as f64);
        due.saturating_sub(self.started.elapsed())
    }

    async fn wait_if_needed(&mut self, bytes: u64) {
        let wait = self.delay_for(bytes);
        if wait > Duration::from_millis(1) {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Streams a single media file to disk through a `.part` file
pub struct HttpEngine {
    client: Client,
}

impl HttpEngine {
    /// Build an engine; the config timeout bounds connecting and each read
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .connect_timeout(config.timeout)
            .user_agent(config.user_agent.as_str());

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| AnimedlError::InvalidInput(format!("proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Final output path for a transfer
    fn output_path(spec: &TransferSpec, url: &Url, content_type: Option<&str>) -> PathBuf {
        let ext = ext_from_url(url)
            .or_else(|| content_type.and_then(ext_from_mime))
            .unwrap_or(FALLBACK_EXTENSION);

        let title = spec
            .title
            .clone()
            .or_else(|| derive_title_from_url(url))
            .unwrap_or_else(|| "video".to_string());

        spec.output_dir.join(to_safe_filename(&title, ext))
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        spec: &TransferSpec,
        part_path: &Path,
        filename: &str,
        hook: &ProgressHook,
    ) -> Result<u64> {
        let total = response.content_length().unwrap_or(0);
        let mut limiter = spec.rate_limit_bps.map(RateLimiter::new);
        let mut file = File::create(part_path).await?;
        let mut stream = response.bytes_stream();
        let started = Instant::now();
        let mut downloaded = 0u64;

        loop {
            let next = tokio::time::timeout(spec.timeout, stream.next())
                .await
                .map_err(|_| {
                    AnimedlError::Engine(format!(
                        "read timed out after {}s",
                        spec.timeout.as_secs()
                    ))
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let elapsed = started.elapsed().as_secs_f64();
            let speed = if elapsed > 0.0 {
                downloaded as f64 / elapsed
            } else {
                0.0
            };
            hook.handle_raw(&json!({
                "status": "downloading",
                "downloaded_bytes": downloaded,
                "total_bytes": total,
                "speed": speed,
                "filename": filename,
            }));

            if let Some(limiter) = limiter.as_mut() {
                limiter.wait_if_needed(chunk.len() as u64).await;
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        if downloaded == 0 {
            return Err(AnimedlError::Engine("empty response body (0 bytes)".to_string()));
        }
        Ok(downloaded)
    }
}

#[async_trait]
impl TransferEngine for HttpEngine {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn transfer(&self, spec: &TransferSpec, hook: &ProgressHook) -> Result<TransferReport> {
        if is_manifest_url(&spec.url) {
            return Err(AnimedlError::InvalidInput(format!(
                "{} is a streaming manifest; use the yt-dlp engine",
                spec.url
            )));
        }
        let url = Url::parse(&spec.url)?;

        info!("Starting download from URL: {}", url);
        let mut request = self.client.get(url.clone());
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AnimedlError::RateLimited(format!(
                "HTTP 429 Too Many Requests for {}",
                url
            )));
        }
        if !status.is_success() {
            return Err(AnimedlError::Engine(format!("HTTP {} for {}", status, url)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let output_path = Self::output_path(spec, &url, content_type.as_deref());
        let filename = output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let part_path = output_path.with_file_name(format!("{}.part", filename));

        match self
            .stream_to_file(response, spec, &part_path, &filename, hook)
            .await
        {
            Ok(bytes) => {
                tokio::fs::rename(&part_path, &output_path).await?;
                hook.handle_raw(&json!({
                    "status": "finished",
                    "downloaded_bytes": bytes,
                    "total_bytes": bytes,
                    "filename": filename,
                }));
                info!("Download completed: {} bytes -> {}", bytes, output_path.display());
                Ok(TransferReport {
                    bytes: Some(bytes),
                    path: Some(output_path),
                })
            }
            Err(e) => {
                warn!("Streaming download failed: {}, cleaning up partial file", e);
                if let Err(cleanup) = tokio::fs::remove_file(&part_path).await {
                    debug!("No partial file removed: {}", cleanup);
                }
                hook.handle_raw(&json!({"status": "error", "error": e.to_string()}));
                Err(e)
            }
        }
    }
}
