//! HTTP client for episode pages: browser-like headers, pacing and a page cache

use crate::error::AnimedlError;
use crate::Result;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use reqwest::{Client, ClientBuilder, StatusCode};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Desktop Chrome user agent presented to episode sites
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Accept-Language favoring Spanish-language sites
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "es-ES,es;q=0.9,en;q=0.8";

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout
    pub timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
    pub proxy_url: Option<String>,
    /// Page requests per second; 0 disables pacing
    pub requests_per_second: u32,
    pub burst: u32,
    /// How long fetched markup stays cached
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: BROWSER_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            proxy_url: None,
            requests_per_second: 1,
            burst: 2,
            cache_ttl: Duration::from_secs(600),
            cache_capacity: 256,
        }
    }
}

impl HttpClientConfig {
    /// Header set sent with every page request
    pub fn browser_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("User-Agent", self.user_agent.clone()),
            ("Accept", DEFAULT_ACCEPT.to_string()),
            ("Accept-Language", self.accept_language.clone()),
            ("DNT", "1".to_string()),
            ("Connection", "keep-alive".to_string()),
            ("Upgrade-Insecure-Requests", "1".to_string()),
        ]
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.browser_headers() {
            let value = HeaderValue::from_str(&value).map_err(|e| {
                AnimedlError::InvalidInput(format!("invalid {} header: {}", name, e))
            })?;
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                AnimedlError::InvalidInput(format!("invalid header name {}: {}", name, e))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Build a reqwest client carrying the browser header set
pub fn build_http_client(config: &HttpClientConfig) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .timeout(config.timeout)
        .default_headers(config.header_map()?)
        .cookie_store(true)
        .gzip(true)
        .brotli(true);

    if let Some(proxy_url) = &config.proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| AnimedlError::InvalidInput(format!("proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Fetches episode pages
pub struct PageClient {
    client: Client,
    config: HttpClientConfig,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    cache: Cache<String, Arc<String>>,
}

impl PageClient {
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = build_http_client(&config)?;

        let limiter = NonZeroU32::new(config.requests_per_second).map(|rate| {
            let burst = NonZeroU32::new(config.burst).unwrap_or(rate);
            Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)))
        });

        let cache = Cache::builder()
            .time_to_live(config.cache_ttl)
            .max_capacity(config.cache_capacity)
            .build();

        Ok(Self {
            client,
            config,
            limiter,
            cache,
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Fetch a page body, served from cache when fresh
    pub async fn fetch(&self, url: &str) -> Result<Arc<String>> {
        self.fetch_with_referer(url, None).await
    }

    /// Fetch a page body with an optional Referer
    pub async fn fetch_with_referer(&self, url: &str, referer: Option<&str>) -> Result<Arc<String>> {
        if let Some(body) = self.cache.get(url).await {
            debug!("Page cache hit: {}", url);
            return Ok(body);
        }

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        debug!("GET {}", url);
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Rate limited while fetching {}", url);
            return Err(AnimedlError::RateLimited(format!(
                "HTTP 429 Too Many Requests for {}",
                url
            )));
        }
        if !status.is_success() {
            return Err(AnimedlError::TransientTransferError(format!(
                "HTTP {} for {}",
                status, url
            )));
        }

        let body = Arc::new(response.text().await?);
        self.cache.insert(url.to_string(), body.clone()).await;
        Ok(body)
    }
}
