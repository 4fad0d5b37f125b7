//! Specialized strategy for sites that hide media behind player frames and scripts

use crate::core::progress::ProgressHook;
use crate::core::types::ExtractionResult;
use crate::download::engine::{TransferEngine, TransferReport, TransferSpec};
use crate::error::AnimedlError;
use crate::platform::client::PageClient;
use crate::platform::extractor::{host_matches, Extractor};
use crate::platform::generic::is_rate_limit;
use crate::utils::derive_title_from_url;
use crate::Result;
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const DESCRIPTION_MAX_CHARS: usize = 200;

/// Substrings that disqualify a candidate
const REJECT_MARKERS: &[&str] = &["javascript:", "mailto:"];
const STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".woff", ".woff2",
];
const UNRELATED_DOMAINS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "tiktok.com",
    "discord.gg",
];
/// A candidate must contain one of these
const MEDIA_MARKERS: &[&str] = &[".mp4", ".m3u8", "video", "stream", "player", "embed"];
/// Frames worth following
const FRAME_MARKERS: &[&str] = &["player", "embed"];
/// Anchors worth keeping
const ANCHOR_MARKERS: &[&str] = &[".mp4", ".m3u8", "video"];
const THUMBNAIL_MARKERS: &[&str] = &["thumb", "poster", "cover"];

/// Per-site settings for the embed scraper
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub name: String,
    pub domains: Vec<String>,
    /// Base for resolving relative URLs found in scripts; also the Referer
    pub base_url: Url,
    /// Frame nesting followed below the episode page
    pub max_frame_depth: usize,
    /// Pause before each frame fetch
    pub frame_delay: Duration,
    /// Candidates tried per retrieval
    pub max_candidates: usize,
}

impl SiteProfile {
    pub fn new(name: &str, domains: &[&str], base_url: Url) -> Self {
        Self {
            name: name.to_string(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            base_url,
            max_frame_depth: 1,
            frame_delay: Duration::from_secs(1),
            max_candidates: 3,
        }
    }

    pub fn jkanime() -> Result<Self> {
        Ok(Self::new(
            "jkanime",
            &["jkanime.net"],
            Url::parse("https://jkanime.net/")?,
        ))
    }

    pub fn animeflv() -> Result<Self> {
        Ok(Self::new(
            "animeflv",
            &["animeflv.net", "www3.animeflv.net"],
            Url::parse("https://www3.animeflv.net/")?,
        ))
    }

    pub fn referer(&self) -> &str {
        self.base_url.as_str()
    }
}

struct Selectors {
    heading: Selector,
    title: Selector,
    description: Selector,
    script: Selector,
    frame: Selector,
    anchor: Selector,
    og_image: Selector,
    image: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            heading: parse_selector("h1")?,
            title: parse_selector("title")?,
            description: parse_selector("div.sinopsis, div.description")?,
            script: parse_selector("script")?,
            frame: parse_selector("iframe[src]")?,
            anchor: parse_selector("a[href]")?,
            og_image: parse_selector(r#"meta[property="og:image"]"#)?,
            image: parse_selector("img[src]")?,
        })
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| AnimedlError::Generic(format!("invalid selector {}: {}", css, e)))
}

fn script_patterns() -> Result<Vec<Regex>> {
    [
        r#"(?i)https?://[^"'\s<>]+?\.m3u8(?:\?[^"'\s<>]*)?"#,
        r#"(?i)https?://[^"'\s<>]+?\.mp4(?:\?[^"'\s<>]*)?"#,
        r#"(?i)["'](/[^"'\s<>]*?/playlist\.m3u8[^"'\s<>]*)["']"#,
        r#""file"\s*:\s*"([^"]+)""#,
        r#""url"\s*:\s*"([^"]+)""#,
        r#"source\s*:\s*["']([^"']+)["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).map_err(AnimedlError::from))
    .collect()
}

/// What one document yielded
#[derive(Debug, Default)]
struct PageScan {
    title: Option<String>,
    description: Option<String>,
    thumbnail: Option<String>,
    media: Vec<String>,
    frames: Vec<Url>,
}

/// Scrapes a page, its scripts and its player frames for media URLs
pub struct EmbedScraper {
    profile: SiteProfile,
    client: Arc<PageClient>,
    selectors: Selectors,
    patterns: Vec<Regex>,
}

impl EmbedScraper {
    pub fn new(profile: SiteProfile, client: Arc<PageClient>) -> Result<Self> {
        Ok(Self {
            profile,
            client,
            selectors: Selectors::new()?,
            patterns: script_patterns()?,
        })
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Parse one document. `Html` is not `Send`, so it never outlives this call.
    fn scan(&self, body: &str, page_url: &Url) -> PageScan {
        let document = Html::parse_document(body);
        let mut scan = PageScan::default();

        scan.title = document
            .select(&self.selectors.heading)
            .map(|e| collapse_whitespace(&e.text().collect::<String>()))
            .find(|t| !t.is_empty())
            .or_else(|| {
                document
                    .select(&self.selectors.title)
                    .map(|e| collapse_whitespace(&e.text().collect::<String>()))
                    .find(|t| !t.is_empty())
            });

        scan.description = document
            .select(&self.selectors.description)
            .map(|e| collapse_whitespace(&e.text().collect::<String>()))
            .find(|t| !t.is_empty())
            .map(|t| truncate_chars(&t, DESCRIPTION_MAX_CHARS));

        scan.thumbnail = document
            .select(&self.selectors.og_image)
            .filter_map(|e| e.value().attr("content"))
            .find_map(|src| resolve(src, page_url))
            .or_else(|| {
                document
                    .select(&self.selectors.image)
                    .filter_map(|e| e.value().attr("src"))
                    .filter(|src| contains_any(&src.to_ascii_lowercase(), THUMBNAIL_MARKERS))
                    .find_map(|src| resolve(src, page_url))
            })
            .map(|u| u.to_string());

        for script in document.select(&self.selectors.script) {
            let text = script.text().collect::<String>().replace("\\/", "/");
            if text.trim().is_empty() {
                continue;
            }
            for pattern in &self.patterns {
                for caps in pattern.captures_iter(&text) {
                    let Some(found) = caps.get(1).or_else(|| caps.get(0)) else {
                        continue;
                    };
                    if let Some(url) = resolve(found.as_str(), &self.profile.base_url) {
                        scan.media.push(url.to_string());
                    }
                }
            }
        }

        for frame in document.select(&self.selectors.frame) {
            let Some(src) = frame.value().attr("src") else {
                continue;
            };
            if !contains_any(&src.to_ascii_lowercase(), FRAME_MARKERS) {
                continue;
            }
            if let Some(url) = resolve(src, page_url) {
                scan.frames.push(url);
            }
        }

        for anchor in document.select(&self.selectors.anchor) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if !contains_any(&href.to_ascii_lowercase(), ANCHOR_MARKERS) {
                continue;
            }
            if let Some(url) = resolve(href, page_url) {
                scan.media.push(url.to_string());
            }
        }

        scan
    }

    /// Follow player frames breadth-first up to `max_frame_depth`, never
    /// revisiting a URL. Fetch failures skip the frame.
    async fn walk_frames(&self, page_url: &Url, frames: Vec<Url>) -> Vec<String> {
        let mut media = Vec::new();
        if self.profile.max_frame_depth == 0 {
            return media;
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(page_url.to_string());
        let mut queue: VecDeque<(Url, usize)> = frames.into_iter().map(|f| (f, 1)).collect();

        while let Some((frame, depth)) = queue.pop_front() {
            if !visited.insert(frame.to_string()) {
                continue;
            }

            if !self.profile.frame_delay.is_zero() {
                tokio::time::sleep(self.profile.frame_delay).await;
            }

            let body = match self
                .client
                .fetch_with_referer(frame.as_str(), Some(page_url.as_str()))
                .await
            {
                Ok(body) => body,
                Err(e) => {
                    debug!("Skipping frame {}: {}", frame, e);
                    continue;
                }
            };

            let nested = self.scan(&body, &frame);
            debug!(
                "Frame {} (depth {}) yielded {} references",
                frame,
                depth,
                nested.media.len()
            );
            media.extend(nested.media);

            if depth < self.profile.max_frame_depth {
                queue.extend(nested.frames.into_iter().map(|f| (f, depth + 1)));
            }
        }

        media
    }
}

#[async_trait]
impl Extractor for EmbedScraper {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn domains(&self) -> Vec<String> {
        self.profile.domains.clone()
    }

    fn can_handle(&self, url: &Url) -> bool {
        self.profile.domains.iter().any(|d| host_matches(url, d))
    }

    async fn extract(&self, url: &Url) -> Result<ExtractionResult> {
        info!("Extracting {} with {}", url, self.profile.name);
        let body = self.client.fetch(url.as_str()).await?;
        let scan = self.scan(&body, url);

        let mut found = scan.media;
        found.extend(self.walk_frames(url, scan.frames).await);
        let candidates = filter_candidates(found);
        info!("Found {} candidate URLs", candidates.len());

        let title = scan
            .title
            .or_else(|| derive_title_from_url(url))
            .unwrap_or_else(|| "episode".to_string());

        Ok(
            ExtractionResult::new(url.as_str(), title, candidates, self.profile.name.as_str())?
                .with_description(scan.description.unwrap_or_default())
                .with_thumbnail(scan.thumbnail),
        )
    }

    async fn retrieve(
        &self,
        extraction: &ExtractionResult,
        spec: &TransferSpec,
        engine: &dyn TransferEngine,
        hook: &ProgressHook,
    ) -> Result<TransferReport> {
        let user_agent = self.client.config().user_agent.clone();
        let mut last_error = None;

        for (index, candidate) in extraction
            .candidate_urls
            .iter()
            .take(self.profile.max_candidates)
            .enumerate()
        {
            debug!("Candidate {}: {}", index + 1, candidate);
            let attempt = spec
                .for_url(candidate)
                .with_format("best")
                .with_header("User-Agent", user_agent.as_str())
                .with_header("Referer", self.profile.referer());

            match engine.transfer(&attempt, hook).await {
                Ok(report) => return Ok(report),
                Err(e) if is_rate_limit(&e) => return Err(e),
                Err(e) => {
                    warn!("Candidate {} failed: {}", index + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(AnimedlError::AllCandidatesExhausted(match last_error {
            Some(e) => e.to_string(),
            None => "no candidates".to_string(),
        }))
    }
}

/// Resolve a raw reference to an absolute http(s) URL
fn resolve(raw: &str, base: &Url) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let resolved = if let Some(rest) = raw.strip_prefix("//") {
        Url::parse(&format!("{}://{}", base.scheme(), rest)).ok()?
    } else {
        match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => base.join(raw).ok()?,
            Err(_) => return None,
        }
    };
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// Whether a discovered URL is worth handing to the transfer engine
pub fn is_candidate(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    if contains_any(&lower, REJECT_MARKERS) {
        return false;
    }
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    if UNRELATED_DOMAINS.iter().any(|d| host_matches(&url, d)) {
        return false;
    }
    let path = url.path().to_ascii_lowercase();
    if STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }
    contains_any(&lower, MEDIA_MARKERS)
}

/// Drop unusable candidates and duplicates, keeping discovery order
pub fn filter_candidates(found: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|c| is_candidate(c))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
