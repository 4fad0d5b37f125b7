//! URL utilities: validation, URL list files and title derivation

use crate::error::AnimedlError;
use std::path::Path;
use tracing::{info, warn};
use url::Url;

/// Parse and validate an episode URL (absolute, http(s), with a host)
pub fn validate_url(raw: &str) -> Result<Url, AnimedlError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AnimedlError::InvalidInput("URL is empty".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| AnimedlError::InvalidInput(format!("{}: {}", trimmed, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AnimedlError::InvalidInput(format!(
            "unsupported scheme '{}' in {}",
            parsed.scheme(),
            trimmed
        )));
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(AnimedlError::InvalidInput(format!("missing host in {}", trimmed))),
    }
}

/// Parse a newline-delimited URL list.
///
/// Blank lines and `#` comments are ignored; invalid lines are logged and skipped.
pub fn parse_url_list(content: &str) -> Vec<Url> {
    let mut urls = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match validate_url(line) {
            Ok(url) => urls.push(url),
            Err(e) => warn!("Invalid URL on line {}: {} ({})", index + 1, line, e),
        }
    }

    urls
}

/// Load URLs from a text file, one per line
pub fn load_urls_from_file(path: &Path) -> Result<Vec<Url>, AnimedlError> {
    let content = std::fs::read_to_string(path)?;
    let urls = parse_url_list(&content);
    info!("Loaded {} valid URLs from {}", urls.len(), path.display());
    Ok(urls)
}

const SAMPLE_URLS: &str = "\
# animedl - URL list
# Lines starting with # are comments and are ignored
# One episode URL per line

# https://jkanime.net/some-series/1/
# https://jkanime.net/some-series/2/
# https://www.youtube.com/watch?v=VIDEO_ID
";

/// Write a commented template URL list
pub fn create_sample_urls_file(path: &Path) -> Result<(), AnimedlError> {
    std::fs::write(path, SAMPLE_URLS)?;
    info!("Sample URL file written to {}", path.display());
    Ok(())
}

/// Build a readable title from URL path segments.
///
/// `/dandadan-2nd-season/12/` becomes `Dandadan 2nd Season - Episode 12`.
pub fn derive_title_from_url(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let series = segments.first()?;
    let series = series
        .split(|c| c == '-' || c == '_')
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    if series.is_empty() {
        return None;
    }

    match segments.get(1) {
        Some(episode) => Some(format!("{} - Episode {}", series, episode)),
        None => Some(series),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
