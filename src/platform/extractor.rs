//! Site extraction strategy

use crate::core::progress::ProgressHook;
use crate::core::types::ExtractionResult;
use crate::download::engine::{TransferEngine, TransferReport, TransferSpec};
use crate::Result;
use async_trait::async_trait;
use url::Url;

/// A strategy turning an episode page URL into candidate media locations
/// and driving the transfer engine over them.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short identifier, also used as the result's source tag
    fn name(&self) -> &str;

    /// Domains this strategy claims; empty for the generic default
    fn domains(&self) -> Vec<String>;

    fn can_handle(&self, url: &Url) -> bool;

    /// Whether this is the pass-through default strategy
    fn is_generic(&self) -> bool {
        false
    }

    async fn extract(&self, url: &Url) -> Result<ExtractionResult>;

    /// Transfer one of `extraction`'s candidates using `spec` as the base settings
    async fn retrieve(
        &self,
        extraction: &ExtractionResult,
        spec: &TransferSpec,
        engine: &dyn TransferEngine,
        hook: &ProgressHook,
    ) -> Result<TransferReport>;
}

/// Whether `url`'s host is `domain` or one of its subdomains
pub fn host_matches(url: &Url, domain: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_matches() {
        let url = Url::parse("https://www.JKAnime.net/show/1/").unwrap();
        assert!(host_matches(&url, "jkanime.net"));
        let url = Url::parse("https://jkanime.net/").unwrap();
        assert!(host_matches(&url, "jkanime.net"));
        let url = Url::parse("https://notjkanime.net/").unwrap();
        assert!(!host_matches(&url, "jkanime.net"));
        let url = Url::parse("https://127.0.0.1:8080/x").unwrap();
        assert!(host_matches(&url, "127.0.0.1"));
    }
}
