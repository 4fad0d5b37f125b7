//! Ordered strategy table and dispatch

use crate::platform::client::PageClient;
use crate::platform::embed::{EmbedScraper, SiteProfile};
use crate::platform::extractor::Extractor;
use crate::platform::generic::GenericExtractor;
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Constructor for a built-in strategy; failure disables only that strategy
pub type ExtractorFactory = fn(&Arc<PageClient>) -> Result<Arc<dyn Extractor>>;

/// Built-in specialized strategies, in dispatch order
pub const BUILTIN_EXTRACTORS: &[(&str, ExtractorFactory)] =
    &[("jkanime", jkanime_factory), ("animeflv", animeflv_factory)];

fn jkanime_factory(client: &Arc<PageClient>) -> Result<Arc<dyn Extractor>> {
    Ok(Arc::new(EmbedScraper::new(SiteProfile::jkanime()?, client.clone())?))
}

fn animeflv_factory(client: &Arc<PageClient>) -> Result<Arc<dyn Extractor>> {
    Ok(Arc::new(EmbedScraper::new(SiteProfile::animeflv()?, client.clone())?))
}

/// Listing entry for a registered strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractorInfo {
    pub name: String,
    pub domains: Vec<String>,
}

/// Specialized strategies first, the generic default last
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    generic: Arc<GenericExtractor>,
}

impl ExtractorRegistry {
    /// Registry holding only the generic default
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
            generic: Arc::new(GenericExtractor::new()),
        }
    }

    /// Registry with every built-in strategy not named in `disabled`
    pub fn with_builtin(client: Arc<PageClient>, disabled: &[String]) -> Self {
        Self::from_factories(BUILTIN_EXTRACTORS, client, disabled)
    }

    /// Build from a factory table. A failing factory is logged and skipped.
    pub fn from_factories(
        factories: &[(&str, ExtractorFactory)],
        client: Arc<PageClient>,
        disabled: &[String],
    ) -> Self {
        let mut registry = Self::new();
        for (name, factory) in factories {
            if disabled.iter().any(|d| d.eq_ignore_ascii_case(name)) {
                info!("Extractor {} disabled", name);
                continue;
            }
            match factory(&client) {
                Ok(extractor) => registry.register(extractor),
                Err(e) => warn!("Extractor {} unavailable: {}", name, e),
            }
        }
        registry
    }

    /// Append a strategy after those already registered
    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        debug!("Registered extractor {}", extractor.name());
        self.extractors.push(extractor);
    }

    /// First strategy claiming `url`, else the generic default
    pub fn dispatch(&self, url: &Url) -> Arc<dyn Extractor> {
        self.extractors
            .iter()
            .find(|e| e.can_handle(url))
            .cloned()
            .unwrap_or_else(|| self.generic.clone() as Arc<dyn Extractor>)
    }

    pub fn generic(&self) -> &GenericExtractor {
        &self.generic
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Registered strategies in dispatch order, generic last
    pub fn list(&self) -> Vec<ExtractorInfo> {
        self.extractors
            .iter()
            .map(|e| e.as_ref())
            .chain(std::iter::once(self.generic.as_ref() as &dyn Extractor))
            .map(|e| ExtractorInfo {
                name: e.name().to_string(),
                domains: e.domains(),
            })
            .collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnimedlError;
    use crate::platform::client::HttpClientConfig;

    fn client() -> Arc<PageClient> {
        Arc::new(PageClient::with_config(HttpClientConfig::default()).unwrap())
    }

    fn broken_factory(_: &Arc<PageClient>) -> Result<Arc<dyn Extractor>> {
        Err(AnimedlError::Generic("module missing".to_string()))
    }

    #[test]
    fn test_dispatch_prefers_specialized() {
        let registry = ExtractorRegistry::with_builtin(client(), &[]);
        assert_eq!(registry.len(), 2);

        let url = Url::parse("https://jkanime.net/one-piece/1000/").unwrap();
        assert_eq!(registry.dispatch(&url).name(), "jkanime");

        let url = Url::parse("https://www3.animeflv.net/ver/x-1").unwrap();
        assert_eq!(registry.dispatch(&url).name(), "animeflv");

        let url = Url::parse("https://www.youtube.com/watch?v=x").unwrap();
        let chosen = registry.dispatch(&url);
        assert_eq!(chosen.name(), "generic");
        assert!(chosen.is_generic());
    }

    #[test]
    fn test_failing_factory_only_disables_itself() {
        let factories: &[(&str, ExtractorFactory)] =
            &[("broken", broken_factory), ("jkanime", jkanime_factory)];
        let registry = ExtractorRegistry::from_factories(factories, client(), &[]);
        assert_eq!(registry.len(), 1);
        let names: Vec<String> = registry.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["jkanime", "generic"]);
    }

    #[test]
    fn test_disabled_list() {
        let registry = ExtractorRegistry::with_builtin(client(), &["JKAnime".to_string()]);
        let url = Url::parse("https://jkanime.net/one-piece/1000/").unwrap();
        assert!(registry.dispatch(&url).is_generic());
    }

    #[test]
    fn test_empty_registry_dispatches_generic() {
        let registry = ExtractorRegistry::new();
        assert!(registry.is_empty());
        let url = Url::parse("https://example.com/ep").unwrap();
        assert!(registry.dispatch(&url).is_generic());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_generic_dispatch_extracts_without_fetching() {
        let registry = ExtractorRegistry::new();
        let url = Url::parse("https://videos.test/clip.mp4").unwrap();
        let extraction = tokio_test::block_on(registry.dispatch(&url).extract(&url)).unwrap();
        assert_eq!(extraction.primary(), "https://videos.test/clip.mp4");
    }
}
