pub mod qq;
pub mod registry;
pub mod rtve;
pub mod subtitles;

#[cfg(test)]
mod tests;

use crate::core::error::ResolveResult;
use crate::core::fetch::Fetch;
use crate::core::model::ResolvedMedia;
use crate::core::testcase::TestCase;
use async_trait::async_trait;
use regex::Regex;

/// Shared capabilities handed to a resolver for one resolution call.
pub struct ResolveContext<'a> {
    pub fetch: &'a dyn Fetch,
}

/// One site handler: turns a class of media-page URLs into playable
/// stream URLs plus metadata. Implementations hold their protocol
/// constants as immutable fields set at construction.
#[async_trait]
pub trait SiteResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Anchored pattern deciding which URLs this resolver owns.
    fn url_pattern(&self) -> &Regex;

    fn test_cases(&self) -> &'static [TestCase] {
        &[]
    }

    /// The `id` capture of the URL pattern, when the URL matches.
    fn match_id(&self, url: &str) -> Option<String> {
        self.url_pattern()
            .captures(url)
            .and_then(|caps| caps.name("id"))
            .map(|m| m.as_str().to_string())
    }

    async fn resolve(&self, url: &str, ctx: &ResolveContext<'_>) -> ResolveResult<ResolvedMedia>;
}
