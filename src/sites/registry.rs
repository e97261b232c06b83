use crate::core::testcase::TestCase;
use crate::sites::SiteResolver;

/// Ordered catalog of all site resolvers. Dispatch is first-match-wins in
/// registration order, so more specific patterns must be registered before
/// more general ones; a later resolver matching the same URL is never
/// consulted.
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn SiteResolver>>,
}

impl ResolverRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self { resolvers: vec![] };

        reg.resolvers.push(Box::new(crate::sites::qq::resolver::QqResolver::new()));
        reg.resolvers.push(Box::new(crate::sites::rtve::resolver::RtveResolver::alacarta()));
        reg.resolvers.push(Box::new(crate::sites::rtve::resolver::RtveResolver::infantil()));
        reg.resolvers.push(Box::new(crate::sites::rtve::resolver::RtveLiveResolver::new()));

        reg
    }

    /// First resolver whose pattern matches. `None` means "no handler",
    /// which is for the caller to judge, not an error here.
    pub fn find(&self, url: &str) -> Option<&dyn SiteResolver> {
        self.resolvers
            .iter()
            .map(|r| r.as_ref())
            .find(|r| r.url_pattern().is_match(url))
    }

    pub fn resolvers(&self) -> impl Iterator<Item = &dyn SiteResolver> {
        self.resolvers.iter().map(|r| r.as_ref())
    }

    /// Every test case in registration order, with its 0-based index
    /// within its resolver. Feeds the maintenance tooling.
    pub fn test_cases(&self) -> Vec<(&'static str, usize, &TestCase)> {
        self.resolvers()
            .flat_map(|r| {
                r.test_cases()
                    .iter()
                    .enumerate()
                    .map(move |(idx, tc)| (r.name(), idx, tc))
            })
            .collect()
    }

    /// Stable per-case test identifier for the case covering `url`,
    /// e.g. `test_rtve_alacarta_1`.
    pub fn find_test_name(&self, url: &str) -> Option<String> {
        self.test_cases().into_iter().find(|(_, _, tc)| tc.url == url).map(
            |(name, idx, _)| {
                let key = name.replace(':', "_");
                if idx == 0 {
                    format!("test_{key}")
                } else {
                    format!("test_{key}_{idx}")
                }
            },
        )
    }

    /// Dispatch-overlap audit: every test-case URL must dispatch back to
    /// the resolver that declared it. Returns one message per violation.
    pub fn dispatch_conflicts(&self) -> Vec<String> {
        let mut conflicts = Vec::new();
        for (name, idx, tc) in self.test_cases() {
            match self.find(tc.url) {
                Some(r) if r.name() == name => {}
                Some(r) => conflicts.push(format!(
                    "{name} case {idx}: {} is shadowed by {}",
                    tc.url,
                    r.name()
                )),
                None => conflicts.push(format!(
                    "{name} case {idx}: {} matches no resolver",
                    tc.url
                )),
            }
        }
        conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_test_case_dispatches_to_its_own_resolver() {
        let reg = ResolverRegistry::with_defaults();
        assert_eq!(reg.dispatch_conflicts(), Vec::<String>::new());
    }

    #[test]
    fn unknown_urls_find_no_handler() {
        let reg = ResolverRegistry::with_defaults();
        assert!(reg.find("https://example.com/watch?v=123").is_none());
        assert!(reg.find("not a url at all").is_none());
    }

    #[test]
    fn match_ids_come_from_the_pattern() {
        let reg = ResolverRegistry::with_defaults();
        let r = reg.find("https://v.qq.com/x/page/y01647bfni0.html").unwrap();
        assert_eq!(r.name(), "qq");
        assert_eq!(
            r.match_id("https://v.qq.com/x/page/y01647bfni0.html").unwrap(),
            "y01647bfni0"
        );
    }

    #[test]
    fn test_names_are_stable_per_case() {
        let reg = ResolverRegistry::with_defaults();
        let name = reg
            .find_test_name("https://v.qq.com/x/page/y01647bfni0.html")
            .unwrap();
        assert_eq!(name, "test_qq");
        assert!(reg.find_test_name("https://example.com/").is_none());
    }
}
