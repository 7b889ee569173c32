//! Resource-blocking rule tables
//!
//! Which URLs a tab refuses to fetch is site policy, produced outside this
//! crate; the driver only consumes the table and pushes the patterns to the
//! transport before navigating. Patterns use the wildcard syntax of the
//! remote protocol (`*` matches any run of characters).

use regex::Regex;

/// Blocking configuration for one navigation target.
#[derive(Debug, Clone, Default)]
pub struct BlockRules {
    /// URL patterns the tab must not fetch.
    pub blocking_urls: Vec<String>,
    /// Requests matching any of these are never blocked, whatever the
    /// blocking patterns say.
    pub must_pass_patterns: Vec<Regex>,
}

impl BlockRules {
    pub fn is_empty(&self) -> bool {
        self.blocking_urls.is_empty()
    }

    pub fn must_pass(&self, url: &str) -> bool {
        self.must_pass_patterns.iter().any(|p| p.is_match(url))
    }
}

/// Per-site lookup of blocking rules.
pub trait BlockRuleTable: Send + Sync {
    fn rules_for(&self, url: &str) -> BlockRules;
}

/// The default table: block nothing.
#[derive(Debug, Default)]
pub struct NoBlockRules;

impl BlockRuleTable for NoBlockRules {
    fn rules_for(&self, _url: &str) -> BlockRules {
        BlockRules::default()
    }
}

/// A fixed rule set applied to every site. Useful for the common case of
/// stripping heavy media from every page.
#[derive(Debug)]
pub struct StaticBlockRules {
    rules: BlockRules,
}

impl StaticBlockRules {
    pub fn new(blocking_urls: Vec<String>) -> Self {
        Self {
            rules: BlockRules {
                blocking_urls,
                must_pass_patterns: Vec::new(),
            },
        }
    }

    pub fn with_must_pass(mut self, patterns: Vec<Regex>) -> Self {
        self.rules.must_pass_patterns = patterns;
        self
    }
}

impl BlockRuleTable for StaticBlockRules {
    fn rules_for(&self, _url: &str) -> BlockRules {
        self.rules.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_block_rules_is_empty() {
        assert!(NoBlockRules.rules_for("https://example.com").is_empty());
    }

    #[test]
    fn must_pass_wins() {
        let rules = StaticBlockRules::new(vec!["*.png".into(), "*.woff2".into()])
            .with_must_pass(vec![Regex::new(r"logo\.png$").expect("regex")]);
        let rules = rules.rules_for("https://example.com");
        assert!(!rules.is_empty());
        assert!(rules.must_pass("https://cdn.example.com/logo.png"));
        assert!(!rules.must_pass("https://cdn.example.com/banner.png"));
    }
}
