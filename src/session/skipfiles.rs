//! Skip-file (blackbox) rules.
//!
//! The engine enforces blackboxing, but a stop can race a source that was
//! announced a moment ago; the session treats a stop inside a skipped source
//! as spurious and resumes it.

use crate::error::Result;
use crate::session::sources::strip_query;
use glob::Pattern;

struct SkipRule {
    pattern: Pattern,
    skip: bool,
}

#[derive(Default)]
pub struct SkipFiles {
    rules: Vec<SkipRule>,
}

impl SkipFiles {
    /// Entries prefixed with `!` negate: matching sources are debugged even
    /// when an earlier rule skips them.
    pub fn new(entries: &[String]) -> Result<Self> {
        let mut rules = Vec::with_capacity(entries.len());
        for entry in entries {
            let (glob, skip) = match entry.strip_prefix('!') {
                Some(negated) => (negated, false),
                None => (entry.as_str(), true),
            };
            rules.push(SkipRule {
                pattern: Pattern::new(glob)?,
                skip,
            });
        }
        Ok(Self { rules })
    }

    /// Whether one candidate string is skipped. Last matching rule wins;
    /// `None` means no rule had an opinion.
    fn matches(&self, candidate: &str) -> Option<bool> {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.pattern.matches(candidate))
            .map(|rule| rule.skip)
    }

    /// Decide for a source. The candidate key is its path when one exists,
    /// else the generated URL, else the URL; query strings never participate.
    pub fn should_skip(
        &self,
        path: Option<&str>,
        generated_url: Option<&str>,
        url: Option<&str>,
    ) -> Option<bool> {
        if let Some(path) = path {
            return self.matches(path);
        }
        if let Some(generated) = generated_url {
            return self.matches(strip_query(generated));
        }
        if let Some(url) = url {
            return self.matches(strip_query(url));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(entries: &[&str]) -> SkipFiles {
        let owned: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        SkipFiles::new(&owned).unwrap()
    }

    #[test]
    fn no_rules_no_opinion() {
        let skip = SkipFiles::default();
        assert_eq!(skip.should_skip(Some("/app/a.js"), None, None), None);
    }

    #[test]
    fn last_matching_rule_wins() {
        let skip = rules(&["**/lib/**", "!**/lib/keep/**"]);
        assert_eq!(
            skip.should_skip(Some("/app/lib/vendor.js"), None, None),
            Some(true)
        );
        assert_eq!(
            skip.should_skip(Some("/app/lib/keep/mine.js"), None, None),
            Some(false)
        );
    }

    #[test]
    fn falls_back_to_urls_with_query_stripped() {
        let skip = rules(&["https://cdn.test/**"]);
        assert_eq!(
            skip.should_skip(None, None, Some("https://cdn.test/js/x.js?v=2")),
            Some(true)
        );
        // A derivable path takes precedence over the URL.
        assert_eq!(
            skip.should_skip(Some("/work/x.js"), None, Some("https://cdn.test/js/x.js")),
            None
        );
    }
}
