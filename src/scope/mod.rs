//! Scope pattern construction and matching (§3/§4.1 of the crawl model).
//!
//! A target resolves to one or more compiled [`regex::Regex`] patterns; a
//! URL is in scope iff at least one pattern matches its full string. Three
//! construction modes, in precedence order: an explicit allowlist from
//! configuration, an auto apex+subdomains pattern for bare-domain input, and
//! an explicit host-only pattern otherwise.

use anyhow::{Context, Result};
use regex::Regex;

/// A compiled set of scope patterns for one crawl target.
#[derive(Debug, Clone)]
pub struct Scope {
    patterns: Vec<Regex>,
}

impl Scope {
    /// Build scope from explicit allowlist regexes (highest precedence).
    /// Each entry is compiled as-is; the caller is responsible for anchoring.
    pub fn from_patterns(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid scope pattern: {p}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Auto apex+subdomains scope for a bare-domain target: matches `apex`
    /// itself and any `*.apex` subdomain.
    pub fn auto_apex(apex: &str) -> Result<Self> {
        let quoted = regex::escape(apex);
        let pattern = format!(r"^https?://([a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?\.)*{quoted}(:\d+)?(/|$)");
        Ok(Self {
            patterns: vec![Regex::new(&pattern)?],
        })
    }

    /// Explicit host-only scope: matches exactly `host`, no subdomains,
    /// unless `allow_subs` is set in which case subdomains are included too.
    pub fn host_only(host: &str, allow_subs: bool) -> Result<Self> {
        let quoted = regex::escape(host);
        let pattern = if allow_subs {
            format!(r"^https?://([a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?\.)*{quoted}(:\d+)?(/|$)")
        } else {
            format!(r"^https?://{quoted}(:\d+)?(/|$)")
        };
        Ok(Self {
            patterns: vec![Regex::new(&pattern)?],
        })
    }

    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(url))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// The eTLD+1 for `host` via the embedded public suffix list, falling back
/// to the host itself if the list yields nothing (§4.1 `Apex`).
#[must_use]
pub fn apex_of_host(host: &str) -> String {
    psl::domain(host.as_bytes())
        .map(|d| String::from_utf8_lossy(d.as_bytes()).into_owned())
        .unwrap_or_else(|| host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_apex_matches_apex_and_subdomains() {
        let scope = Scope::auto_apex("example.com").unwrap();
        assert!(scope.matches("https://example.com/"));
        assert!(scope.matches("https://api.example.com/v1"));
        assert!(scope.matches("http://deep.sub.example.com:8080/x"));
        assert!(!scope.matches("https://notexample.com/"));
        assert!(!scope.matches("https://example.com.evil.org/"));
    }

    #[test]
    fn host_only_rejects_subdomains_unless_allowed() {
        let strict = Scope::host_only("a.test", false).unwrap();
        assert!(strict.matches("https://a.test/"));
        assert!(!strict.matches("https://api.a.test/"));

        let lax = Scope::host_only("a.test", true).unwrap();
        assert!(lax.matches("https://api.a.test/"));
    }

    #[test]
    fn apex_of_host_falls_back_to_host() {
        assert_eq!(apex_of_host("api.example.com"), "example.com");
        assert_eq!(apex_of_host("example.co.uk"), "example.co.uk");
        assert_eq!(apex_of_host("localhost"), "localhost");
    }
}
