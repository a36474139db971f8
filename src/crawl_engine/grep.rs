//! Subdomain and AWS S3 bucket grep, run over in-scope response bodies
//! alongside the link-finder (§4.6: "runs subdomain grep, S3 grep ... on
//! each response"). Grounded in the linkfinder's token-regex-then-dedupe
//! shape (`src/linkfinder/mod.rs`), specialized to two fixed patterns
//! instead of a general link grammar.

use std::sync::LazyLock;

use regex::Regex;

static S3_BUCKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9]\.s3(?:-[a-z0-9-]+)?\.amazonaws\.com|s3://[a-z0-9][a-z0-9.\-]{1,61}[a-z0-9])",
    )
    .expect("s3 bucket regex is valid")
});

/// Build a regex matching `host.apex` or `sub.sub2.apex` for the given apex
/// domain, used to grep response bodies for subdomain mentions.
#[must_use]
pub fn subdomain_regex(apex: &str) -> Regex {
    let quoted = regex::escape(apex);
    Regex::new(&format!(r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+{quoted}\b"))
        .expect("subdomain regex is valid")
}

/// Unique subdomain mentions of `apex` found in `body`.
#[must_use]
pub fn find_subdomains(body: &str, apex: &str) -> Vec<String> {
    let re = subdomain_regex(apex);
    let mut seen = std::collections::HashSet::new();
    re.find_iter(body)
        .map(|m| m.as_str().to_lowercase())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Unique S3 bucket references found in `body`.
#[must_use]
pub fn find_s3_buckets(body: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    S3_BUCKET_RE
        .find_iter(body)
        .map(|m| m.as_str().to_string())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_subdomain_mentions() {
        let body = "see api.a.test and cdn.assets.a.test but not b.test";
        let found = find_subdomains(body, "a.test");
        assert!(found.contains(&"api.a.test".to_string()));
        assert!(found.contains(&"cdn.assets.a.test".to_string()));
        assert!(!found.iter().any(|s| s.contains("b.test")));
    }

    #[test]
    fn finds_s3_bucket_references() {
        let body = "asset at my-bucket.s3.amazonaws.com and s3://other-bucket/key";
        let found = find_s3_buckets(body);
        assert!(found.iter().any(|s| s.contains("my-bucket.s3.amazonaws.com")));
        assert!(found.iter().any(|s| s.starts_with("s3://other-bucket")));
    }
}
