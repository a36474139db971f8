//! Robots.txt producer (§4.7).
//!
//! Fetches `<seed-origin>/robots.txt` exactly once. For each line containing
//! a case-insensitive `llow:` substring (matches both `Allow:` and
//! `Disallow:`), the remainder after the colon is resolved against the seed
//! and emitted/enqueued if it passes scope.

use reqwest::Client;
use tracing::debug;

use crate::imurl::ImUrl;

/// One discovered robots.txt path, already resolved to an absolute URL.
#[derive(Debug, Clone)]
pub struct RobotsEntry {
    pub url: ImUrl,
}

/// Fetch and parse robots.txt for `seed`. Returns an empty vector (logged at
/// debug) on any transport or parse failure rather than propagating — a
/// single producer's failure must not abort the target (§7).
pub async fn discover(client: &Client, seed: &ImUrl) -> Vec<RobotsEntry> {
    let Some(robots_url) = seed.resolve("/robots.txt") else {
        debug!("robots: failed to resolve robots.txt against {seed}");
        return Vec::new();
    };

    let body = match client.get(robots_url.as_str()).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(text) => text,
            Err(err) => {
                debug!("robots: failed to read body: {err}");
                return Vec::new();
            }
        },
        Ok(resp) => {
            debug!("robots: non-success status {}", resp.status());
            return Vec::new();
        }
        Err(err) => {
            debug!("robots: fetch failed: {err}");
            return Vec::new();
        }
    };

    parse(&body, seed)
}

fn parse(body: &str, seed: &ImUrl) -> Vec<RobotsEntry> {
    let mut out = Vec::new();
    for line in body.lines() {
        let Some(idx) = line.to_ascii_lowercase().find("llow:") else {
            continue;
        };
        let rest = line[idx + "llow:".len()..].trim();
        if rest.is_empty() {
            continue;
        }
        if let Some(url) = seed.resolve(rest) {
            out.push(RobotsEntry { url });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_allow_and_disallow_paths() {
        let body = "User-agent: *\nDisallow: /admin\nAllow: /admin/public\n# Comment: /ignored-comment-form\n";
        let seed = ImUrl::parse("https://a.test/").unwrap();
        let entries = parse(body, &seed);
        let urls: Vec<_> = entries.iter().map(|e| e.url.as_str().to_string()).collect();
        assert!(urls.contains(&"https://a.test/admin".to_string()));
        assert!(urls.contains(&"https://a.test/admin/public".to_string()));
    }

    #[test]
    fn ignores_lines_without_llow() {
        let body = "Sitemap: https://a.test/sitemap.xml\nUser-agent: *\n";
        let seed = ImUrl::parse("https://a.test/").unwrap();
        assert!(parse(body, &seed).is_empty());
    }
}
