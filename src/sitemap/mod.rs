//! Sitemap producer (§4.7).
//!
//! Probes a fixed list of well-known sitemap paths at the seed origin.
//! `<urlset>` documents yield `<loc>` entries directly; `<sitemapindex>`
//! documents are expanded one level (each nested sitemap is fetched and
//! parsed, but not itself treated as an index).

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::imurl::ImUrl;

/// §6: fixed probe paths tried at the seed origin.
pub const PROBE_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_news.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemapindex.xml",
    "/sitemap-news.xml",
    "/post-sitemap.xml",
    "/page-sitemap.xml",
    "/portfolio-sitemap.xml",
    "/home_slider-sitemap.xml",
    "/category-sitemap.xml",
    "/author-sitemap.xml",
];

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<LocEntry>,
}

#[derive(Debug, Deserialize)]
struct SitemapIndex {
    #[serde(rename = "sitemap", default)]
    sitemaps: Vec<LocEntry>,
}

#[derive(Debug, Deserialize)]
struct LocEntry {
    loc: String,
}

/// One discovered sitemap URL.
#[derive(Debug, Clone)]
pub struct SitemapEntry {
    pub url: ImUrl,
}

/// Probe every well-known path at `seed`'s origin and return the union of
/// discovered page URLs across all successfully-parsed sitemaps.
pub async fn discover(client: &Client, seed: &ImUrl) -> Vec<SitemapEntry> {
    let mut out = Vec::new();
    for path in PROBE_PATHS {
        let Some(probe_url) = seed.resolve(path) else {
            continue;
        };
        out.extend(fetch_and_parse(client, &probe_url).await);
    }
    out
}

async fn fetch_and_parse(client: &Client, url: &ImUrl) -> Vec<SitemapEntry> {
    let body = match client.get(url.as_str()).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(text) => text,
            Err(err) => {
                debug!("sitemap: failed to read body of {url}: {err}");
                return Vec::new();
            }
        },
        Ok(resp) => {
            debug!("sitemap: {url} returned {}", resp.status());
            return Vec::new();
        }
        Err(err) => {
            debug!("sitemap: fetch of {url} failed: {err}");
            return Vec::new();
        }
    };

    parse_top_level(client, &body, url).await
}

async fn parse_top_level(client: &Client, body: &str, source: &ImUrl) -> Vec<SitemapEntry> {
    if body.contains("<sitemapindex") {
        let index: SitemapIndex = match quick_xml::de::from_str(body) {
            Ok(index) => index,
            Err(err) => {
                debug!("sitemap: malformed sitemapindex at {source}: {err}");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for entry in index.sitemaps {
            let Some(nested_url) = ImUrl::parse(&entry.loc).ok().or_else(|| source.resolve(&entry.loc)) else {
                continue;
            };
            // Recurse exactly one level: parse the nested sitemap as a
            // <urlset> only, never as another index.
            out.extend(fetch_urlset_only(client, &nested_url).await);
        }
        out
    } else {
        parse_urlset(body, source)
    }
}

async fn fetch_urlset_only(client: &Client, url: &ImUrl) -> Vec<SitemapEntry> {
    let body = match client.get(url.as_str()).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    parse_urlset(&body, url)
}

fn parse_urlset(body: &str, source: &ImUrl) -> Vec<SitemapEntry> {
    let urlset: UrlSet = match quick_xml::de::from_str(body) {
        Ok(urlset) => urlset,
        Err(err) => {
            debug!("sitemap: malformed urlset at {source}: {err}");
            return Vec::new();
        }
    };

    urlset
        .urls
        .into_iter()
        .filter_map(|entry| ImUrl::parse(&entry.loc).ok().or_else(|| source.resolve(&entry.loc)))
        .map(|url| SitemapEntry { url })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urlset() {
        let xml = r#"<?xml version="1.0"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <url><loc>https://a.test/one</loc></url>
                <url><loc>https://a.test/two</loc></url>
            </urlset>"#;
        let seed = ImUrl::parse("https://a.test/").unwrap();
        let entries = parse_urlset(xml, &seed);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url.as_str(), "https://a.test/one");
    }

    #[test]
    fn malformed_xml_yields_empty() {
        let seed = ImUrl::parse("https://a.test/").unwrap();
        assert!(parse_urlset("<not valid", &seed).is_empty());
    }
}
