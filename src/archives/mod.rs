//! Archive enrichers (§4.8): Wayback CDX, CommonCrawl, VirusTotal, AlienVault
//! OTX. All four run concurrently and their results are merged; every
//! result feeds the enqueue path, independent of whether it is also printed
//! (`includeOtherResults`, gated in the driver/emit layer, not here).

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Cap on AlienVault OTX pagination (§4.8).
const OTX_PAGE_CAP: usize = 10;

/// Run all enabled enrichers concurrently and merge their URL lists.
/// `include_subs` widens the Wayback/CommonCrawl queries to `*.domain`.
pub async fn enrich(client: &Client, domain: &str, include_subs: bool, vt_api_key: Option<&str>) -> Vec<String> {
    let (wayback, common_crawl, vt, otx) = tokio::join!(
        wayback_cdx(client, domain, include_subs),
        common_crawl(client, domain, include_subs),
        virustotal(client, domain, vt_api_key),
        alienvault_otx(client, domain),
    );

    let mut out = Vec::new();
    out.extend(wayback);
    out.extend(common_crawl);
    out.extend(vt);
    out.extend(otx);
    out.sort_unstable();
    out.dedup();
    out
}

fn query_pattern(domain: &str, include_subs: bool) -> String {
    if include_subs {
        format!("*.{domain}/*")
    } else {
        format!("{domain}/*")
    }
}

async fn wayback_cdx(client: &Client, domain: &str, include_subs: bool) -> Vec<String> {
    let url = format!(
        "https://web.archive.org/cdx/search/cdx?url={}&output=json&fl=original&collapse=urlkey",
        urlencoding::encode(&query_pattern(domain, include_subs)),
    );

    let rows: Vec<Vec<String>> = match fetch_json(client, &url).await {
        Some(rows) => rows,
        None => return Vec::new(),
    };

    // First row is the CDX header (`["original"]`); skip it.
    rows.into_iter().skip(1).filter_map(|row| row.into_iter().next()).collect()
}

/// Discovers the latest CommonCrawl index from the index catalog at runtime
/// rather than hardcoding a crawl id (§4.8).
async fn common_crawl(client: &Client, domain: &str, include_subs: bool) -> Vec<String> {
    let Some(index_api) = latest_common_crawl_index(client).await else {
        return Vec::new();
    };

    let url = format!(
        "{index_api}?url={}&output=json",
        urlencoding::encode(&query_pattern(domain, include_subs)),
    );

    let body = match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => match resp.text().await {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    // CommonCrawl's index API returns newline-delimited JSON objects.
    body.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|obj| obj.get("url").and_then(Value::as_str).map(str::to_string))
        .collect()
}

async fn latest_common_crawl_index(client: &Client) -> Option<String> {
    #[derive(Deserialize)]
    struct IndexEntry {
        #[serde(rename = "cdx-api")]
        cdx_api: String,
    }

    let body = client
        .get("https://index.commoncrawl.org/collinfo.json")
        .send()
        .await
        .ok()?
        .json::<Vec<IndexEntry>>()
        .await
        .ok()?;

    body.into_iter().next().map(|entry| entry.cdx_api)
}

async fn virustotal(client: &Client, domain: &str, api_key: Option<&str>) -> Vec<String> {
    let Some(api_key) = api_key else {
        return Vec::new();
    };

    let url = format!("https://www.virustotal.com/api/v3/domains/{domain}/subdomains");
    let body: Value = match client.get(&url).header("x-apikey", api_key).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json().await {
            Ok(json) => json,
            Err(err) => {
                debug!("archives: virustotal parse failed: {err}");
                return Vec::new();
            }
        },
        Ok(resp) => {
            debug!("archives: virustotal returned {}", resp.status());
            return Vec::new();
        }
        Err(err) => {
            debug!("archives: virustotal fetch failed: {err}");
            return Vec::new();
        }
    };

    body["data"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry["id"].as_str())
        .map(|host| format!("https://{host}"))
        .collect()
}

async fn alienvault_otx(client: &Client, domain: &str) -> Vec<String> {
    #[derive(Deserialize)]
    struct OtxResponse {
        url_list: Vec<OtxUrl>,
        has_next: bool,
    }

    #[derive(Deserialize)]
    struct OtxUrl {
        url: String,
    }

    let mut out = Vec::new();
    for page in 1..=OTX_PAGE_CAP {
        let url = format!(
            "https://otx.alienvault.com/api/v1/indicators/hostname/{domain}/url_list?limit=50&page={page}"
        );
        let resp: OtxResponse = match fetch_json(client, &url).await {
            Some(resp) => resp,
            None => break,
        };
        let has_next = resp.has_next;
        out.extend(resp.url_list.into_iter().map(|entry| entry.url));
        if !has_next {
            break;
        }
    }
    out
}

async fn fetch_json<T: serde::de::DeserializeOwned>(client: &Client, url: &str) -> Option<T> {
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => resp.json::<T>().await.ok(),
        Ok(resp) => {
            debug!("archives: {url} returned {}", resp.status());
            None
        }
        Err(err) => {
            debug!("archives: fetch of {url} failed: {err}");
            None
        }
    }
}
