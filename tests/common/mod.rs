//! Test utilities shared across the crawl integration suite.
//!
//! Grounded on the teacher's own `tests/common/mod.rs`: a `mockito` fixture
//! server plus thin helpers for registering canned routes, trimmed to what a
//! crawl run actually needs (HTML/JS bodies, status mocks, a driver-backed
//! run-and-collect helper, and a bare `Engine` harness for testing the
//! enqueue path directly) with browser/markdown helpers dropped since this
//! crate has no page-extraction or rendering pipeline to exercise that way.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mockito::{Mock, Server, ServerGuard};
use pathfinder_crawl::config::{CrawlerConfigBuilder, Missing};
use pathfinder_crawl::crawl_engine::core::{Engine, NoRenderHook};
use pathfinder_crawl::crawl_engine::{DomainLimiter, Politeness};
use pathfinder_crawl::dedupe::Dedupers;
use pathfinder_crawl::emit::{EmitFilter, Kind, OutputMode, Sink};
use pathfinder_crawl::fetcher::{Fetcher, FetcherConfig};
use pathfinder_crawl::imurl::ImUrl;
use pathfinder_crawl::scope::Scope;
use serde::Deserialize;

/// One structured-output line as written by the JSON sink (§3 "Emit record").
#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub input: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub output: String,
    pub status: Option<u16>,
    pub length: Option<usize>,
}

impl Record {
    pub fn is_kind(&self, kind: Kind) -> bool {
        self.kind == kind.as_str()
    }
}

/// Spins up an async mockito server for one test.
pub async fn setup_mock_server() -> ServerGuard {
    Server::new_async().await
}

/// Registers a 200 HTML response at `path`.
pub async fn create_html_mock(server: &mut Server, path: &str, html: &str) -> Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(html)
        .create_async()
        .await
}

/// Registers a 200 response with an arbitrary content type, for exercising
/// the JS/XML asset paths.
pub async fn create_typed_mock(server: &mut Server, path: &str, content_type: &str, body: &str) -> Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", content_type)
        .with_body(body)
        .create_async()
        .await
}

/// `server.url()` joined with `path`.
pub fn test_url(server: &Server, path: &str) -> String {
    format!("{}{}", server.url(), path)
}

/// Runs a full target crawl through the public driver entry point and
/// parses back its structured output file line by line. `configure` applies
/// builder calls before `target()`/`build()`, mirroring the way `main.rs`
/// chains the CLI-driven builder.
pub async fn run_crawl(
    target: &str,
    configure: impl FnOnce(CrawlerConfigBuilder<Missing>) -> CrawlerConfigBuilder<Missing>,
) -> (i32, Vec<Record>) {
    let output_dir = tempfile::tempdir().expect("create temp output dir");
    let builder = configure(CrawlerConfigBuilder::new())
        .robots(false)
        .sitemap(false)
        .json(true)
        .output_dir(Some(output_dir.path().to_path_buf()));
    let (_, config) = builder.target(target).build();

    let code = pathfinder_crawl::driver::run(config, vec![target.to_string()], None).await;
    let host = ImUrl::parse(target)
        .ok()
        .and_then(|u| u.host().map(str::to_string))
        .unwrap_or_else(|| target.to_string());
    let records = read_records_for_host(output_dir.path(), &host);
    (code, records)
}

/// Reads back every structured record written for `host` under `dir`.
pub fn read_records_for_host(dir: &Path, host: &str) -> Vec<Record> {
    let path: PathBuf = dir.join(host.replace('.', "_"));
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap_or_else(|err| panic!("bad record line {line:?}: {err}")))
        .collect()
}

/// Builds a bare `Engine` wired to a structured-JSON `Sink` writing under
/// `output_dir`, scoped to `host`, with no network pacing delay. Exercises
/// [`Engine::enqueue_external`]/[`Engine::enqueue_external_opt`] directly
/// without driving a full crawl through the driver.
pub async fn build_test_engine(host: &str, output_dir: &Path) -> Arc<Engine> {
    let (_, config) = CrawlerConfigBuilder::new()
        .target(format!("https://{host}/"))
        .build();
    let scope = Arc::new(Scope::host_only(host, false).expect("compile scope"));
    let shared = pathfinder_crawl::fetcher::build_shared_client().expect("build shared client");
    let fetcher_config = FetcherConfig::with_timeout(Duration::from_secs(5));
    let fetcher = Arc::new(Fetcher::new(&shared, fetcher_config, Arc::clone(&scope)).expect("build fetcher"));
    let dedupers = Arc::new(Dedupers::new());
    let domain_limiter = Arc::new(DomainLimiter::new(5));
    let politeness = Arc::new(Politeness::new(Duration::ZERO, Duration::ZERO));
    let sink = Arc::new(
        Sink::open(EmitFilter::default(), OutputMode::Structured, false, Some(output_dir), host)
            .await
            .expect("open sink"),
    );
    Arc::new(Engine::new(
        Arc::new(config),
        scope,
        host.to_string(),
        fetcher,
        dedupers,
        domain_limiter,
        politeness,
        sink,
        "test".to_string(),
        Arc::new(NoRenderHook),
    ))
}
