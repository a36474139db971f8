//! Top-level lifecycle owner (§4.11): reads targets, normalizes them,
//! builds the shared transport/config once, and runs up to `threads`
//! targets concurrently, each with its own crawl engine and producers.
//!
//! Grounded on `crawl_engine/orchestrator.rs`'s multi-task fan-out shape,
//! generalized from "pages within one crawl" to "targets within one run".

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::archives;
use crate::config::CrawlerConfig;
use crate::crawl_engine::core::{Engine, NoRenderHook, RenderHook};
use crate::dedupe::Dedupers;
use crate::emit::{EmitFilter, EmitRecord, Kind, OutputMode, Sink};
use crate::fetcher::{Fetcher, FetcherConfig};
use crate::imurl::ImUrl;
use crate::robots;
use crate::scope::{self, Scope};
use crate::sitemap;

#[cfg(feature = "render")]
use crate::render::{RenderManager, RenderStop};

/// A normalized crawl target (§3 "Target"): the start URL, its scope, and
/// its apex domain (used for subdomain/S3 grep and archive queries).
pub struct Target {
    pub input: String,
    pub seed: ImUrl,
    pub scope: Arc<Scope>,
    pub apex: String,
}

impl Target {
    /// `input` containing `://` is treated as a full URL (scope is the
    /// exact host unless `include_subdomains` widens it); otherwise it is
    /// a bare domain (start URL becomes `https://<domain>`, scope is
    /// always apex + subdomains) (§3).
    pub fn parse(input: &str, include_subdomains: bool) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            anyhow::bail!("empty target");
        }

        if trimmed.contains("://") {
            let seed = ImUrl::parse(trimmed).with_context(|| format!("invalid target URL: {trimmed}"))?;
            let host = seed
                .host()
                .ok_or_else(|| anyhow::anyhow!("target URL has no host: {trimmed}"))?;
            let apex = scope::apex_of_host(host);
            let scope = Scope::host_only(host, include_subdomains)?;
            Ok(Self {
                input: trimmed.to_string(),
                seed,
                scope: Arc::new(scope),
                apex,
            })
        } else {
            let seed = ImUrl::parse(&format!("https://{trimmed}"))
                .with_context(|| format!("invalid bare-domain target: {trimmed}"))?;
            let apex = scope::apex_of_host(trimmed);
            let scope = Scope::auto_apex(&apex)?;
            Ok(Self {
                input: trimmed.to_string(),
                seed,
                scope: Arc::new(scope),
                apex,
            })
        }
    }
}

/// Reads target strings from exactly one of `--url`, `--list`, or piped
/// stdin (detected via `IsTerminal`); blank lines are ignored (§4.11/§6).
pub async fn read_targets(url: Option<&str>, list: Option<&Path>) -> Result<Vec<String>> {
    if let Some(url) = url {
        return Ok(vec![url.to_string()]);
    }
    if let Some(path) = list {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading target list {}", path.display()))?;
        return Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect());
    }
    if std::io::stdin().is_terminal() {
        anyhow::bail!("no target given: pass --url, --list, or pipe targets on stdin");
    }
    let mut lines = Vec::new();
    let stdin = tokio::io::stdin();
    let mut reader = tokio::io::BufReader::new(stdin).lines();
    while let Some(line) = reader.next_line().await.context("reading stdin")? {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok(lines)
}

/// Runs every target, up to `config.threads` concurrently. Returns the
/// process exit code (§6: 0 on completion, 1 on unusable seed list).
pub async fn run(config: CrawlerConfig, raw_targets: Vec<String>, vt_api_key: Option<String>) -> i32 {
    if raw_targets.is_empty() {
        error!("no usable targets given");
        return 1;
    }

    let shared_client = match crate::fetcher::build_shared_client() {
        Ok(client) => client,
        Err(err) => {
            error!("failed to build shared HTTP transport: {err}");
            return 1;
        }
    };

    let config = Arc::new(config);
    let semaphore = Arc::new(Semaphore::new(config.threads));
    let mut in_flight = FuturesUnordered::new();
    let vt_api_key = Arc::new(vt_api_key);

    for input in raw_targets {
        let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore not closed");
        let config = Arc::clone(&config);
        let client = shared_client.clone();
        let vt_api_key = Arc::clone(&vt_api_key);

        in_flight.push(tokio::spawn(async move {
            let result = run_one_target(&input, &config, &client, vt_api_key.as_deref()).await;
            drop(permit);
            (input, result)
        }));
    }

    let mut had_fatal = false;
    while let Some(joined) = in_flight.next().await {
        match joined {
            Ok((input, Ok(()))) => info!("target {input} complete"),
            Ok((input, Err(err))) => warn!("target {input} failed: {err}"),
            Err(join_err) => {
                error!("target task panicked: {join_err}");
                had_fatal = true;
            }
        }
    }

    if had_fatal {
        1
    } else {
        0
    }
}

async fn run_one_target(
    input: &str,
    config: &Arc<CrawlerConfig>,
    shared_client: &reqwest::Client,
    vt_api_key: Option<&str>,
) -> Result<()> {
    let mut target = Target::parse(input, config.include_subdomains)?;
    // §3/§6: an explicit `whitelistDomain` is the highest-precedence scope
    // construction mode, overriding whatever Target::parse derived from the
    // seed itself.
    if let Some(domain) = &config.whitelist_domain {
        target.apex = scope::apex_of_host(domain);
        target.scope = Arc::new(Scope::auto_apex(&target.apex)?);
    }

    let fetcher_config = FetcherConfig {
        request_timeout: config.timeout,
        proxy: config.proxy.clone(),
        user_agent: config.user_agent.clone(),
        cookie: config.cookie.clone(),
        extra_headers: config.headers.clone(),
        no_off_scope_redirect: config.no_redirect,
    };
    let fetcher = Arc::new(Fetcher::new(shared_client, fetcher_config, Arc::clone(&target.scope))?);

    let dedupers = Arc::new(Dedupers::new());
    let domain_limiter = Arc::new(crate::crawl_engine::domain_limiter::DomainLimiter::new(config.concurrent));
    let politeness = Arc::new(crate::crawl_engine::rate_limiter::Politeness::new(config.delay, config.random_delay));

    let mode = if config.json {
        OutputMode::Structured
    } else if config.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Plain
    };
    let filter = build_emit_filter(config);
    let host = target.seed.host().unwrap_or(&target.apex).to_string();
    let sink = Arc::new(
        Sink::open(filter, mode, config.show_length, config.output_dir.as_deref(), &host)
            .await
            .context("opening output sink")?,
    );

    #[cfg(feature = "render")]
    let (render_hook, render_manager, render_stop): (Arc<dyn RenderHook>, Option<RenderManager>, Option<RenderStop>) =
        if config.render.enabled {
            let (queue, manager, stop) =
                RenderManager::pair(config.render.budget, config.render.timeout, Arc::clone(&dedupers));
            (queue, Some(manager), Some(stop))
        } else {
            (Arc::new(NoRenderHook), None, None)
        };
    #[cfg(not(feature = "render"))]
    let render_hook: Arc<dyn RenderHook> = Arc::new(NoRenderHook);

    let engine = Arc::new(Engine::new(
        Arc::clone(config),
        Arc::clone(&target.scope),
        target.apex.clone(),
        fetcher,
        dedupers,
        domain_limiter,
        politeness,
        Arc::clone(&sink),
        target.input.clone(),
        render_hook,
    ));

    let shutdown_engine = Arc::clone(&engine);
    let shutdown_listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received ctrl-c, draining in-flight work");
            shutdown_engine.request_shutdown();
        }
    });

    let mut producer_handles = Vec::new();

    if config.effective_robots() {
        producer_handles.push(spawn_robots_producer(Arc::clone(&engine), shared_client.clone(), target.seed.clone()));
    }
    if config.effective_sitemap() {
        producer_handles.push(spawn_sitemap_producer(Arc::clone(&engine), shared_client.clone(), target.seed.clone()));
    }
    if config.effective_archives() {
        producer_handles.push(spawn_archives_producer(
            Arc::clone(&engine),
            shared_client.clone(),
            target.apex.clone(),
            config.archives.include_subs,
            config.archives.include_other_results,
            vt_api_key.map(str::to_string),
        ));
    }

    #[cfg(feature = "render")]
    let render_join = render_manager.map(|manager| {
        tokio::spawn(manager.run(Arc::clone(&engine), target.input.clone()))
    });

    engine.clone().run(target.seed.clone()).await;

    // The render channel's sender lives inside `engine.render_hook` and
    // `engine` itself is held by the render task, so the channel never
    // closes on its own; tell the manager explicitly that the crawl has
    // quiesced so it drains whatever's queued and returns.
    #[cfg(feature = "render")]
    if let Some(stop) = &render_stop {
        stop.stop();
    }

    for handle in producer_handles {
        let _ = handle.await;
    }
    #[cfg(feature = "render")]
    if let Some(handle) = render_join {
        let _ = handle.await;
    }

    shutdown_listener.abort();
    sink.close().await.context("closing output sink")?;
    Ok(())
}

fn build_emit_filter(config: &CrawlerConfig) -> EmitFilter {
    use std::collections::HashSet;
    let mut include = HashSet::new();
    let mut exclude = HashSet::new();
    for ext in &config.types.include {
        if let Ok(kind) = ext.parse() {
            include.insert(kind);
        }
    }
    for ext in &config.types.exclude {
        if let Ok(kind) = ext.parse() {
            exclude.insert(kind);
        }
    }
    if config.raw {
        include.insert(Kind::Raw);
    }
    EmitFilter::new(include, exclude)
}

fn spawn_robots_producer(engine: Arc<Engine>, client: reqwest::Client, seed: ImUrl) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _guard = engine.register_producer();
        for entry in robots::discover(&client, &seed).await {
            let _ = engine.enqueue_external(entry.url, "robots", Kind::Robots).await;
        }
    })
}

fn spawn_sitemap_producer(engine: Arc<Engine>, client: reqwest::Client, seed: ImUrl) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _guard = engine.register_producer();
        for entry in sitemap::discover(&client, &seed).await {
            let _ = engine.enqueue_external(entry.url, "sitemap", Kind::Sitemap).await;
        }
    })
}

fn spawn_archives_producer(
    engine: Arc<Engine>,
    client: reqwest::Client,
    apex: String,
    include_subs: bool,
    include_other_results: bool,
    vt_api_key: Option<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _guard = engine.register_producer();
        let urls = archives::enrich(&client, &apex, include_subs, vt_api_key.as_deref()).await;
        for raw in urls {
            let Ok(url) = ImUrl::parse(&raw) else { continue };
            let enqueued = engine
                .enqueue_external_opt(url.clone(), "archives", Kind::Raw, include_other_results)
                .await;
            if !enqueued {
                debug!("archives: {raw} already seen or out of scope");
            }
        }
    })
}
