//! CLI entry point: a thin `clap::Parser` adapter over
//! [`pathfinder_crawl::config::CrawlerConfigBuilder`] (§4.11, §6). Its only
//! job is populating the builder and handing off to the driver; it never
//! appears inside the crawl engine's types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use pathfinder_crawl::config::{ArchivesConfig, CrawlerConfigBuilder, ExtensionFilter, RenderConfig};
use pathfinder_crawl::fetcher::UserAgentMode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UserAgentArg {
    Web,
    Mobi,
}

#[derive(Debug, Parser)]
#[command(name = "pathfinder", about = "Concurrent reconnaissance web crawler")]
struct CliArgs {
    /// Single target URL or bare domain.
    #[arg(long)]
    url: Option<String>,

    /// Newline-delimited file of targets.
    #[arg(long)]
    list: Option<PathBuf>,

    /// Parallel targets.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Per-target concurrent requests.
    #[arg(long, default_value_t = 5)]
    concurrent: usize,

    /// Max link-following depth (0 enqueues nothing past the seed).
    #[arg(long, default_value_t = 1)]
    depth: u32,

    /// Fixed per-request delay, in seconds.
    #[arg(long, default_value_t = 0)]
    delay: u64,

    /// Additional uniform jitter, in seconds.
    #[arg(long = "random-delay", default_value_t = 0)]
    random_delay: u64,

    /// Request timeout, in seconds (0 is coerced to 10).
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Include subdomains in scope for full-URL targets (auto-on for bare domains).
    #[arg(long)]
    subs: bool,

    /// Disable robots/sitemap/linkfinder/archives.
    #[arg(long)]
    base: bool,

    /// Fetch and follow /robots.txt.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    robots: bool,

    /// Probe well-known sitemap paths.
    #[arg(long)]
    sitemap: bool,

    /// Run the regex link-finder over HTML/JS bodies.
    #[arg(long = "js", default_value_t = true, action = clap::ArgAction::Set)]
    linkfinder: bool,

    /// Enable Wayback/CommonCrawl/VirusTotal/OTX enrichers.
    #[arg(long)]
    archives: bool,

    /// Widen archive queries to `*.domain`.
    #[arg(long = "include-subs")]
    archives_include_subs: bool,

    /// Print archive-sourced URLs too (they are always crawled).
    #[arg(long = "include-other-results")]
    include_other_results: bool,

    /// Enable the headless render pass.
    #[arg(long)]
    render: bool,

    /// Max pages to render.
    #[arg(long = "render-budget", default_value_t = 20)]
    render_budget: usize,

    /// Per-page render timeout, in seconds.
    #[arg(long = "render-timeout", default_value_t = 15)]
    render_timeout: u64,

    /// Upstream proxy URL.
    #[arg(long)]
    proxy: Option<String>,

    /// `web`, `mobi`, or omit for a literal string via `--user-agent-literal`.
    #[arg(long = "user-agent", value_enum)]
    user_agent: Option<UserAgentArg>,

    /// Literal User-Agent string, overriding `--user-agent`.
    #[arg(long = "user-agent-literal")]
    user_agent_literal: Option<String>,

    /// Cookie header value.
    #[arg(long)]
    cookie: Option<String>,

    /// Extra header as `KEY:VAL`; may be repeated.
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Raw HTTP request file to source headers/cookies from.
    #[arg(long = "burp-file")]
    burp_file: Option<PathBuf>,

    /// Allowlist regex; highest scope precedence.
    #[arg(long)]
    whitelist: Option<String>,

    /// Blocklist regex.
    #[arg(long)]
    blacklist: Option<String>,

    /// Explicit scope domain override.
    #[arg(long = "whitelist-domain")]
    whitelist_domain: Option<String>,

    /// CSV of body lengths to suppress from `url` emission.
    #[arg(long = "filter-length")]
    filter_length: Option<String>,

    /// Stop following off-scope redirects.
    #[arg(long = "no-redirect")]
    no_redirect: bool,

    /// Print only the bare URL per line.
    #[arg(long)]
    quiet: bool,

    /// Emit one JSON object per line.
    #[arg(long)]
    json: bool,

    /// Include body length in plain-mode output.
    #[arg(long)]
    length: bool,

    /// Also pass through `raw` kind records.
    #[arg(long)]
    raw: bool,

    /// CSV of extensions to include in emitted kinds.
    #[arg(long)]
    types: Option<String>,

    /// CSV of extensions to exclude from emitted kinds.
    #[arg(long = "exclude-types")]
    exclude_types: Option<String>,

    /// Output directory for per-target files.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("pathfinder_crawl={level},pathfinder={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Parses `KEY: VALUE` lines from a saved raw HTTP request, pulling out
/// `Cookie` separately from the rest (out-of-scope "load headers from a
/// saved raw request file" collaborator, §1 Out of scope).
fn parse_burp_file(path: &std::path::Path) -> anyhow::Result<(Vec<(String, String)>, Option<String>)> {
    let text = std::fs::read_to_string(path)?;
    let mut headers = Vec::new();
    let mut cookie = None;
    for line in text.lines().skip(1) {
        if line.trim().is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().to_string();
        if key.eq_ignore_ascii_case("cookie") {
            cookie = Some(value);
        } else {
            headers.push((key.to_string(), value));
        }
    }
    Ok((headers, cookie))
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    let targets = match pathfinder_crawl::driver::read_targets(args.url.as_deref(), args.list.as_deref()).await {
        Ok(targets) if !targets.is_empty() => targets,
        Ok(_) => {
            tracing::error!("no targets given");
            std::process::exit(1);
        }
        Err(err) => {
            tracing::error!("failed to read targets: {err}");
            std::process::exit(1);
        }
    };

    let mut headers: Vec<(String, String)> = args
        .headers
        .iter()
        .filter_map(|h| h.split_once(':').map(|(k, v)| (k.trim().to_string(), v.trim().to_string())))
        .collect();
    let mut cookie = args.cookie.clone();

    if let Some(path) = &args.burp_file {
        match parse_burp_file(path) {
            Ok((burp_headers, burp_cookie)) => {
                headers.extend(burp_headers);
                cookie = cookie.or(burp_cookie);
            }
            Err(err) => tracing::warn!("failed to parse burp file {}: {err}", path.display()),
        }
    }

    let user_agent = match (&args.user_agent_literal, args.user_agent) {
        (Some(literal), _) => UserAgentMode::Literal(literal.clone()),
        (None, Some(UserAgentArg::Web)) => UserAgentMode::Desktop,
        (None, Some(UserAgentArg::Mobi)) => UserAgentMode::Mobile,
        (None, None) => UserAgentMode::Desktop,
    };

    let filter_length = args
        .filter_length
        .as_deref()
        .map(|csv| csv.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();

    let archives = ArchivesConfig {
        enabled: args.archives,
        include_subs: args.archives_include_subs,
        include_other_results: args.include_other_results,
    };
    let render = RenderConfig {
        enabled: args.render,
        budget: args.render_budget,
        timeout: Duration::from_secs(args.render_timeout),
    };
    let types = ExtensionFilter::from_csv(
        args.types.as_deref().unwrap_or_default(),
        args.exclude_types.as_deref().unwrap_or_default(),
    );

    let mut builder = CrawlerConfigBuilder::new()
        .threads(args.threads)
        .concurrent(args.concurrent)
        .depth(args.depth)
        .delay(Duration::from_secs(args.delay))
        .random_delay(Duration::from_secs(args.random_delay))
        .timeout(Duration::from_secs(args.timeout))
        .include_subdomains(args.subs)
        .base_only(args.base)
        .robots(args.robots)
        .sitemap(args.sitemap)
        .linkfinder(args.linkfinder)
        .archives(archives)
        .render(render)
        .proxy(args.proxy.clone())
        .user_agent(user_agent)
        .cookie(cookie)
        .headers(headers)
        .whitelist_domain(args.whitelist_domain.clone())
        .filter_length(filter_length)
        .no_redirect(args.no_redirect)
        .quiet(args.quiet)
        .json(args.json)
        .show_length(args.length)
        .raw(args.raw)
        .types(types)
        .output_dir(args.output.clone())
        .target(targets[0].clone());

    if let Some(pattern) = &args.whitelist {
        builder = match builder.whitelist(pattern) {
            Ok(b) => b,
            Err(err) => {
                tracing::error!("invalid whitelist regex: {err}");
                std::process::exit(1);
            }
        };
    }
    if let Some(pattern) = &args.blacklist {
        builder = match builder.blacklist(pattern) {
            Ok(b) => b,
            Err(err) => {
                tracing::error!("invalid blacklist regex: {err}");
                std::process::exit(1);
            }
        };
    }

    let (_, config) = builder.build();
    let vt_api_key = std::env::var("VT_API_KEY").ok();

    let code = pathfinder_crawl::driver::run(config, targets, vt_api_key).await;
    std::process::exit(code);
}
