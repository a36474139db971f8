//! Crawl configuration: a typestate builder over [`CrawlerConfig`] (§6).
//!
//! The builder shape is carried over from the teacher's
//! `CrawlConfigBuilder<State>` (`config/builder.rs`): a zero-sized marker
//! type tracks which required fields have been supplied, so `build()` only
//! compiles once the target is set. Fields here are trimmed to the
//! crawler's actual knobs; screenshot/markdown/search-indexing fields with
//! no counterpart in the crawl model are dropped.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;

use crate::fetcher::UserAgentMode;

/// User-visible `types`/`excludeTypes` asset-extension filter, compiled
/// from a CSV list into a lowercase set.
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ExtensionFilter {
    #[must_use]
    pub fn from_csv(include: &str, exclude: &str) -> Self {
        let split = |csv: &str| -> Vec<String> {
            csv.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect()
        };
        Self {
            include: split(include),
            exclude: split(exclude),
        }
    }
}

/// Archive enricher toggles (`archives` + its modifiers, §6).
#[derive(Debug, Clone, Default)]
pub struct ArchivesConfig {
    pub enabled: bool,
    pub include_subs: bool,
    pub include_other_results: bool,
}

/// Headless render toggles (`render`/`renderBudget`/`renderTimeout`, §6).
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub enabled: bool,
    pub budget: usize,
    pub timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            budget: 20,
            timeout: Duration::from_secs(15),
        }
    }
}

/// The fully assembled, immutable crawl configuration shared (read-only)
/// across all targets in a run, except for per-target fields like the
/// resolved target string and scope which are threaded in separately.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub threads: usize,
    pub concurrent: usize,
    pub depth: u32,
    pub delay: Duration,
    pub random_delay: Duration,
    pub timeout: Duration,
    pub include_subdomains: bool,
    pub base_only: bool,
    pub robots: bool,
    pub sitemap: bool,
    pub linkfinder: bool,
    pub archives: ArchivesConfig,
    pub render: RenderConfig,
    pub proxy: Option<String>,
    pub user_agent: UserAgentMode,
    pub cookie: Option<String>,
    pub headers: Vec<(String, String)>,
    pub whitelist: Option<Regex>,
    pub blacklist: Option<Regex>,
    pub whitelist_domain: Option<String>,
    pub filter_length: Vec<usize>,
    pub no_redirect: bool,
    pub quiet: bool,
    pub json: bool,
    pub show_length: bool,
    pub raw: bool,
    pub types: ExtensionFilter,
    pub output_dir: Option<PathBuf>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            concurrent: 5,
            depth: 1,
            delay: Duration::ZERO,
            random_delay: Duration::ZERO,
            timeout: Duration::from_secs(10),
            include_subdomains: false,
            base_only: false,
            robots: true,
            sitemap: false,
            linkfinder: true,
            archives: ArchivesConfig::default(),
            render: RenderConfig::default(),
            proxy: None,
            user_agent: UserAgentMode::Desktop,
            cookie: None,
            headers: Vec::new(),
            whitelist: None,
            blacklist: None,
            whitelist_domain: None,
            filter_length: Vec::new(),
            no_redirect: false,
            quiet: false,
            json: false,
            show_length: false,
            raw: false,
            types: ExtensionFilter::default(),
            output_dir: None,
        }
    }
}

impl CrawlerConfig {
    /// Maximum depth that may be enqueued: a discovered link at
    /// `parent_depth + 1` is only followed if that value is `<= depth`.
    /// `depth = 0` therefore enqueues nothing past the seed itself — this
    /// favors the concrete testable scenario ("seed with depth=0: one
    /// fetch, no enqueue of its hrefs") over the `0=infinite` shorthand
    /// named elsewhere for the same option; see DESIGN.md's Open Question
    /// decisions for the full resolution. Unbounded crawls are reached by
    /// passing a sufficiently large depth rather than a literal zero.
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.depth
    }

    /// `base` disables robots/sitemap/linkfinder/archives (§6).
    #[must_use]
    pub fn effective_robots(&self) -> bool {
        self.robots && !self.base_only
    }

    #[must_use]
    pub fn effective_sitemap(&self) -> bool {
        self.sitemap && !self.base_only
    }

    #[must_use]
    pub fn effective_linkfinder(&self) -> bool {
        self.linkfinder && !self.base_only
    }

    #[must_use]
    pub fn effective_archives(&self) -> bool {
        self.archives.enabled && !self.base_only
    }
}

/// Typestate markers tracking whether the required target has been set.
pub struct Missing;
pub struct Ready;

/// Builder for [`CrawlerConfig`], mirroring the teacher's
/// `CrawlConfigBuilder<State>` typestate pattern: `build()` is only
/// available once `target()` has been called.
pub struct CrawlerConfigBuilder<State = Missing> {
    target: Option<String>,
    config: CrawlerConfig,
    _state: PhantomData<State>,
}

impl Default for CrawlerConfigBuilder<Missing> {
    fn default() -> Self {
        Self {
            target: None,
            config: CrawlerConfig::default(),
            _state: PhantomData,
        }
    }
}

impl CrawlerConfigBuilder<Missing> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn target(self, target: impl Into<String>) -> CrawlerConfigBuilder<Ready> {
        CrawlerConfigBuilder {
            target: Some(target.into()),
            config: self.config,
            _state: PhantomData,
        }
    }
}

impl<State> CrawlerConfigBuilder<State> {
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads.max(1);
        self
    }

    #[must_use]
    pub fn concurrent(mut self, concurrent: usize) -> Self {
        self.config.concurrent = concurrent.max(1);
        self
    }

    #[must_use]
    pub fn depth(mut self, depth: u32) -> Self {
        self.config.depth = depth;
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    #[must_use]
    pub fn random_delay(mut self, random_delay: Duration) -> Self {
        self.config.random_delay = random_delay;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = if timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            timeout
        };
        self
    }

    #[must_use]
    pub fn include_subdomains(mut self, include: bool) -> Self {
        self.config.include_subdomains = include;
        self
    }

    #[must_use]
    pub fn base_only(mut self, base_only: bool) -> Self {
        self.config.base_only = base_only;
        self
    }

    #[must_use]
    pub fn robots(mut self, enabled: bool) -> Self {
        self.config.robots = enabled;
        self
    }

    #[must_use]
    pub fn sitemap(mut self, enabled: bool) -> Self {
        self.config.sitemap = enabled;
        self
    }

    #[must_use]
    pub fn linkfinder(mut self, enabled: bool) -> Self {
        self.config.linkfinder = enabled;
        self
    }

    #[must_use]
    pub fn archives(mut self, archives: ArchivesConfig) -> Self {
        self.config.archives = archives;
        self
    }

    #[must_use]
    pub fn render(mut self, render: RenderConfig) -> Self {
        self.config.render = render;
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.config.proxy = proxy;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: UserAgentMode) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    #[must_use]
    pub fn cookie(mut self, cookie: Option<String>) -> Self {
        self.config.cookie = cookie;
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn whitelist(mut self, pattern: &str) -> Result<Self> {
        self.config.whitelist = Some(Regex::new(pattern).context("invalid whitelist pattern")?);
        Ok(self)
    }

    pub fn blacklist(mut self, pattern: &str) -> Result<Self> {
        self.config.blacklist = Some(Regex::new(pattern).context("invalid blacklist pattern")?);
        Ok(self)
    }

    #[must_use]
    pub fn whitelist_domain(mut self, domain: Option<String>) -> Self {
        self.config.whitelist_domain = domain;
        self
    }

    #[must_use]
    pub fn filter_length(mut self, lengths: Vec<usize>) -> Self {
        self.config.filter_length = lengths;
        self
    }

    #[must_use]
    pub fn no_redirect(mut self, no_redirect: bool) -> Self {
        self.config.no_redirect = no_redirect;
        self
    }

    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.config.quiet = quiet;
        self
    }

    #[must_use]
    pub fn json(mut self, json: bool) -> Self {
        self.config.json = json;
        self
    }

    #[must_use]
    pub fn show_length(mut self, show_length: bool) -> Self {
        self.config.show_length = show_length;
        self
    }

    #[must_use]
    pub fn raw(mut self, raw: bool) -> Self {
        self.config.raw = raw;
        self
    }

    #[must_use]
    pub fn types(mut self, types: ExtensionFilter) -> Self {
        self.config.types = types;
        self
    }

    #[must_use]
    pub fn output_dir(mut self, output_dir: Option<PathBuf>) -> Self {
        self.config.output_dir = output_dir;
        self
    }
}

impl CrawlerConfigBuilder<Ready> {
    /// Consumes the builder, returning the resolved target string and the
    /// immutable configuration. Only callable once `target()` has been set.
    pub fn build(self) -> (String, CrawlerConfig) {
        (
            self.target.expect("Ready state guarantees target is set"),
            self.config,
        )
    }
}
