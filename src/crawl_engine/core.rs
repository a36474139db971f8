//! The per-target crawl engine (§4.6): primary collector plus JS
//! sub-collector, sharing one concurrency-limited task pool. Grounded on
//! `src/crawl_engine/core.rs`'s `Semaphore`-gated `FuturesUnordered` pool
//! over a `tokio::sync::Mutex<VecDeque<_>>` queue, generalized from
//! chromiumoxide DOM inspection to `reqwest` response bodies parsed with
//! `scraper`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::StatusCode;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use crate::config::CrawlerConfig;
use crate::crawl_engine::domain_limiter::DomainLimiter;
use crate::crawl_engine::elements::{self, ElementFinding};
use crate::crawl_engine::grep;
use crate::crawl_engine::rate_limiter::Politeness;
use crate::dedupe::Dedupers;
use crate::emit::{EmitRecord, Kind, Sink};
use crate::fetcher::Fetcher;
use crate::imurl::ImUrl;
use crate::linkfinder::{self, Finding};
use crate::scope::Scope;

/// Soft cap past which a response body is emitted as `url` but skipped for
/// grep/linkfinder/element scanning (§4.6).
const GREP_SOFT_CAP: usize = 4 * 1024 * 1024;

/// Bodies smaller than this on an HTML response look like an SPA shell and
/// are candidates for rendering (§4.9).
const RENDER_CANDIDATE_MAX: usize = 60 * 1024;

/// HTTP status codes suppressed from `url` emission (§7, §9's uniform
/// suppression decision — applied to every `url` emission path).
fn is_suppressed_status(status: StatusCode) -> bool {
    let code = status.as_u16();
    code == 404 || code == 429 || code < 100 || code >= 500
}

enum Work {
    Page {
        url: ImUrl,
        depth: u32,
        referer: Option<String>,
    },
    Script {
        url: ImUrl,
    },
}

/// Hook invoked on small HTML responses to feed the optional render queue
/// (§4.9). The `render` feature implements this; without it, a no-op.
pub trait RenderHook: Send + Sync {
    fn maybe_enqueue(&self, url: &ImUrl, body_len: usize);
}

pub struct NoRenderHook;
impl RenderHook for NoRenderHook {
    fn maybe_enqueue(&self, _url: &ImUrl, _body_len: usize) {}
}

/// One target's crawl: shared state for the primary collector and the JS
/// sub-collector, which differ only in whether depth/element-scanning apply.
/// The queue is an `Engine` field rather than a `run()` local so that
/// external producers (robots, sitemap, archives, render — §9 "cyclic
/// producer graph") can feed canonical URLs into the same enqueue path
/// while the crawl is in flight, via [`Engine::enqueue_external`].
pub struct Engine {
    pub config: Arc<CrawlerConfig>,
    pub scope: Arc<Scope>,
    pub apex: String,
    pub fetcher: Arc<Fetcher>,
    pub dedupers: Arc<Dedupers>,
    pub domain_limiter: Arc<DomainLimiter>,
    pub politeness: Arc<Politeness>,
    pub sink: Arc<Sink>,
    pub source: String,
    pub render_hook: Arc<dyn RenderHook>,
    queue: Mutex<VecDeque<Work>>,
    /// Count of producers still expected to call `enqueue_external` (or
    /// finish without doing so). `run()` does not treat the queue as
    /// quiesced while this is nonzero, even if it is momentarily empty.
    pending_producers: AtomicUsize,
    /// Set by the driver's `ctrl_c` handler (§5 "Cancellation & timeouts"):
    /// once true, `run()` stops pulling new work from the queue and lets
    /// whatever is already in flight finish, rather than waiting on
    /// producers or remaining queued items.
    shutting_down: AtomicBool,
}

/// RAII token a producer holds for its lifetime; decrements
/// `pending_producers` on drop so a producer that enqueues nothing (or
/// panics) still lets the engine quiesce.
pub struct ProducerGuard<'a> {
    engine: &'a Engine,
}

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        self.engine.pending_producers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Engine {
    #[must_use]
    pub fn new(
        config: Arc<CrawlerConfig>,
        scope: Arc<Scope>,
        apex: String,
        fetcher: Arc<Fetcher>,
        dedupers: Arc<Dedupers>,
        domain_limiter: Arc<DomainLimiter>,
        politeness: Arc<Politeness>,
        sink: Arc<Sink>,
        source: String,
        render_hook: Arc<dyn RenderHook>,
    ) -> Self {
        Self {
            config,
            scope,
            apex,
            fetcher,
            dedupers,
            domain_limiter,
            politeness,
            sink,
            source,
            render_hook,
            queue: Mutex::new(VecDeque::new()),
            pending_producers: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Whether `url` is in scope: it must match the active scope patterns
    /// and, per §6's `whitelist`/`blacklist` options, additionally match
    /// the whitelist regex (if one is configured) and not match the
    /// blacklist regex (if one is configured). Checked everywhere the
    /// engine decides whether to enqueue, fetch, or emit a URL.
    fn in_scope(&self, url: &str) -> bool {
        if !self.scope.matches(url) {
            return false;
        }
        if let Some(whitelist) = &self.config.whitelist {
            if !whitelist.is_match(url) {
                return false;
            }
        }
        if let Some(blacklist) = &self.config.blacklist {
            if blacklist.is_match(url) {
                return false;
            }
        }
        true
    }

    /// Stops feeding new queue items; in-flight fetches still drain (§5).
    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Registers one outstanding producer task (robots, sitemap, archives,
    /// render). Hold the returned guard for the producer's lifetime.
    #[must_use]
    pub fn register_producer(&self) -> ProducerGuard<'_> {
        self.pending_producers.fetch_add(1, Ordering::SeqCst);
        ProducerGuard { engine: self }
    }

    /// Entry point for an external producer to feed a discovered URL into
    /// the primary collector at depth 0 (§9): canonicalizes, scope-checks,
    /// claims the dedupe key, and — if all succeed — enqueues and emits
    /// `kind` tagged with `source`. Returns whether it was enqueued.
    pub async fn enqueue_external(&self, url: ImUrl, source: &str, kind: Kind) -> bool {
        self.enqueue_external_opt(url, source, kind, true).await
    }

    /// As [`Self::enqueue_external`], but `emit` controls whether a printed
    /// record is produced. Used by the archive enricher (§4.8: "they are
    /// emitted only if the operator has asked for their printed inclusion")
    /// to keep feeding discovered URLs into the crawl even when
    /// `includeOtherResults` is off.
    pub async fn enqueue_external_opt(&self, url: ImUrl, source: &str, kind: Kind, emit: bool) -> bool {
        let Ok(canonical) = url.canonicalize() else {
            return false;
        };
        if !self.in_scope(canonical.as_str()) || canonical.is_disallowed_extension() {
            return false;
        }
        if !self.try_claim(&canonical) {
            return false;
        }
        if emit {
            self.emit(EmitRecord::new(source, source, kind, canonical.as_str())).await;
        }
        self.queue.lock().await.push_back(Work::Page {
            url: canonical,
            depth: 0,
            referer: None,
        });
        true
    }

    /// Drive the crawl from `seed` to quiescence: the queue is empty, no
    /// task is in flight, and no producer remains registered (§4.6
    /// "Quiescence").
    pub async fn run(self: Arc<Self>, seed: ImUrl) {
        if let Ok(canonical) = seed.canonicalize() {
            if self.try_claim(&canonical) {
                self.queue.lock().await.push_back(Work::Page {
                    url: canonical,
                    depth: 0,
                    referer: None,
                });
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrent));
        let mut in_flight = FuturesUnordered::new();

        loop {
            if self.shutting_down.load(Ordering::SeqCst) && in_flight.is_empty() {
                break;
            }
            while !self.shutting_down.load(Ordering::SeqCst) {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                let Some(work) = self.queue.lock().await.pop_front() else {
                    drop(permit);
                    break;
                };
                let engine = Arc::clone(&self);
                in_flight.push(tokio::spawn(async move {
                    let new_work = engine.process(work).await;
                    let mut q = engine.queue.lock().await;
                    q.extend(new_work);
                    drop(permit);
                }));
            }

            if in_flight.is_empty() {
                let queue_empty = self.queue.lock().await.is_empty();
                let producers_done = self.pending_producers.load(Ordering::SeqCst) == 0;
                if queue_empty && producers_done {
                    break;
                }
                if queue_empty {
                    // Nothing to do until a producer enqueues more work.
                    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                } else {
                    // Pool momentarily empty while waiting on permits.
                    tokio::task::yield_now().await;
                }
                continue;
            }

            in_flight.next().await;
        }
    }

    async fn process(&self, work: Work) -> Vec<Work> {
        match work {
            Work::Page { url, depth, referer } => self.process_page(url, depth, referer).await,
            Work::Script { url } => self.process_script(url).await,
        }
    }

    async fn process_page(&self, url: ImUrl, depth: u32, referer: Option<String>) -> Vec<Work> {
        let Ok(canonical) = url.canonicalize() else {
            return Vec::new();
        };
        if !self.in_scope(canonical.as_str()) || canonical.is_disallowed_extension() {
            return Vec::new();
        }

        let Some((status, body, content_type)) = self.fetch(&canonical, referer.as_deref()).await else {
            return Vec::new();
        };

        self.emit_url_record(&canonical, status, body.len()).await;

        let mut new_work = Vec::new();
        if body.len() <= GREP_SOFT_CAP {
            self.run_grep(&canonical, &body).await;

            let is_html = content_type.contains("html");
            if is_html {
                new_work.extend(self.scan_elements(&canonical, &body, depth).await);
                if body.len() < RENDER_CANDIDATE_MAX {
                    self.render_hook.maybe_enqueue(&canonical, body.len());
                }
            }
            if self.config.effective_linkfinder() && (is_html || content_type.contains("xml")) {
                new_work.extend(self.run_linkfinder(&canonical, &body, Some(depth)).await);
            }
        } else {
            debug!("{canonical}: body too large ({} bytes), skipping grep/linkfinder", body.len());
        }

        new_work
    }

    async fn process_script(&self, url: ImUrl) -> Vec<Work> {
        let Ok(canonical) = url.canonicalize() else {
            return Vec::new();
        };
        if !self.in_scope(canonical.as_str()) {
            return Vec::new();
        }

        let Some((status, body, _content_type)) = self.fetch(&canonical, None).await else {
            return Vec::new();
        };

        self.emit_url_record(&canonical, status, body.len()).await;

        if body.len() <= GREP_SOFT_CAP {
            self.run_grep(&canonical, &body).await;
            if self.config.effective_linkfinder() {
                // The JS sub-collector has no depth cap (§4.6); pages it
                // discovers re-enter the primary collector at depth 0.
                return self.run_linkfinder(&canonical, &body, None).await;
            }
        }
        Vec::new()
    }

    /// Claims `canonical` for fetching: `true` on the first caller to
    /// observe this key, `false` for every subsequent one (§3 invariant 3:
    /// "a canonical URL is visited at most once per target run"). Must be
    /// called exactly once per URL, at the point it is turned into a
    /// [`Work::Page`]/[`Work::Script`] item — never again at fetch time,
    /// or the second observation would (correctly, but uselessly) report
    /// a duplicate and the fetch would never happen.
    fn try_claim(&self, canonical: &ImUrl) -> bool {
        match canonical.dedupe_key() {
            Ok(key) => !self.dedupers.visited.observe(&key),
            Err(_) => false,
        }
    }

    async fn fetch(&self, canonical: &ImUrl, referer: Option<&str>) -> Option<(StatusCode, String, String)> {
        let Some(host) = canonical.host() else {
            return None;
        };
        self.politeness.wait_turn(host).await;
        let _permit = self.domain_limiter.acquire(host.to_string()).await;

        let response = match self.fetcher.get(canonical.as_str(), referer).await {
            Ok(resp) => resp,
            Err(err) => {
                debug!("{canonical}: transport error: {err}");
                return None;
            }
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("{canonical}: failed to read body: {err}");
                return None;
            }
        };
        let body = String::from_utf8_lossy(&bytes).into_owned();
        Some((status, body, content_type))
    }

    async fn emit_url_record(&self, canonical: &ImUrl, status: StatusCode, length: usize) {
        if is_suppressed_status(status) {
            return;
        }
        if self.config.filter_length.contains(&length) {
            return;
        }
        let record = EmitRecord::new(&self.source, "crawl", Kind::Url, canonical.as_str())
            .with_status(status.as_u16())
            .with_length(length);
        self.emit(record).await;
    }

    async fn run_grep(&self, canonical: &ImUrl, body: &str) {
        for sub in grep::find_subdomains(body, &self.apex) {
            if !self.dedupers.subdomains.observe(&sub) {
                self.emit(EmitRecord::new(&self.source, canonical.as_str(), Kind::Subdomains, sub)).await;
            }
        }
        for bucket in grep::find_s3_buckets(body) {
            if !self.dedupers.aws_buckets.observe(&bucket) {
                self.emit(EmitRecord::new(&self.source, canonical.as_str(), Kind::Aws, bucket)).await;
            }
        }
    }

    async fn scan_elements(&self, page: &ImUrl, body: &str, depth: u32) -> Vec<Work> {
        let mut new_work = Vec::new();
        let page_key = page.dedupe_key().unwrap_or_else(|_| page.as_str().to_lowercase());

        for finding in elements::scan(body, page) {
            match finding {
                ElementFinding::Href(href) => {
                    if let Some(work) = self.consider_href(&href, depth, page).await {
                        new_work.push(work);
                    }
                }
                ElementFinding::DisallowedHref => {}
                ElementFinding::Form => {
                    if !self.dedupers.forms.observe(&page_key) {
                        self.emit(EmitRecord::new(&self.source, page.as_str(), Kind::Form, page.as_str())).await;
                    }
                }
                ElementFinding::UploadForm => {
                    if !self.dedupers.upload_forms.observe(&page_key) {
                        self.emit(EmitRecord::new(
                            &self.source,
                            page.as_str(),
                            Kind::UploadForm,
                            page.as_str(),
                        ))
                        .await;
                    }
                }
                ElementFinding::Script(src) => {
                    new_work.extend(self.consider_script(&src).await);
                }
            }
        }
        new_work
    }

    async fn consider_href(&self, href: &ImUrl, depth: u32, page: &ImUrl) -> Option<Work> {
        if !self.in_scope(href.as_str()) {
            return None;
        }
        let canonical = href.canonicalize().ok()?;
        if canonical.is_disallowed_extension() {
            return None;
        }
        let next_depth = depth + 1;
        if next_depth > self.config.max_depth() {
            return None;
        }
        if !self.try_claim(&canonical) {
            return None;
        }
        self.emit(EmitRecord::new(&self.source, page.as_str(), Kind::Href, canonical.as_str())).await;
        Some(Work::Page {
            url: canonical,
            depth: next_depth,
            referer: Some(page.as_str().to_string()),
        })
    }

    async fn consider_script(&self, src: &ImUrl) -> Vec<Work> {
        if !src.is_script_like() {
            return Vec::new();
        }
        let key = src.dedupe_key().unwrap_or_else(|_| src.as_str().to_lowercase());
        if self.dedupers.js_assets.observe(&key) {
            return Vec::new();
        }
        self.emit(EmitRecord::new(&self.source, src.as_str(), Kind::Javascript, src.as_str())).await;

        let mut work = Vec::new();
        if self.config.effective_linkfinder() && self.in_scope(src.as_str()) {
            work.push(Work::Script { url: src.clone() });
            if let Some(unminified) = elements::unminified_counterpart(src) {
                work.push(Work::Script { url: unminified });
            }
        }
        work
    }

    /// `parent_depth` is `Some(depth)` when called from the primary
    /// collector (depth cap enforced as usual) and `None` when called from
    /// the JS sub-collector, which has no depth cap (§4.6) — discovered
    /// pages re-enter the primary queue fresh at depth 0.
    async fn run_linkfinder(&self, document_url: &ImUrl, body: &str, parent_depth: Option<u32>) -> Vec<Work> {
        let mut new_work = Vec::new();
        for finding in linkfinder::find(body, document_url) {
            match finding {
                Finding::Link(url) => {
                    if !self.in_scope(url.as_str()) {
                        continue;
                    }
                    let Ok(canonical) = url.canonicalize() else { continue };
                    if canonical.is_disallowed_extension() {
                        continue;
                    }

                    let next_depth = match parent_depth {
                        Some(depth) => {
                            let next = depth + 1;
                            if next > self.config.max_depth() {
                                continue;
                            }
                            next
                        }
                        None => 0,
                    };

                    if !self.try_claim(&canonical) {
                        continue;
                    }
                    self.emit(EmitRecord::new(
                        &self.source,
                        document_url.as_str(),
                        Kind::Linkfinder,
                        canonical.as_str(),
                    ))
                    .await;
                    new_work.push(Work::Page {
                        url: canonical,
                        depth: next_depth,
                        referer: Some(document_url.as_str().to_string()),
                    });
                }
                Finding::ScriptAsset(url) => {
                    new_work.extend(self.consider_script(&url).await);
                }
            }
        }
        new_work
    }

    /// Writes `record` to the sink on the caller's own task rather than a
    /// detached `tokio::spawn`. This keeps per-URL emission order intact
    /// (§5: `href` before `url` before `linkfinder`/`subdomains`/`aws`)
    /// and folds the write into `run()`'s in-flight tracking, so
    /// `Sink::close`'s single flush can never race a still-pending emit.
    async fn emit(&self, record: EmitRecord) {
        if let Err(err) = self.sink.emit(record).await {
            debug!("emit failed: {err}");
        }
    }
}
