//! Optional headless render manager (§4.9): one browser context per
//! target, a budget-bounded queue of candidate pages, resource blocking,
//! and XHR/Fetch interception fed back into the engine's enqueue path.
//!
//! Grounded on `browser_pool/mod.rs`'s `Browser`/handler-task pairing and
//! launch sequence, trimmed from an always-on pre-warmed multi-browser
//! pool (dynamic scaling, keepalive pings, idle eviction) down to a
//! single short-lived browser per target, since the spec's render pass
//! is one bounded, budget-capped sweep rather than a long-lived service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams,
    RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::ResourceType;
use futures::StreamExt;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::crawl_engine::core::{Engine, RenderHook};
use crate::dedupe::Dedupers;
use crate::emit::{EmitRecord, Kind};
use crate::imurl::ImUrl;

/// Resource types blocked during render to save bandwidth and avoid
/// navigating away on unrelated asset loads (§4.9).
const BLOCKED_RESOURCE_TYPES: &[ResourceType] = &[
    ResourceType::Image,
    ResourceType::Stylesheet,
    ResourceType::Font,
    ResourceType::Media,
];

/// Feeds candidate URLs (small HTML bodies, likely SPA shells) from the
/// primary collector into the render pass, implementing [`RenderHook`].
/// `maybe_enqueue` is called synchronously from the fetch path, so it
/// only performs a non-blocking channel send; the actual navigation runs
/// on [`RenderManager::run`].
pub struct RenderQueue {
    tx: mpsc::UnboundedSender<ImUrl>,
    /// The target's shared `render_queue` deduper (§3: "Separate dedupers
    /// exist for ... render queue"), so a candidate already forwarded once
    /// is never queued for rendering twice even if `maybe_enqueue` is ever
    /// reached for the same URL more than once.
    dedupers: Arc<Dedupers>,
}

impl RenderHook for RenderQueue {
    fn maybe_enqueue(&self, url: &ImUrl, _body_len: usize) {
        let Ok(key) = url.dedupe_key() else { return };
        if self.dedupers.render_queue.observe(&key) {
            return;
        }
        let _ = self.tx.send(url.clone());
    }
}

/// Handle the driver holds to tell a running [`RenderManager`] that the
/// primary crawl has quiesced. The manager's receive loop can never rely on
/// the channel closing on its own: the sole sender lives inside the
/// `RenderQueue` held by `engine.render_hook`, and `engine` itself stays
/// alive for the lifetime of the render task (it needs `Arc<Engine>` to
/// enqueue network URLs), so the sender is always reachable and `recv`
/// would otherwise never return `None`.
#[derive(Clone)]
pub struct RenderStop(Arc<Notify>);

impl RenderStop {
    /// Tells the manager to drain whatever is already queued and return,
    /// rather than waiting for more candidates that will never arrive.
    pub fn stop(&self) {
        self.0.notify_one();
    }
}

/// Drives the headless render pass for one target: receives candidates
/// from a [`RenderQueue`], launches one browser lazily on first use, and
/// navigates up to `budget` pages, each bounded by `timeout`.
pub struct RenderManager {
    rx: mpsc::UnboundedReceiver<ImUrl>,
    budget: usize,
    timeout: Duration,
    rendered: AtomicUsize,
    stop: Arc<Notify>,
}

impl RenderManager {
    /// Builds a connected `(RenderQueue, RenderManager, RenderStop)` triple.
    /// The queue half is handed to the engine as its [`RenderHook`]; the
    /// manager half is driven by [`RenderManager::run`] as an independent
    /// producer; the stop handle is kept by the driver and fired once
    /// `Engine::run` returns.
    #[must_use]
    pub fn pair(budget: usize, timeout: Duration, dedupers: Arc<Dedupers>) -> (Arc<RenderQueue>, Self, RenderStop) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(Notify::new());
        (
            Arc::new(RenderQueue { tx, dedupers }),
            Self {
                rx,
                budget,
                timeout,
                rendered: AtomicUsize::new(0),
                stop: Arc::clone(&stop),
            },
            RenderStop(stop),
        )
    }

    /// Consumes render candidates until told to stop (the driver calls
    /// [`RenderStop::stop`] once `Engine::run` quiesces) or the render
    /// budget is exhausted, whichever comes first. Registers itself as a
    /// producer on `engine` for each navigation so the crawl does not
    /// quiesce early while a render pass might still enqueue network URLs.
    pub async fn run(mut self, engine: Arc<Engine>, source: String) {
        let mut browser: Option<Browser> = None;
        let mut handler_task: Option<tokio::task::JoinHandle<()>> = None;

        'outer: while self.rendered.load(Ordering::Relaxed) < self.budget {
            let url = tokio::select! {
                biased;
                maybe_url = self.rx.recv() => match maybe_url {
                    Some(url) => url,
                    None => break 'outer,
                },
                () = self.stop.notified() => {
                    while self.rendered.load(Ordering::Relaxed) < self.budget {
                        let Ok(url) = self.rx.try_recv() else { break };
                        if !self.render_candidate(&mut browser, &mut handler_task, url, &engine, &source).await {
                            break;
                        }
                    }
                    break 'outer;
                }
            };

            if !self.render_candidate(&mut browser, &mut handler_task, url, &engine, &source).await {
                break;
            }
        }

        if let Some(b) = browser.as_mut() {
            let _ = b.close().await;
        }
        if let Some(handle) = handler_task {
            handle.abort();
        }
    }

    /// Renders one candidate, lazily launching the browser on first use.
    /// Returns `false` if the browser failed to launch, telling the caller
    /// to stop the whole pass rather than retry candidate by candidate.
    async fn render_candidate(
        &self,
        browser: &mut Option<Browser>,
        handler_task: &mut Option<tokio::task::JoinHandle<()>>,
        url: ImUrl,
        engine: &Arc<Engine>,
        source: &str,
    ) -> bool {
        if browser.is_none() {
            match launch(self.timeout).await {
                Ok((b, handler)) => {
                    *browser = Some(b);
                    *handler_task = Some(handler);
                }
                Err(err) => {
                    warn!("render: failed to launch headless browser: {err}");
                    return false;
                }
            }
        }
        let Some(b) = browser.as_ref() else { return false };

        let guard = engine.register_producer();
        if let Err(err) = self.render_one(b, &url, Arc::clone(engine), source).await {
            debug!("render: navigation for {url} failed: {err}");
        }
        drop(guard);
        self.rendered.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn render_one(
        &self,
        browser: &Browser,
        url: &ImUrl,
        engine: Arc<Engine>,
        source: &str,
    ) -> Result<()> {
        let page = browser
            .new_page("about:blank")
            .await
            .context("opening render page")?;

        page.execute(
            FetchEnableParams::builder()
                .patterns(vec![RequestPattern::builder()
                    .url_pattern("*")
                    .request_stage(RequestStage::Request)
                    .build()])
                .build(),
        )
        .await
        .context("enabling fetch domain")?;

        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .context("subscribing to request-paused events")?;

        let page_for_interception = page.clone();
        let engine_for_interception = Arc::clone(&engine);
        let source_owned = source.to_string();
        let apex_scope_check = url.clone();
        let interception = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let request_url = event.request.url.clone();
                let resource_type = event.resource_type.clone();
                let request_id = event.request_id.clone();

                let blocked = BLOCKED_RESOURCE_TYPES.contains(&resource_type);
                if blocked {
                    let _ = page_for_interception
                        .execute(FailRequestParams::new(
                            request_id,
                            chromiumoxide::cdp::browser_protocol::network::ErrorReason::BlockedByClient,
                        ))
                        .await;
                    continue;
                }

                let is_xhr_or_fetch = matches!(
                    resource_type,
                    ResourceType::XHR | ResourceType::Fetch
                );
                if is_xhr_or_fetch {
                    if let Ok(discovered) = ImUrl::parse(&request_url) {
                        if discovered.as_str() != apex_scope_check.as_str() {
                            // §4.9/§8: only URLs that are in scope and not
                            // already seen are enqueued and emitted as
                            // `network` — enqueue_external enforces both and
                            // only emits on success, preserving scope
                            // soundness for this kind.
                            let _ = engine_for_interception
                                .enqueue_external(discovered.clone(), &source_owned, Kind::Network)
                                .await;
                        }
                    }
                }

                let _ = page_for_interception
                    .execute(ContinueRequestParams::new(request_id))
                    .await;
            }
        });

        let navigation = page.goto(url.as_str());
        let result = tokio::time::timeout(self.timeout, navigation).await;
        interception.abort();

        match result {
            Ok(Ok(_)) => {
                engine
                    .sink
                    .emit(EmitRecord::new(source, source, Kind::Render, url.as_str()))
                    .await
                    .ok();
            }
            Ok(Err(err)) => {
                debug!("render: {url} navigation error: {err}");
            }
            Err(_) => {
                debug!("render: {url} navigation exceeded {:?} timeout", self.timeout);
            }
        }

        let _ = page.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maybe_enqueue_forwards_into_the_manager_channel() {
        let (queue, mut manager, _stop) = RenderManager::pair(5, Duration::from_secs(1), Arc::new(Dedupers::new()));
        let url = ImUrl::parse("https://a.test/shell").unwrap();

        queue.maybe_enqueue(&url, 1024);

        let received = manager.rx.try_recv().expect("candidate forwarded");
        assert_eq!(received.as_str(), "https://a.test/shell");
    }

    #[test]
    fn maybe_enqueue_is_deduped() {
        let (queue, mut manager, _stop) = RenderManager::pair(5, Duration::from_secs(1), Arc::new(Dedupers::new()));
        let url = ImUrl::parse("https://a.test/shell").unwrap();

        queue.maybe_enqueue(&url, 1024);
        queue.maybe_enqueue(&url, 1024);

        assert!(manager.rx.try_recv().is_ok());
        assert!(manager.rx.try_recv().is_err());
    }
}

async fn launch(_timeout: Duration) -> Result<(Browser, tokio::task::JoinHandle<()>)> {
    let config = BrowserConfig::builder()
        .no_sandbox()
        .build()
        .map_err(|err| anyhow::anyhow!("invalid browser config: {err}"))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("launching headless browser")?;

    let handle = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                debug!("render: browser handler event error: {err}");
            }
        }
    });

    Ok((browser, handle))
}
