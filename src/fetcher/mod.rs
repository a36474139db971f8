//! Shared HTTP transport and per-target request policy (§4.5).
//!
//! One `reqwest::Client` is built per process for connection reuse; a
//! per-target [`Fetcher`] wraps it with the proxy, redirect, header, cookie
//! and user-agent policy for that target.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::seq::IndexedRandom;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};

use crate::scope::Scope;
use crate::utils::constants::{DESKTOP_USER_AGENTS, MOBILE_USER_AGENTS};

/// User-agent selection mode (`userAgent` config option: `web|mobi|<literal>`).
#[derive(Debug, Clone)]
pub enum UserAgentMode {
    Desktop,
    Mobile,
    Literal(String),
}

impl UserAgentMode {
    fn pick(&self) -> String {
        match self {
            Self::Desktop => (*DESKTOP_USER_AGENTS
                .choose(&mut rand::rng())
                .unwrap_or(&DESKTOP_USER_AGENTS[0]))
            .to_string(),
            Self::Mobile => (*MOBILE_USER_AGENTS
                .choose(&mut rand::rng())
                .unwrap_or(&MOBILE_USER_AGENTS[0]))
            .to_string(),
            Self::Literal(s) => s.clone(),
        }
    }
}

/// Builds the single shared transport used across all targets for
/// connection reuse (§4.5: dial timeout 10s, keepalive 30s, idle pool 100,
/// up to 1000 connections per host, TLS verification on). [`Fetcher::new`]
/// clones this directly whenever a target needs no proxy and no scope-bound
/// redirect policy, so the default redirect behavior here (follow up to 10
/// hops) must match what a plain per-target client would otherwise get.
pub fn build_shared_client() -> Result<Client> {
    ClientBuilder::new()
        .connect_timeout(Duration::from_secs(10))
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(100)
        .danger_accept_invalid_certs(false)
        .redirect(Policy::limited(10))
        .build()
        .context("failed to build shared HTTP transport")
}

/// Per-target fetch policy: proxy, redirect, headers, cookies, UA.
pub struct FetcherConfig {
    pub request_timeout: Duration,
    pub proxy: Option<String>,
    pub user_agent: UserAgentMode,
    pub cookie: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub no_off_scope_redirect: bool,
}

impl FetcherConfig {
    /// `timeout` of zero seconds is coerced to 10 (§6).
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let request_timeout = if timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            timeout
        };
        Self {
            request_timeout,
            proxy: None,
            user_agent: UserAgentMode::Desktop,
            cookie: None,
            extra_headers: Vec::new(),
            no_off_scope_redirect: false,
        }
    }
}

/// A per-target HTTP client built from the shared transport plus this
/// target's proxy/redirect/header policy.
pub struct Fetcher {
    client: Client,
    config: FetcherConfig,
}

impl Fetcher {
    /// Builds a per-target fetcher. When the target needs neither a proxy
    /// nor a scope-bound redirect policy, `shared` is cloned directly
    /// (`reqwest::Client` is `Arc`-backed internally, so this reuses its
    /// connection pool rather than opening a second one) instead of
    /// building an independent client. A proxy or `no_off_scope_redirect`
    /// each require transport-level settings `reqwest` only applies at
    /// build time, so those cases still get their own client; when
    /// `no_off_scope_redirect` is set, that client's redirect policy stops
    /// following (returns the last response) once the next hop's host
    /// falls outside `scope`.
    pub fn new(shared: &Client, config: FetcherConfig, scope: Arc<Scope>) -> Result<Self> {
        if config.proxy.is_none() && !config.no_off_scope_redirect {
            return Ok(Self {
                client: shared.clone(),
                config,
            });
        }

        let mut builder = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy URL")?);
        }

        builder = if config.no_off_scope_redirect {
            builder.redirect(Policy::custom(move |attempt| {
                if scope.matches(&attempt.url().to_string()) {
                    attempt.follow()
                } else {
                    attempt.stop()
                }
            }))
        } else {
            builder.redirect(Policy::limited(10))
        };

        let client = builder
            .build()
            .context("failed to build per-target HTTP client")?;
        Ok(Self { client, config })
    }

    /// Issue a GET request for `url`, applying browsery default headers,
    /// configured cookies/headers, and the request timeout. `referer` is the
    /// previous hop's URL, if any.
    pub async fn get(&self, url: &str, referer: Option<&str>) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Upgrade-Insecure-Requests", "1")
            .header("User-Agent", self.config.user_agent.pick());

        if let Some(referer) = referer {
            req = req.header("Referer", referer);
        }
        if let Some(cookie) = &self.config.cookie {
            req = req.header("Cookie", cookie.clone());
        }
        for (key, value) in &self.config.extra_headers {
            req = req.header(key.clone(), value.clone());
        }

        req.send().await.context("request failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_coerced_to_ten_seconds() {
        let config = FetcherConfig::with_timeout(Duration::ZERO);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn nonzero_timeout_preserved() {
        let config = FetcherConfig::with_timeout(Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn fetcher_builds_without_proxy_or_scoped_redirect() {
        let shared = build_shared_client().unwrap();
        let scope = Arc::new(Scope::host_only("a.test", false).unwrap());
        let config = FetcherConfig::with_timeout(Duration::from_secs(10));
        assert!(Fetcher::new(&shared, config, scope).is_ok());
    }

    #[tokio::test]
    async fn fetcher_builds_with_scope_redirect_policy() {
        let shared = build_shared_client().unwrap();
        let scope = Arc::new(Scope::host_only("a.test", false).unwrap());
        let mut config = FetcherConfig::with_timeout(Duration::from_secs(10));
        config.no_off_scope_redirect = true;
        let fetcher = Fetcher::new(&shared, config, scope);
        assert!(fetcher.is_ok());
    }
}
