//! Per-target crawl engine (§4.6): the primary page collector, the JS
//! sub-collector, per-host politeness pacing, and per-host concurrency
//! limiting.

pub mod core;
pub mod domain_limiter;
pub mod elements;
pub mod grep;
pub mod rate_limiter;

pub use core::{Engine, NoRenderHook, RenderHook};
pub use domain_limiter::DomainLimiter;
pub use rate_limiter::Politeness;
