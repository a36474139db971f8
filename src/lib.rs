//! Concurrent reconnaissance web crawler: URL discovery, regex-based
//! JS/HTML extraction, scope/canonicalization, deduplication,
//! robots/sitemap parsing, archive enrichers, and optional headless
//! rendering.

pub mod archives;
pub mod config;
pub mod crawl_engine;
pub mod dedupe;
pub mod driver;
pub mod emit;
pub mod fetcher;
pub mod imurl;
pub mod linkfinder;
pub mod robots;
pub mod scope;
pub mod sitemap;
pub mod utils;

#[cfg(feature = "render")]
pub mod render;
