#![forbid(unsafe_code)]

//! Channel scrape pipeline: resolve a channel to its uploads, fetch every
//! video's metadata on a bounded worker pool, cache the result set per channel
//! and upsert it into the SQLite catalog the dashboard reads.

pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod pipeline;
pub mod platform;
pub mod record;
pub mod resolver;
pub mod scraper;
pub mod store;
