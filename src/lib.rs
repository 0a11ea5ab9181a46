//! pricegrab - hourly acquisition of retail price-transparency files.
//!
//! Logs into (or queries) chain price portals, finds the archives published
//! for a target hour, downloads and decompresses them, and files the XML
//! under a category tree: `{output}/{groceries|promotions|stores}/{user}/`.

pub mod archive;
pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod hour_window;
pub mod http_client;
pub mod pipeline;
pub mod routing;
pub mod runner;
pub mod scratch;
pub mod sites;
pub mod walker;
