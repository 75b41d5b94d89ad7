//! # Markup Scraper
//!
//! Retrieves the HTML of public web pages on behalf of untrusted callers,
//! in two ways:
//!
//! - **Static**: a single bounded HTTP GET. The body is streamed and the
//!   read is aborted as soon as it crosses the size ceiling. The markup is
//!   then classified as server-rendered or JavaScript-rendered.
//! - **Dynamic**: a headless Chromium renders the page, waits for network
//!   quiescence plus a settle delay, and returns the live DOM together with a
//!   clipped PNG screenshot. Every render gets its own browser, torn down
//!   page-then-browser on every exit path.
//!
//! Both paths go through the same admission guard first, which rejects
//! non-HTTP schemes, private or loopback hosts and an explicit deny-list.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use markup_scraper::{AdmissionGuard, Config, ContentClassifier, PatternClassifier, StaticFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let guard = AdmissionGuard::new(&config.admission)?;
//!     let fetcher = StaticFetcher::new(&config, &guard)?;
//!
//!     let url = guard.admit("https://example.com").await.into_result()?;
//!     let document = fetcher.fetch(&url).await?;
//!     let classification = PatternClassifier::new().classify(&document.html);
//!
//!     println!("{} bytes, JS rendered: {}", document.byte_length, classification.is_js_rendered);
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! markup-scraper serve --bind 0.0.0.0:3000 --metrics
//! markup-scraper fetch --url https://example.com --output page.html
//! markup-scraper render --url https://example.com --screenshot page.png
//! markup-scraper check --url http://192.168.1.1
//! ```

/// Configuration and settings
pub mod config;

/// Error types and HTTP status mapping
pub mod error;

/// SSRF admission guard for caller-supplied URLs
pub mod admission;

/// Bounded static HTTP retrieval
pub mod static_fetch;

/// JavaScript-rendering heuristic
pub mod heuristic;

/// Headless-browser rendering with guaranteed teardown
pub mod renderer;

/// HTTP endpoints
pub mod server;

/// Command-line interface implementation
pub mod cli;

/// Request metrics and the Prometheus exporter
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod testing;


pub use admission::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use heuristic::*;
pub use metrics::*;
pub use renderer::*;
pub use server::*;
pub use static_fetch::*;
pub use utils::*;
