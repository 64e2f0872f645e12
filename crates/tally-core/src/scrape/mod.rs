//! Scraping collaborator abstraction
//!
//! The browser automation that logs into banks lives outside this crate.
//! `Scraper` is the seam: given a vendor, a date range, and validated
//! credentials, it returns the accounts and raw transactions it collected.
//!
//! # Implementations
//!
//! - `HttpScraper`: POSTs the request to a scraping service
//! - `FileScraper`: replays a recorded JSON result from disk
//! - `MockScraper`: scripted results for tests

mod file;
mod http;
mod mock;
pub mod types;

pub use file::FileScraper;
pub use http::{HttpScraper, SCRAPER_URL_ENV};
pub use mock::{MockResponse, MockScraper};
pub use types::*;

use async_trait::async_trait;

use crate::error::Result;

/// Interface to the external scraping service
///
/// Implementations report vendor-side failures through
/// `ScrapeResult { success: false, error_type, .. }`; an `Err` means the
/// collaborator itself could not be reached or answered garbage.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapeResult>;
}

#[async_trait]
impl<T: Scraper + ?Sized> Scraper for Box<T> {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapeResult> {
        (**self).scrape(request).await
    }
}
