//! HTTP client for a scraping service
//!
//! Sends `POST {base_url}/scrape` with a JSON body:
//!
//! ```json
//! {
//!   "companyId": "max",
//!   "startDate": "2024-01-01",
//!   "endDate": "2024-03-31",
//!   "fetchCategories": true,
//!   "credentials": { "username": "...", "password": "..." }
//! }
//! ```
//!
//! and expects a `ScrapeResult` back.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{ScrapeRequest, ScrapeResult, Scraper};
use crate::credentials::CredentialRecord;
use crate::error::{Error, Result};

/// Environment variable naming the scraping service URL
pub const SCRAPER_URL_ENV: &str = "TALLY_SCRAPER_URL";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeBody<'a> {
    company_id: &'a str,
    start_date: String,
    end_date: String,
    fetch_categories: bool,
    credentials: &'a CredentialRecord,
}

/// Scraper backed by a remote scraping service
#[derive(Clone)]
pub struct HttpScraper {
    base_url: String,
    http_client: Client,
}

impl HttpScraper {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: Client::new(),
        }
    }

    /// Build from `TALLY_SCRAPER_URL`, if set
    pub fn from_env() -> Option<Self> {
        std::env::var(SCRAPER_URL_ENV)
            .ok()
            .filter(|u| !u.trim().is_empty())
            .map(Self::new)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapeResult> {
        let body = ScrapeBody {
            company_id: request.vendor.as_str(),
            start_date: request.date_range.start.to_string(),
            end_date: request.date_range.end.to_string(),
            fetch_categories: request.fetch_categories,
            credentials: &request.credentials,
        };

        debug!("Requesting scrape of {} from {}", request.vendor, self.base_url);

        let response = self
            .http_client
            .post(format!("{}/scrape", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TransientCollection(format!("Scraping service unreachable: {}", e)))?;

        let response = response.error_for_status().map_err(|e| {
            Error::TransientCollection(format!("Scraping service returned an error: {}", e))
        })?;

        let result: ScrapeResult = response.json().await.map_err(|e| {
            Error::TransientCollection(format!("Malformed scraping service response: {}", e))
        })?;

        Ok(result)
    }
}
