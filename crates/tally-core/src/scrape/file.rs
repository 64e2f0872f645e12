//! Replay a recorded scrape result from a JSON file

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{ScrapeRequest, ScrapeResult, Scraper};
use crate::error::{Error, Result};

/// Scraper that returns the contents of a JSON file
///
/// The file is read on every call, so a fixture can be edited between runs.
/// A file that does not parse is a transient failure, like a malformed
/// response from a live service.
#[derive(Debug, Clone)]
pub struct FileScraper {
    path: PathBuf,
}

impl FileScraper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Scraper for FileScraper {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<ScrapeResult> {
        debug!(
            "Replaying {} scrape from {}",
            request.vendor,
            self.path.display()
        );
        let content = tokio::fs::read_to_string(&self.path).await?;
        serde_json::from_str(&content).map_err(|e| {
            Error::TransientCollection(format!(
                "Malformed scrape file {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}
