//! Mock scraper for testing
//!
//! Plays back a scripted sequence of responses, one per call. Once the
//! script is exhausted the last response repeats.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ScrapeRequest, ScrapeResult, Scraper};
use crate::error::{Error, Result};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockResponse {
    Result(ScrapeResult),
    /// Fail the call with a transient collection error
    TransientError(String),
    /// Never answer (exercises the per-attempt timeout)
    Hang,
}

/// Scripted scraper that counts its calls
pub struct MockScraper {
    script: Mutex<VecDeque<MockResponse>>,
    last: Mutex<Option<MockResponse>>,
    calls: AtomicUsize,
}

impl MockScraper {
    pub fn new(script: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always return the same result
    pub fn always(result: ScrapeResult) -> Self {
        Self::new(vec![MockResponse::Result(result)])
    }

    /// Number of times `scrape` was called
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<MockResponse> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| Error::InvalidData("Mock script lock poisoned".into()))?;
        let mut last = self
            .last
            .lock()
            .map_err(|_| Error::InvalidData("Mock script lock poisoned".into()))?;

        if let Some(next) = script.pop_front() {
            *last = Some(next.clone());
            return Ok(next);
        }
        Ok(last
            .clone()
            .unwrap_or_else(|| MockResponse::Result(ScrapeResult::success(Vec::new()))))
    }
}

#[async_trait]
impl Scraper for MockScraper {
    async fn scrape(&self, _request: &ScrapeRequest) -> Result<ScrapeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_response()? {
            MockResponse::Result(result) => Ok(result),
            MockResponse::TransientError(message) => Err(Error::TransientCollection(message)),
            MockResponse::Hang => {
                tokio::time::sleep(Duration::from_secs(60 * 60 * 24)).await;
                Err(Error::TransientCollection("mock hang ended".into()))
            }
        }
    }
}
