//! Tally Core Library
//!
//! Exactly-once ingestion of scraped bank and credit card transactions:
//! - Database access, schema bootstrap, backup and restore
//! - Ingestion orchestrator with bounded retries and an audit trail
//! - Account ownership across overlapping credentials
//! - Category resolution (history, rules, scraper, aliases)
//! - Duplicate detection inline and as an offline sweep
//! - Billing cycle dates and recurring payment detection

pub mod billing;
pub mod categorize;
pub mod credentials;
pub mod db;
pub mod dedup;
pub mod error;
pub mod export;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod ownership;
pub mod recurring;
pub mod scrape;
pub mod settings;

pub use billing::BillingCycle;
pub use categorize::{CategoryCache, CategoryResolution, CategoryResolver};
pub use credentials::{CredentialRecord, VendorCredentials};
pub use db::{Database, TransactionFilter, UpsertOutcome};
pub use dedup::{DedupSweep, SweepReport};
pub use error::{Error, Result};
pub use export::{LedgerBackup, RestoreStats};
pub use ingest::{IngestRequest, IngestionReport, IngestionStats, Ingestor};
pub use models::{Vendor, DateRange};
pub use ownership::OwnershipDecision;
pub use recurring::{RecurringDetector, RecurringFilter, RecurringReport};
pub use scrape::{FileScraper, HttpScraper, MockResponse, MockScraper, Scraper};
pub use settings::{IngestSettings, SettingsSource, TomlSettingsFile};
