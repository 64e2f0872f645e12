//! Ingestion orchestrator
//!
//! Drives one attempt-group: load settings and credentials, take the advisory
//! single-flight guard, open an audit row, then call the scraper up to
//! `max_retries + 1` times with exponential backoff. A successful scrape is
//! merged into the ledger account by account, transaction by transaction.
//!
//! The retry loop is the `RunState` machine below; `backoff_delay` and
//! `RunState::next` are pure so they can be tested without I/O.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::billing::BillingCycle;
use crate::categorize::{CategoryCache, CategoryResolver};
use crate::db::{Database, UpsertOutcome, UpsertPolicy};
use crate::error::{Error, Result};
use crate::models::{DateRange, NewScrapeEvent, NewTransaction, ScrapeStatus, Vendor};
use crate::normalize::derive_identifier;
use crate::ownership::resolve_ownership;
use crate::scrape::{ScrapeRequest, ScrapeResult, Scraper};
use crate::settings::{SettingsSource, MAX_RETRIES_LIMIT};

/// Base delay before the first retry
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// Ceiling for any single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay before attempt `attempt` (0-based); attempt 0 runs immediately
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Classified result of one scrape attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// May succeed on retry (timeout, malformed response)
    Transient,
    /// Will not succeed on retry (bad credentials, blocked account)
    Terminal,
}

/// Retry state machine for one attempt-group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    /// About to run attempt n (0-based)
    Attempting(u32),
    Success,
    Failed,
}

impl RunState {
    /// Leave `Init` for the first attempt
    pub fn begin(self) -> Self {
        match self {
            Self::Init => Self::Attempting(0),
            other => other,
        }
    }

    /// Transition after an attempt finished; non-attempting states are unchanged
    pub fn next(self, outcome: AttemptOutcome, max_retries: u32) -> Self {
        match self {
            Self::Attempting(n) => match outcome {
                AttemptOutcome::Success => Self::Success,
                AttemptOutcome::Terminal => Self::Failed,
                AttemptOutcome::Transient if n < max_retries => Self::Attempting(n + 1),
                AttemptOutcome::Transient => Self::Failed,
            },
            other => other,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Parameters for one ingestion run
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub credential_id: i64,
    pub date_range: DateRange,
    /// Who asked for this run (user, scheduler, ...)
    pub triggered_by: String,
    /// Defaults to the configured retry count
    pub max_retries: Option<u32>,
    /// Defaults to `DEFAULT_BACKOFF_BASE`
    pub backoff_base: Option<Duration>,
}

impl IngestRequest {
    pub fn new(credential_id: i64, date_range: DateRange, triggered_by: impl Into<String>) -> Self {
        Self {
            credential_id,
            date_range,
            triggered_by: triggered_by.into(),
            max_retries: None,
            backoff_base: None,
        }
    }
}

/// Aggregate counters stored on the audit row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionStats {
    pub accounts_processed: u32,
    pub transactions_saved: u32,
    pub transactions_updated: u32,
    pub duplicates_skipped: u32,
    /// Accounts skipped because another credential owns them
    pub cards_skipped: u32,
    pub alias_limit_warnings: u32,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub audit_id: i64,
    pub status: ScrapeStatus,
    pub attempts: u32,
    /// Last error message when the run failed
    pub message: Option<String>,
    pub stats: IngestionStats,
    pub duration: Duration,
}

impl IngestionReport {
    pub fn succeeded(&self) -> bool {
        self.status == ScrapeStatus::Success
    }
}

/// Everything an attempt-group needs once validation has passed
struct RunPlan {
    audit_id: i64,
    vendor: Vendor,
    credential_id: i64,
    scrape_request: ScrapeRequest,
    max_retries: u32,
    backoff_base: Duration,
    attempt_timeout: Duration,
    cycle: BillingCycle,
    policy: UpsertPolicy,
    fetch_categories: bool,
}

/// Runs ingestion attempt-groups against one database and scraper
pub struct Ingestor<'a, S: Scraper + ?Sized> {
    db: &'a Database,
    scraper: &'a S,
    settings: &'a dyn SettingsSource,
    strict_business_key: bool,
}

impl<'a, S: Scraper + ?Sized> Ingestor<'a, S> {
    pub fn new(db: &'a Database, scraper: &'a S, settings: &'a dyn SettingsSource) -> Self {
        Self {
            db,
            scraper,
            settings,
            strict_business_key: false,
        }
    }

    /// Try to add the unique business-key index before writing
    ///
    /// Existing duplicates only produce a warning.
    pub fn with_strict_business_key_index(mut self, enabled: bool) -> Self {
        self.strict_business_key = enabled;
        self
    }

    /// Run one attempt-group to completion
    ///
    /// Collection failures come back as `Ok` with `status = Failed`.
    /// Validation, concurrency, and persistence failures are `Err`.
    pub async fn run(&self, request: IngestRequest) -> Result<IngestionReport> {
        let started = Instant::now();
        let plan = self.prepare(&request)?;

        match self.drive(&plan, started).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Ingestion {} aborted: {}", plan.audit_id, e);
                let message = e.to_string();
                if let Err(mark_err) = self.db.finish_scrape_event(
                    plan.audit_id,
                    ScrapeStatus::Failed,
                    Some(&message),
                    started.elapsed(),
                    None,
                ) {
                    warn!(
                        "Could not mark scrape event {} failed: {}",
                        plan.audit_id, mark_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Validate inputs, check the guard, and open the audit row
    fn prepare(&self, request: &IngestRequest) -> Result<RunPlan> {
        let settings = self.settings.load()?;
        let cycle = settings.billing_cycle()?;

        let credential = self.db.get_credential(request.credential_id)?.ok_or_else(|| {
            Error::Validation(format!("Credential {} not found", request.credential_id))
        })?;
        if !credential.active {
            return Err(Error::Validation(format!(
                "Credential {} is inactive",
                credential.id
            )));
        }

        let secret = self.db.get_credential_secret(credential.id)?;
        if secret.vendor() != credential.vendor {
            return Err(Error::Validation(format!(
                "Credential {} is registered for {} but holds {} credentials",
                credential.id,
                credential.vendor,
                secret.vendor()
            )));
        }
        let record = secret.validate()?;

        self.db.check_concurrency_guard(settings.guard_staleness)?;

        let audit_id = self.db.create_scrape_event(&NewScrapeEvent {
            triggered_by: request.triggered_by.clone(),
            vendor: credential.vendor,
            credential_id: Some(credential.id),
            start_date: request.date_range.start,
        })?;

        let max_retries = request
            .max_retries
            .unwrap_or(settings.max_retries)
            .min(MAX_RETRIES_LIMIT);

        Ok(RunPlan {
            audit_id,
            vendor: credential.vendor,
            credential_id: credential.id,
            scrape_request: ScrapeRequest {
                vendor: credential.vendor,
                date_range: request.date_range,
                credentials: record,
                fetch_categories: settings.fetch_categories,
            },
            max_retries,
            backoff_base: request.backoff_base.unwrap_or(DEFAULT_BACKOFF_BASE),
            attempt_timeout: settings.attempt_timeout,
            cycle,
            policy: UpsertPolicy {
                update_category_on_rescrape: settings.update_category_on_rescrape,
            },
            fetch_categories: settings.fetch_categories,
        })
    }

    async fn drive(&self, plan: &RunPlan, started: Instant) -> Result<IngestionReport> {
        let mut state = RunState::Init.begin();
        let mut attempts = 0;
        let mut last_message: Option<String> = None;
        let mut stats = IngestionStats::default();

        while let RunState::Attempting(attempt) = state {
            if attempt > 0 {
                let delay = backoff_delay(attempt, plan.backoff_base);
                let message = last_message.as_deref().unwrap_or("retrying");
                self.db.record_scrape_retry(plan.audit_id, attempt, message)?;
                warn!(
                    "{} scrape attempt {} failed ({}), retrying in {:?}",
                    plan.vendor, attempt, message, delay
                );
                tokio::time::sleep(delay).await;
            }

            info!(
                "Starting {} scrape attempt {} of {}",
                plan.vendor,
                attempt + 1,
                plan.max_retries + 1
            );
            attempts = attempt + 1;

            let outcome = match self.attempt(plan).await {
                Ok(result) => {
                    stats = self.merge(plan, &result)?;
                    AttemptOutcome::Success
                }
                Err(e) => {
                    let outcome = if e.is_retryable() {
                        AttemptOutcome::Transient
                    } else {
                        AttemptOutcome::Terminal
                    };
                    last_message = Some(e.to_string());
                    outcome
                }
            };

            state = state.next(outcome, plan.max_retries);
        }

        let duration = started.elapsed();
        let status = if state == RunState::Success {
            ScrapeStatus::Success
        } else {
            ScrapeStatus::Failed
        };

        let stats_json = serde_json::to_string(&stats)?;
        match status {
            ScrapeStatus::Success => {
                self.db.finish_scrape_event(
                    plan.audit_id,
                    status,
                    None,
                    duration,
                    Some(&stats_json),
                )?;
                info!(
                    "{} ingestion succeeded after {} attempt(s): {} saved, {} updated, {} duplicates, {} accounts skipped",
                    plan.vendor,
                    attempts,
                    stats.transactions_saved,
                    stats.transactions_updated,
                    stats.duplicates_skipped,
                    stats.cards_skipped
                );
                last_message = None;
            }
            _ => {
                self.db.finish_scrape_event(
                    plan.audit_id,
                    status,
                    last_message.as_deref(),
                    duration,
                    None,
                )?;
                error!(
                    "{} ingestion failed after {} attempt(s): {}",
                    plan.vendor,
                    attempts,
                    last_message.as_deref().unwrap_or("unknown error")
                );
            }
        }

        Ok(IngestionReport {
            audit_id: plan.audit_id,
            status,
            attempts,
            message: last_message,
            stats,
            duration,
        })
    }

    /// One bounded call to the scraper, with its result checked for shape
    async fn attempt(&self, plan: &RunPlan) -> Result<ScrapeResult> {
        let call = self.scraper.scrape(&plan.scrape_request);
        let result = match tokio::time::timeout(plan.attempt_timeout, call).await {
            Err(_) => {
                return Err(Error::TransientCollection(format!(
                    "attempt timed out after {:?}",
                    plan.attempt_timeout
                )))
            }
            Ok(result) => result?,
        };

        if !result.success {
            return Err(result.into_error());
        }
        validate_result(&result)?;
        Ok(result)
    }

    /// Merge a successful scrape into the ledger
    fn merge(&self, plan: &RunPlan, result: &ScrapeResult) -> Result<IngestionStats> {
        if self.strict_business_key {
            self.db.try_strict_business_key_index()?;
        }

        let cache = CategoryCache::load(self.db)?;
        let resolver = CategoryResolver::load(self.db, &cache)?;
        let mut stats = IngestionStats::default();

        for account in &result.accounts {
            let decision = resolve_ownership(
                self.db,
                plan.vendor,
                &account.account_number,
                plan.credential_id,
                account.balance,
            )?;
            if !decision.should_process() {
                stats.cards_skipped += 1;
                continue;
            }
            stats.accounts_processed += 1;

            for txn in &account.txns {
                let date = txn.occurrence_date()?;
                let identifier = txn.identifier.clone().unwrap_or_else(|| {
                    derive_identifier(
                        &date,
                        &txn.description,
                        txn.charged_amount,
                        &account.account_number,
                    )
                });

                let source_category = if plan.fetch_categories {
                    txn.category.as_deref()
                } else {
                    None
                };
                let resolution = resolver.resolve(&txn.description, source_category);
                if resolution.alias_limit_hit {
                    stats.alias_limit_warnings += 1;
                }

                let new_tx = NewTransaction {
                    identifier,
                    vendor: plan.vendor,
                    account_number: account.account_number.clone(),
                    date,
                    processed_date: plan.cycle.processed_date(date),
                    description: txn.description.trim().to_string(),
                    memo: txn.memo.clone(),
                    amount: txn.charged_amount,
                    currency: txn
                        .charged_currency
                        .clone()
                        .unwrap_or_else(|| txn.original_currency.clone()),
                    original_amount: Some(txn.original_amount),
                    original_currency: Some(txn.original_currency.clone()),
                    category: resolution.category,
                    category_source: resolution.source,
                    installments_number: txn.installments.map(|i| i.number),
                    installments_total: txn.installments.map(|i| i.total),
                    txn_type: plan.vendor.kind(),
                    status: txn.status,
                    credential_id: Some(plan.credential_id),
                };

                match self.db.upsert_transaction(&new_tx, &plan.policy)?.outcome {
                    UpsertOutcome::Inserted => stats.transactions_saved += 1,
                    UpsertOutcome::Updated => stats.transactions_updated += 1,
                    UpsertOutcome::Duplicated => stats.duplicates_skipped += 1,
                }
            }

            debug!(
                "Merged {} account {} ({} transactions)",
                plan.vendor,
                account.account_number,
                account.txns.len()
            );
        }

        Ok(stats)
    }
}

/// Reject a structurally broken response before anything is written
fn validate_result(result: &ScrapeResult) -> Result<()> {
    for account in &result.accounts {
        if account.account_number.trim().is_empty() {
            return Err(Error::TransientCollection(
                "malformed response: account without a number".to_string(),
            ));
        }
        for txn in &account.txns {
            txn.occurrence_date().map_err(|e| {
                Error::TransientCollection(format!("malformed response: {}", e))
            })?;
            if !txn.charged_amount.is_finite() {
                return Err(Error::TransientCollection(format!(
                    "malformed response: non-finite amount for '{}'",
                    txn.description
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff_delay(0, base), Duration::ZERO);
        assert_eq!(backoff_delay(1, base), Duration::from_secs(5));
        assert_eq!(backoff_delay(2, base), Duration::from_secs(10));
        assert_eq!(backoff_delay(3, base), Duration::from_secs(20));
        assert_eq!(backoff_delay(4, base), Duration::from_secs(40));
        assert_eq!(backoff_delay(5, base), MAX_BACKOFF);
        assert_eq!(backoff_delay(40, base), MAX_BACKOFF);
    }

    #[test]
    fn test_no_retries_means_single_attempt() {
        let state = RunState::Init.begin();
        assert_eq!(state, RunState::Attempting(0));
        assert_eq!(state.next(AttemptOutcome::Transient, 0), RunState::Failed);
    }

    #[test]
    fn test_transient_failures_exhaust_budget() {
        let mut state = RunState::Init.begin();
        let mut attempts = 0;
        while let RunState::Attempting(_) = state {
            attempts += 1;
            state = state.next(AttemptOutcome::Transient, 3);
        }
        assert_eq!(attempts, 4);
        assert_eq!(state, RunState::Failed);
    }

    #[test]
    fn test_terminal_failure_stops_immediately() {
        let state = RunState::Attempting(0).next(AttemptOutcome::Terminal, 10);
        assert_eq!(state, RunState::Failed);
    }

    #[test]
    fn test_success_after_retry() {
        let state = RunState::Attempting(0)
            .next(AttemptOutcome::Transient, 3)
            .next(AttemptOutcome::Success, 3);
        assert_eq!(state, RunState::Success);
        assert!(state.is_finished());
        // Finished states are sticky
        assert_eq!(state.next(AttemptOutcome::Transient, 3), RunState::Success);
    }

    #[test]
    fn test_validate_result_rejects_bad_dates() {
        let json = r#"{"success": true, "accounts": [{"accountNumber": "1", "txns": [
            {"description": "x", "date": "not-a-date", "originalAmount": 1, "originalCurrency": "ILS", "chargedAmount": 1}
        ]}]}"#;
        let result: ScrapeResult = serde_json::from_str(json).unwrap();
        let err = validate_result(&result).unwrap_err();
        assert!(err.is_retryable());
    }
}
