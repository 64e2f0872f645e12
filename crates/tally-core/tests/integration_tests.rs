//! Integration tests for tally-core
//!
//! These tests exercise the full scrape → ingest → analyze workflow against a
//! scripted scraper.

use std::time::Duration;

use chrono::NaiveDate;
use tally_core::{
    db::{Database, UpsertPolicy},
    models::{
        AccountKind, CategorySource, DateRange, Frequency, NewScrapeEvent, NewTransaction,
        ScrapeStatus, TxnStatus, Vendor,
    },
    scrape::{ScrapeErrorType, ScrapeResult, ScrapedAccount, ScrapedInstallments, ScrapedTransaction},
    DedupSweep, Error, IngestRequest, IngestSettings, Ingestor, MockResponse, MockScraper,
    RecurringDetector, RecurringFilter, VendorCredentials,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn max_credential(db: &Database) -> i64 {
    let creds =
        VendorCredentials::from_json(r#"{"vendor":"max","username":"dana","password":"hunter2"}"#)
            .unwrap();
    db.create_credential(&creds, None).unwrap()
}

fn january() -> DateRange {
    DateRange::new(d(2023, 1, 1), d(2023, 1, 31)).unwrap()
}

fn txn(identifier: &str, description: &str, date: &str, amount: f64) -> ScrapedTransaction {
    ScrapedTransaction {
        identifier: Some(identifier.to_string()),
        description: description.to_string(),
        date: date.to_string(),
        processed_date: None,
        original_amount: amount,
        original_currency: "ILS".to_string(),
        charged_amount: amount,
        charged_currency: None,
        installments: None,
        status: TxnStatus::Completed,
        kind: None,
        memo: None,
        category: None,
    }
}

fn account(number: &str, txns: Vec<ScrapedTransaction>) -> ScrapedAccount {
    ScrapedAccount {
        account_number: number.to_string(),
        balance: Some(-1200.0),
        txns,
    }
}

fn january_statement() -> ScrapeResult {
    ScrapeResult::success(vec![account(
        "1234",
        vec![
            txn("t-1", "Cafe Nero", "2023-01-09", -18.0),
            txn("t-2", "Shufersal Deal", "2023-01-11T08:30:00+02:00", -240.5),
        ],
    )])
}

fn ledger_row(identifier: &str, description: &str, date: NaiveDate, amount: f64) -> NewTransaction {
    NewTransaction {
        identifier: identifier.to_string(),
        vendor: Vendor::Max,
        account_number: "1234".to_string(),
        date,
        processed_date: date,
        description: description.to_string(),
        memo: None,
        amount,
        currency: "ILS".to_string(),
        original_amount: Some(amount),
        original_currency: Some("ILS".to_string()),
        category: None,
        category_source: None,
        installments_number: None,
        installments_total: None,
        txn_type: AccountKind::Card,
        status: TxnStatus::Completed,
        credential_id: None,
    }
}

// =============================================================================
// Ingestion pipeline
// =============================================================================

#[tokio::test]
async fn test_ingestion_persists_and_is_idempotent() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let scraper = MockScraper::always(january_statement());
    let settings = IngestSettings::default();
    let ingestor = Ingestor::new(&db, &scraper, &settings);

    let first = ingestor
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();
    assert!(first.succeeded());
    assert_eq!(first.attempts, 1);
    assert_eq!(first.stats.accounts_processed, 1);
    assert_eq!(first.stats.transactions_saved, 2);

    let second = ingestor
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();
    assert!(second.succeeded());
    assert_eq!(second.stats.transactions_saved, 0);
    assert_eq!(second.stats.duplicates_skipped, 2);
    assert_eq!(db.count_transactions().unwrap(), 2);

    // Billing cycle starting on the 10th
    let before = db.get_transaction("t-1", Vendor::Max).unwrap().unwrap();
    assert_eq!(before.processed_date, d(2023, 1, 9));
    let after = db.get_transaction("t-2", Vendor::Max).unwrap().unwrap();
    assert_eq!(after.date, d(2023, 1, 11));
    assert_eq!(after.processed_date, d(2023, 2, 9));
    assert_eq!(after.txn_type, AccountKind::Card);
    assert_eq!(after.credential_id, Some(cred));

    // Audit trail holds the stats of the run
    let event = db.get_scrape_event(second.audit_id).unwrap().unwrap();
    assert_eq!(event.status, ScrapeStatus::Success);
    let stats: serde_json::Value = serde_json::from_str(event.stats.as_deref().unwrap()).unwrap();
    assert_eq!(stats["duplicates_skipped"], 2);

    let owner = db.get_ownership(Vendor::Max, "1234").unwrap().unwrap();
    assert_eq!(owner.credential_id, cred);
    assert_eq!(owner.last_balance, Some(-1200.0));
}

#[tokio::test]
async fn test_missing_identifier_is_derived_stably() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let mut t = txn("unused", "Corner Kiosk", "2023-01-05", -12.0);
    t.identifier = None;
    let scraper = MockScraper::always(ScrapeResult::success(vec![account("1234", vec![t])]));
    let settings = IngestSettings::default();
    let ingestor = Ingestor::new(&db, &scraper, &settings);

    ingestor
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();
    let report = ingestor
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    assert_eq!(report.stats.duplicates_skipped, 1);
    assert_eq!(db.count_transactions().unwrap(), 1);
}

#[tokio::test]
async fn test_second_credential_skips_owned_account() {
    let db = Database::in_memory().unwrap();
    let owner = max_credential(&db);
    let other = max_credential(&db);
    db.claim_ownership(Vendor::Max, "1234", owner, None).unwrap();

    let scraper = MockScraper::always(january_statement());
    let settings = IngestSettings::default();
    let report = Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(other, january(), "test"))
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.stats.cards_skipped, 1);
    assert_eq!(report.stats.accounts_processed, 0);
    assert_eq!(db.count_transactions().unwrap(), 0);
    assert_eq!(db.check_ownership(Vendor::Max, "1234", other).unwrap(), Some(owner));
}

#[tokio::test]
async fn test_category_cascade_during_ingestion() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);

    let mut coffee = txn("t-1", "Cafe Nero", "2023-01-05", -18.0);
    coffee.category = Some("Food".into());
    let mut grocery = txn("t-2", "Shufersal Deal", "2023-01-06", -240.0);
    grocery.category = Some("Food".into());
    let mut fuel = txn("t-3", "Paz Gas Station", "2023-01-07", -300.0);
    fuel.category = Some("Car".into());

    db.create_rule("shufersal", "Groceries").unwrap();
    db.set_category_override("CAFE NERO", "Coffee").unwrap();
    db.set_category_mapping("Car", "Transport").unwrap();

    let scraper = MockScraper::always(ScrapeResult::success(vec![account(
        "1234",
        vec![coffee, grocery, fuel],
    )]));
    let settings = IngestSettings::default();
    Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    let coffee = db.get_transaction("t-1", Vendor::Max).unwrap().unwrap();
    assert_eq!(coffee.category.as_deref(), Some("Coffee"));
    assert_eq!(coffee.category_source, Some(CategorySource::Cache));

    let grocery = db.get_transaction("t-2", Vendor::Max).unwrap().unwrap();
    assert_eq!(grocery.category.as_deref(), Some("Groceries"));
    assert_eq!(grocery.category_source, Some(CategorySource::Rule));

    let fuel = db.get_transaction("t-3", Vendor::Max).unwrap().unwrap();
    assert_eq!(fuel.category.as_deref(), Some("Transport"));
    assert_eq!(fuel.category_source, Some(CategorySource::Scraper));
}

#[tokio::test]
async fn test_source_categories_ignored_when_not_fetched() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let mut t = txn("t-1", "Paz Gas Station", "2023-01-07", -300.0);
    t.category = Some("Car".into());

    let scraper = MockScraper::always(ScrapeResult::success(vec![account("1234", vec![t])]));
    let settings = IngestSettings {
        fetch_categories: false,
        ..IngestSettings::default()
    };
    Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    let stored = db.get_transaction("t-1", Vendor::Max).unwrap().unwrap();
    assert_eq!(stored.category, None);
    assert_eq!(stored.category_source, None);
}

#[tokio::test]
async fn test_strict_index_is_added_when_history_is_clean() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let scraper = MockScraper::always(january_statement());
    let settings = IngestSettings::default();

    Ingestor::new(&db, &scraper, &settings)
        .with_strict_business_key_index(true)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    assert!(db.has_business_key_index().unwrap());
    assert_eq!(db.count_transactions().unwrap(), 2);
}

// =============================================================================
// Retries and failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_zero_retries_means_one_attempt() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let scraper = MockScraper::new(vec![MockResponse::TransientError("frame detached".into())]);
    let settings = IngestSettings {
        max_retries: 0,
        ..IngestSettings::default()
    };

    let report = Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    assert_eq!(scraper.calls(), 1);
    assert_eq!(report.status, ScrapeStatus::Failed);
    assert!(report.message.unwrap().contains("frame detached"));
}

#[tokio::test(start_paused = true)]
async fn test_retries_back_off_exponentially() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let scraper = MockScraper::new(vec![MockResponse::TransientError("navigation failed".into())]);
    let settings = IngestSettings::default();

    let report = Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    assert_eq!(scraper.calls(), 4);
    assert_eq!(report.attempts, 4);
    assert!(!report.succeeded());
    // 5s + 10s + 20s of virtual time
    assert!(report.duration >= Duration::from_secs(35));
    assert!(report.duration < Duration::from_secs(36));

    let event = db.get_scrape_event(report.audit_id).unwrap().unwrap();
    assert_eq!(event.status, ScrapeStatus::Failed);
    assert_eq!(event.retry_count, 3);
    assert!(event.message.unwrap().contains("navigation failed"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let scraper = MockScraper::new(vec![
        MockResponse::TransientError("timeout".into()),
        MockResponse::Result(january_statement()),
    ]);
    let settings = IngestSettings::default();

    let report = Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(scraper.calls(), 2);
    assert_eq!(report.message, None);
    assert_eq!(db.count_transactions().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_failure_is_not_retried() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let scraper = MockScraper::always(ScrapeResult::failure(
        ScrapeErrorType::InvalidPassword,
        "login rejected",
    ));
    let settings = IngestSettings {
        max_retries: 10,
        ..IngestSettings::default()
    };

    let report = Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    assert_eq!(scraper.calls(), 1);
    assert_eq!(report.status, ScrapeStatus::Failed);
    assert!(report.message.unwrap().contains("INVALID_PASSWORD"));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_scraper_times_out() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let scraper = MockScraper::new(vec![MockResponse::Hang]);
    let settings = IngestSettings {
        max_retries: 1,
        attempt_timeout: Duration::from_secs(30),
        ..IngestSettings::default()
    };

    let report = Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    assert_eq!(scraper.calls(), 2);
    assert!(!report.succeeded());
    assert!(report.message.unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_response_writes_nothing() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    let scraper = MockScraper::always(ScrapeResult::success(vec![account(
        "1234",
        vec![
            txn("t-1", "Cafe Nero", "2023-01-05", -18.0),
            txn("t-2", "Broken", "yesterday", -1.0),
        ],
    )]));
    let settings = IngestSettings {
        max_retries: 2,
        ..IngestSettings::default()
    };

    let report = Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await
        .unwrap();

    assert_eq!(scraper.calls(), 3);
    assert!(!report.succeeded());
    assert_eq!(db.count_transactions().unwrap(), 0);
}

#[tokio::test]
async fn test_running_ingestion_blocks_another() {
    let db = Database::in_memory().unwrap();
    let cred = max_credential(&db);
    db.create_scrape_event(&NewScrapeEvent {
        triggered_by: "scheduler".into(),
        vendor: Vendor::Leumi,
        credential_id: None,
        start_date: d(2023, 1, 1),
    })
    .unwrap();

    let scraper = MockScraper::always(january_statement());
    let settings = IngestSettings::default();
    let result = Ingestor::new(&db, &scraper, &settings)
        .run(IngestRequest::new(cred, january(), "test"))
        .await;

    assert!(matches!(result, Err(Error::Concurrency(_))));
    assert_eq!(scraper.calls(), 0);
}

#[tokio::test]
async fn test_unknown_or_inactive_credential_rejected() {
    let db = Database::in_memory().unwrap();
    let scraper = MockScraper::always(january_statement());
    let settings = IngestSettings::default();
    let ingestor = Ingestor::new(&db, &scraper, &settings);

    let missing = ingestor.run(IngestRequest::new(42, january(), "test")).await;
    assert!(matches!(missing, Err(Error::Validation(_))));

    let cred = max_credential(&db);
    db.deactivate_credential(cred).unwrap();
    let inactive = ingestor.run(IngestRequest::new(cred, january(), "test")).await;
    assert!(matches!(inactive, Err(Error::Validation(_))));

    assert_eq!(scraper.calls(), 0);
    assert!(db.list_scrape_events(10).unwrap().is_empty());
}

// =============================================================================
// Offline analysis
// =============================================================================

#[test]
fn test_dedup_sweep_keeps_newer_processed_date() {
    let db = Database::in_memory().unwrap();
    let policy = UpsertPolicy::default();

    let mut older = ledger_row("a-1", "Cafe Nero", d(2024, 1, 5), -18.0);
    older.processed_date = d(2024, 1, 5);
    let mut newer = ledger_row("a-2", "CAFE NERO", d(2024, 1, 6), -18.0);
    newer.processed_date = d(2024, 2, 9);
    let unrelated = ledger_row("a-3", "Cafe Nero", d(2024, 1, 20), -18.0);
    for row in [&older, &newer, &unrelated] {
        db.upsert_transaction(row, &policy).unwrap();
    }
    assert_eq!(db.count_transactions().unwrap(), 3);

    let preview = DedupSweep::run(&db, true).unwrap();
    assert_eq!(preview.pairs_found, 1);
    assert_eq!(preview.removed.len(), 1);
    assert_eq!(db.count_transactions().unwrap(), 3);

    let report = DedupSweep::run(&db, false).unwrap();
    assert_eq!(report.removed[0].identifier, "a-1");
    assert_eq!(report.removed[0].kept_identifier, "a-2");
    assert!(db.get_transaction("a-1", Vendor::Max).unwrap().is_none());
    assert!(db.get_transaction("a-2", Vendor::Max).unwrap().is_some());
    assert_eq!(db.count_transactions().unwrap(), 2);

    // Nothing left to clean up
    assert!(DedupSweep::run(&db, false).unwrap().removed.is_empty());
}

#[test]
fn test_dedup_sweep_ignores_manual_rows() {
    let db = Database::in_memory().unwrap();
    db.upsert_transaction(
        &ledger_row("a-1", "Cafe Nero", d(2024, 1, 5), -18.0),
        &UpsertPolicy::default(),
    )
    .unwrap();
    db.insert_manual_transaction(&ledger_row("m-1", "Cafe Nero", d(2024, 1, 6), -18.0))
        .unwrap();

    let report = DedupSweep::run(&db, false).unwrap();
    assert_eq!(report.pairs_found, 0);
    assert_eq!(db.count_transactions().unwrap(), 2);
}

#[test]
fn test_recurring_payment_detection() {
    let db = Database::in_memory().unwrap();
    let policy = UpsertPolicy::default();
    let mut rows = Vec::new();

    for (i, month) in [1, 2, 3].iter().enumerate() {
        rows.push(ledger_row(&format!("nf-{}", i), "Netflix", d(2024, *month, 3), -50.0));
    }
    for (i, month) in [1, 3, 5].iter().enumerate() {
        rows.push(ledger_row(&format!("gym-{}", i), "Gym", d(2024, *month, 15), -120.0));
    }
    rows.push(ledger_row("amz-0", "Amazon", d(2024, 1, 2), -35.5));
    rows.push(ledger_row("amz-1", "Amazon", d(2024, 1, 20), -120.0));
    rows.push(ledger_row("amz-2", "Amazon", d(2024, 3, 28), -15.0));
    for (i, month) in [1, 2, 3].iter().enumerate() {
        let mut row = ledger_row(&format!("sofa-{}", i), "Furniture Store", d(2024, *month, 10), -100.0);
        row.installments_number = Some(i as i64 + 1);
        row.installments_total = Some(12);
        rows.push(row);
    }
    let mut salary = ledger_row("sal-0", "Employer Ltd", d(2024, 1, 1), -10.0);
    salary.category = Some("Salary".into());
    rows.push(salary);

    for row in &rows {
        db.upsert_transaction(row, &policy).unwrap();
    }

    let report = RecurringDetector::new(&db)
        .detect(&RecurringFilter::default())
        .unwrap();

    let names: Vec<&str> = report.recurring.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Gym", "Netflix"]);

    let gym = &report.recurring[0];
    assert_eq!(gym.frequency, Frequency::BiMonthly);
    assert_eq!(gym.next_payment_date, d(2024, 7, 15));

    let netflix = &report.recurring[1];
    assert_eq!(netflix.frequency, Frequency::Monthly);
    assert_eq!(netflix.month_count, 3);
    assert_eq!(netflix.monthly_amount, 50.0);
    assert_eq!(netflix.last_charge_date, d(2024, 3, 3));
    assert_eq!(netflix.next_payment_date, d(2024, 4, 3));

    assert_eq!(report.installments.len(), 1);
    let plan = &report.installments[0];
    assert_eq!(plan.installments_number, 3);
    assert_eq!(plan.remaining_payments, 9);
    assert_eq!(plan.original_purchase_date, d(2024, 1, 10));
    assert_eq!(plan.next_payment_date, d(2024, 4, 10));
    assert_eq!(plan.last_payment_date, d(2024, 12, 10));

    // Narrowing to a period drops groups that no longer span two months
    let recent = RecurringDetector::new(&db)
        .detect(&RecurringFilter {
            since: Some(d(2024, 3, 1)),
            ..RecurringFilter::default()
        })
        .unwrap();
    assert!(recent.recurring.iter().all(|r| r.name != "Netflix"));
}

#[test]
fn test_installment_plan_from_single_observation() {
    let db = Database::in_memory().unwrap();
    let mut row = ledger_row("tv-3", "Electronics Store", d(2024, 3, 10), -100.0);
    row.installments_number = Some(3);
    row.installments_total = Some(12);
    db.upsert_transaction(&row, &UpsertPolicy::default()).unwrap();

    let report = RecurringDetector::new(&db)
        .detect(&RecurringFilter::default())
        .unwrap();
    assert_eq!(report.installments[0].remaining_payments, 12 - 3);
    assert_eq!(report.installments[0].installment_amount, 100.0);
    assert!(report.recurring.is_empty());

    // A finished plan is not reported
    let mut last = ledger_row("tv-12", "Electronics Store", d(2024, 12, 10), -100.0);
    last.installments_number = Some(12);
    last.installments_total = Some(12);
    db.upsert_transaction(&last, &UpsertPolicy::default()).unwrap();
    let report = RecurringDetector::new(&db)
        .detect(&RecurringFilter::default())
        .unwrap();
    assert!(report.installments.is_empty());
}

#[test]
fn test_scraped_installments_deserialize() {
    let json = r#"{"identifier": 98765, "description": "Sofa", "date": "2024-01-10",
        "originalAmount": -1200, "originalCurrency": "ILS", "chargedAmount": -100,
        "installments": {"number": 1, "total": 12}, "type": "installments"}"#;
    let t: ScrapedTransaction = serde_json::from_str(json).unwrap();
    assert_eq!(t.identifier.as_deref(), Some("98765"));
    assert_eq!(t.installments, Some(ScrapedInstallments { number: 1, total: 12 }));
    assert_eq!(t.status, TxnStatus::Completed);
}
