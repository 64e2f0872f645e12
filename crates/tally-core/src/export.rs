//! Ledger backup and restore
//!
//! A backup is one JSON document holding every table. Restore inserts in
//! dependency order (credentials before the rows that reference them) inside
//! a single SQLite transaction, so a bad backup leaves the database untouched.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::credentials::VendorCredentials;
use crate::db::{format_datetime, Database, TransactionFilter};
use crate::error::{Error, Result};
use crate::models::{
    AccountOwnership, CategorizationRule, CategoryMapping, CategoryOverride, ScrapeEvent,
    Transaction,
};

/// Credential row including its stored secret
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialExport {
    pub id: i64,
    pub vendor: String,
    pub nickname: Option<String>,
    pub secret_json: String,
    pub active: bool,
    pub created_at: String,
}

impl std::fmt::Debug for CredentialExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialExport")
            .field("id", &self.id)
            .field("vendor", &self.vendor)
            .field("nickname", &self.nickname)
            .field("secret_json", &"<redacted>")
            .field("active", &self.active)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Application version that created the backup
    pub version: String,
    /// RFC 3339 creation time
    pub created_at: String,
    pub total_records: i64,
}

/// Full ledger backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBackup {
    pub metadata: BackupMetadata,
    pub credentials: Vec<CredentialExport>,
    pub ownership: Vec<AccountOwnership>,
    pub transactions: Vec<Transaction>,
    pub rules: Vec<CategorizationRule>,
    pub mappings: Vec<CategoryMapping>,
    pub overrides: Vec<CategoryOverride>,
    pub scrape_events: Vec<ScrapeEvent>,
}

/// Rows written by a restore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreStats {
    pub credentials: i64,
    pub ownership: i64,
    pub transactions: i64,
    pub rules: i64,
    pub mappings: i64,
    pub overrides: i64,
    pub scrape_events: i64,
}

impl RestoreStats {
    pub fn total(&self) -> i64 {
        self.credentials
            + self.ownership
            + self.transactions
            + self.rules
            + self.mappings
            + self.overrides
            + self.scrape_events
    }
}

impl Database {
    /// Export every table
    pub fn export_ledger(&self) -> Result<LedgerBackup> {
        let credentials = self.export_all_credentials()?;
        let ownership = self.list_ownership()?;
        let transactions = self.list_transactions(&TransactionFilter::new())?;
        let rules = self.list_rules(false)?;
        let mappings = self.list_category_mappings()?;
        let overrides = self.list_category_overrides()?;
        let mut scrape_events = self.list_scrape_events(-1)?;
        scrape_events.reverse();

        let total_records = credentials.len()
            + ownership.len()
            + transactions.len()
            + rules.len()
            + mappings.len()
            + overrides.len()
            + scrape_events.len();

        Ok(LedgerBackup {
            metadata: BackupMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                created_at: Utc::now().to_rfc3339(),
                total_records: total_records as i64,
            },
            credentials,
            ownership,
            transactions,
            rules,
            mappings,
            overrides,
            scrape_events,
        })
    }

    fn export_all_credentials(&self) -> Result<Vec<CredentialExport>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, vendor, nickname, secret_json, active, created_at FROM credentials ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CredentialExport {
                    id: row.get(0)?,
                    vendor: row.get(1)?,
                    nickname: row.get(2)?,
                    secret_json: row.get(3)?,
                    active: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Restore a backup in one transaction
    ///
    /// With `clear_existing` every table is emptied first. Otherwise rows are
    /// added alongside existing data and any key collision aborts the restore.
    pub fn restore_ledger(&self, backup: &LedgerBackup, clear_existing: bool) -> Result<RestoreStats> {
        // Reject unreadable secrets before touching anything
        for cred in &backup.credentials {
            let parsed = VendorCredentials::from_json(&cred.secret_json)?;
            if parsed.vendor().as_str() != cred.vendor {
                return Err(Error::Validation(format!(
                    "Credential {} secret is for {}, row says {}",
                    cred.id,
                    parsed.vendor(),
                    cred.vendor
                )));
            }
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if clear_existing {
            tx.execute_batch(
                r#"
                DELETE FROM transactions;
                DELETE FROM scrape_events;
                DELETE FROM account_ownership;
                DELETE FROM credentials;
                DELETE FROM categorization_rules;
                DELETE FROM category_mappings;
                DELETE FROM category_overrides;
                "#,
            )?;
        }

        let mut stats = RestoreStats::default();

        // 1. Credentials (referenced by everything else)
        for cred in &backup.credentials {
            tx.execute(
                "INSERT INTO credentials (id, vendor, nickname, secret_json, active, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    cred.id,
                    cred.vendor,
                    cred.nickname,
                    cred.secret_json,
                    cred.active,
                    cred.created_at
                ],
            )?;
            stats.credentials += 1;
        }

        // 2. Ownership
        for own in &backup.ownership {
            tx.execute(
                "INSERT INTO account_ownership
                    (vendor, account_number, credential_id, last_balance, last_balance_at, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    own.vendor.as_str(),
                    own.account_number,
                    own.credential_id,
                    own.last_balance,
                    own.last_balance_at.as_ref().map(format_datetime),
                    format_datetime(&own.created_at),
                ],
            )?;
            stats.ownership += 1;
        }

        // 3. Transactions
        for t in &backup.transactions {
            tx.execute(
                "INSERT INTO transactions (identifier, vendor, account_number, date, processed_date,
                    description, name_normalized, memo, amount, currency, original_amount,
                    original_currency, category, category_source, installments_number,
                    installments_total, txn_type, status, source, credential_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    t.identifier,
                    t.vendor.as_str(),
                    t.account_number,
                    t.date.to_string(),
                    t.processed_date.to_string(),
                    t.description,
                    t.name_normalized,
                    t.memo,
                    t.amount,
                    t.currency,
                    t.original_amount,
                    t.original_currency,
                    t.category,
                    t.category_source.map(|s| s.as_str()),
                    t.installments_number,
                    t.installments_total,
                    t.txn_type.as_str(),
                    t.status.as_str(),
                    t.source.as_str(),
                    t.credential_id,
                    format_datetime(&t.created_at),
                ],
            )?;
            stats.transactions += 1;
        }

        // 4. Categorization config
        for rule in &backup.rules {
            tx.execute(
                "INSERT INTO categorization_rules (id, name_pattern, target_category, active, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    rule.id,
                    rule.name_pattern,
                    rule.target_category,
                    rule.active,
                    format_datetime(&rule.created_at),
                ],
            )?;
            stats.rules += 1;
        }

        for mapping in &backup.mappings {
            tx.execute(
                "INSERT INTO category_mappings (source_category, target_category) VALUES (?, ?)",
                params![mapping.source_category, mapping.target_category],
            )?;
            stats.mappings += 1;
        }

        for ov in &backup.overrides {
            tx.execute(
                "INSERT INTO category_overrides (description_normalized, category) VALUES (?, ?)",
                params![ov.description_normalized, ov.category],
            )?;
            stats.overrides += 1;
        }

        // 5. Audit history
        for event in &backup.scrape_events {
            tx.execute(
                "INSERT INTO scrape_events (id, triggered_by, vendor, credential_id, start_date,
                    status, message, retry_count, duration_ms, stats, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    event.id,
                    event.triggered_by,
                    event.vendor.as_str(),
                    event.credential_id,
                    event.start_date.to_string(),
                    event.status.as_str(),
                    event.message,
                    event.retry_count,
                    event.duration_ms,
                    event.stats,
                    format_datetime(&event.created_at),
                ],
            )?;
            stats.scrape_events += 1;
        }

        tx.commit()?;

        info!("Restored {} records from backup", stats.total());
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountKind, NewTransaction, TxnStatus, Vendor};
    use chrono::NaiveDate;

    fn seeded_db() -> Database {
        let db = Database::in_memory().unwrap();
        let creds = VendorCredentials::from_json(
            r#"{"vendor":"max","username":"dana","password":"hunter2"}"#,
        )
        .unwrap();
        let cred_id = db.create_credential(&creds, Some("card")).unwrap();
        db.claim_ownership(Vendor::Max, "1234", cred_id, Some(-250.0))
            .unwrap();

        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        db.insert_manual_transaction(&NewTransaction {
            identifier: "m-1".into(),
            vendor: Vendor::Max,
            account_number: "1234".into(),
            date: d,
            processed_date: d,
            description: "Corner Grocery".into(),
            memo: None,
            amount: -42.5,
            currency: "ILS".into(),
            original_amount: None,
            original_currency: None,
            category: Some("Groceries".into()),
            category_source: None,
            installments_number: None,
            installments_total: None,
            txn_type: AccountKind::Card,
            status: TxnStatus::Completed,
            credential_id: Some(cred_id),
        })
        .unwrap();

        db.create_rule("grocery", "Groceries").unwrap();
        db.set_category_mapping("Food", "Groceries").unwrap();
        db.set_category_override("Corner Grocery", "Groceries").unwrap();
        db
    }

    #[test]
    fn test_export_restore_into_fresh_database() {
        let source = seeded_db();
        let backup = source.export_ledger().unwrap();
        assert_eq!(backup.credentials.len(), 1);
        assert_eq!(backup.metadata.total_records, 6);

        let json = serde_json::to_string(&backup).unwrap();
        let parsed: LedgerBackup = serde_json::from_str(&json).unwrap();

        let target = Database::in_memory().unwrap();
        let stats = target.restore_ledger(&parsed, false).unwrap();
        assert_eq!(stats.total(), 6);

        let tx = target
            .get_transaction("m-1", Vendor::Max)
            .unwrap()
            .unwrap();
        assert_eq!(tx.amount, -42.5);
        assert_eq!(tx.name_normalized, "corner grocery");
        assert!(target.get_credential_secret(backup.credentials[0].id).is_ok());
    }

    #[test]
    fn test_failed_restore_rolls_back() {
        let db = seeded_db();
        let backup = db.export_ledger().unwrap();

        // Same ids already exist, so the credential insert collides
        assert!(db.restore_ledger(&backup, false).is_err());
        assert_eq!(db.count_transactions().unwrap(), 1);
        assert_eq!(db.list_rules(false).unwrap().len(), 1);
    }

    #[test]
    fn test_restore_with_clear_replaces_data() {
        let db = seeded_db();
        let backup = db.export_ledger().unwrap();
        db.create_rule("netflix", "Streaming").unwrap();

        let stats = db.restore_ledger(&backup, true).unwrap();
        assert_eq!(stats.rules, 1);
        assert_eq!(db.list_rules(false).unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_unreadable_secret() {
        let db = seeded_db();
        let mut backup = db.export_ledger().unwrap();
        backup.credentials[0].secret_json = "{broken".into();

        assert!(matches!(
            db.restore_ledger(&backup, true),
            Err(Error::Validation(_))
        ));
        assert_eq!(db.count_transactions().unwrap(), 1);
    }
}
