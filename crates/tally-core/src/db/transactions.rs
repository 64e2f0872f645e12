//! Ledger writes, duplicate detection, and queries
//!
//! A scraped transaction is a duplicate when either
//! - a row with the same (identifier, vendor) exists, or
//! - a non-manual row matches the business key
//!   (vendor, date, normalized name, |amount|, account_number),
//!   which catches vendors that reissue identifiers between scrapes.

use rusqlite::{params, ErrorCode, OptionalExtension};
use tracing::{debug, warn};

use super::transaction_filter::TransactionFilter;
use super::{parse_date_column, parse_datetime, parse_enum_column, Database};
use crate::categorize::should_replace;
use crate::error::{Error, Result};
use crate::models::{CategorySource, EntrySource, NewTransaction, Transaction, Vendor};
use crate::normalize::normalize_description;

const TXN_COLUMNS: &str = "identifier, vendor, account_number, date, processed_date, description, \
     name_normalized, memo, amount, currency, original_amount, original_currency, category, \
     category_source, installments_number, installments_total, txn_type, status, source, \
     credential_id, created_at";

/// How an existing row may be touched when the same transaction is seen again
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertPolicy {
    /// Allow a higher-ranked category source to replace the stored category
    pub update_category_on_rescrape: bool,
}

/// What happened to one incoming transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Duplicated,
    /// Existing row received a category or installment backfill
    Updated,
}

impl UpsertOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Duplicated => "duplicated",
            Self::Updated => "updated",
        }
    }
}

/// Outcome plus the category the ledger now holds for the transaction
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub outcome: UpsertOutcome,
    pub category: Option<String>,
    pub category_source: Option<CategorySource>,
}

/// Stored fields consulted on a primary-key hit
struct ExistingRow {
    category: Option<String>,
    category_source: Option<CategorySource>,
    installments_number: Option<i64>,
    installments_total: Option<i64>,
}

impl Database {
    /// Persist a scraped transaction exactly once
    pub fn upsert_transaction(
        &self,
        tx: &NewTransaction,
        policy: &UpsertPolicy,
    ) -> Result<UpsertResult> {
        let conn = self.conn()?;
        let name_normalized = normalize_description(&tx.description);

        // Primary key
        let existing = conn
            .query_row(
                "SELECT category, category_source, installments_number, installments_total
                 FROM transactions WHERE identifier = ? AND vendor = ?",
                params![tx.identifier, tx.vendor.as_str()],
                |row| {
                    let source: Option<String> = row.get(1)?;
                    Ok(ExistingRow {
                        category: row.get(0)?,
                        category_source: source.and_then(|s| s.parse().ok()),
                        installments_number: row.get(2)?,
                        installments_total: row.get(3)?,
                    })
                },
            )
            .optional()?;

        if let Some(existing) = existing {
            return self.backfill_existing(&conn, tx, existing, policy);
        }

        // Business key, ignoring manual rows
        let business_match = conn
            .query_row(
                "SELECT identifier, category, category_source FROM transactions
                 WHERE vendor = ? AND date = ? AND name_normalized = ?
                   AND round(abs(amount), 2) = round(abs(?), 2)
                   AND account_number = ? AND source != 'manual'
                 LIMIT 1",
                params![
                    tx.vendor.as_str(),
                    tx.date.to_string(),
                    name_normalized,
                    tx.amount,
                    tx.account_number,
                ],
                |row| {
                    let identifier: String = row.get(0)?;
                    let category: Option<String> = row.get(1)?;
                    let source: Option<String> = row.get(2)?;
                    let source: Option<CategorySource> = source.and_then(|s| s.parse().ok());
                    Ok((identifier, category, source))
                },
            )
            .optional()?;

        if let Some((other_id, category, category_source)) = business_match {
            debug!(
                "Transaction {} matches existing {} by business key, skipping",
                tx.identifier, other_id
            );
            return Ok(UpsertResult {
                outcome: UpsertOutcome::Duplicated,
                category,
                category_source,
            });
        }

        let inserted = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO transactions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
                TXN_COLUMNS
            ),
            params![
                tx.identifier,
                tx.vendor.as_str(),
                tx.account_number,
                tx.date.to_string(),
                tx.processed_date.to_string(),
                tx.description,
                name_normalized,
                tx.memo,
                tx.amount,
                tx.currency,
                tx.original_amount,
                tx.original_currency,
                tx.category,
                tx.category_source.map(|s| s.as_str()),
                tx.installments_number,
                tx.installments_total,
                tx.txn_type.as_str(),
                tx.status.as_str(),
                EntrySource::Scrape.as_str(),
                tx.credential_id,
            ],
        )?;

        // Ignored rows hit a constraint we did not pre-check (strict business-key index)
        let outcome = if inserted == 0 {
            UpsertOutcome::Duplicated
        } else {
            UpsertOutcome::Inserted
        };

        Ok(UpsertResult {
            outcome,
            category: tx.category.clone(),
            category_source: tx.category_source,
        })
    }

    fn backfill_existing(
        &self,
        conn: &rusqlite::Connection,
        tx: &NewTransaction,
        existing: ExistingRow,
        policy: &UpsertPolicy,
    ) -> Result<UpsertResult> {
        // Installments: fill NULLs only, never overwrite an observed plan
        let new_number = existing
            .installments_number
            .is_none()
            .then_some(tx.installments_number)
            .flatten();
        let new_total = existing
            .installments_total
            .is_none()
            .then_some(tx.installments_total)
            .flatten();

        let replace_category = policy.update_category_on_rescrape
            && tx.category.is_some()
            && tx.category != existing.category
            && should_replace(existing.category_source, tx.category_source);

        if new_number.is_none() && new_total.is_none() && !replace_category {
            return Ok(UpsertResult {
                outcome: UpsertOutcome::Duplicated,
                category: existing.category,
                category_source: existing.category_source,
            });
        }

        let (category, category_source) = if replace_category {
            (tx.category.clone(), tx.category_source)
        } else {
            (existing.category, existing.category_source)
        };

        conn.execute(
            "UPDATE transactions SET
                installments_number = COALESCE(installments_number, ?),
                installments_total = COALESCE(installments_total, ?),
                category = ?,
                category_source = ?,
                updated_at = datetime('now')
             WHERE identifier = ? AND vendor = ?",
            params![
                new_number,
                new_total,
                category,
                category_source.map(|s| s.as_str()),
                tx.identifier,
                tx.vendor.as_str(),
            ],
        )?;

        debug!(
            "Updated {} (installments backfilled: {}, category replaced: {})",
            tx.identifier,
            new_number.is_some() || new_total.is_some(),
            replace_category
        );

        Ok(UpsertResult {
            outcome: UpsertOutcome::Updated,
            category,
            category_source,
        })
    }

    /// Create the partial unique index on the business key
    ///
    /// Fails with `PersistenceConflict` when historical duplicates already
    /// violate it.
    pub fn ensure_business_key_index(&self) -> Result<()> {
        let conn = self.conn()?;
        let result = conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_business_key_unique
             ON transactions(vendor, date, name_normalized, round(abs(amount), 2), account_number)
             WHERE source != 'manual';",
        );
        match result {
            Ok(()) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, msg))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(Error::PersistenceConflict(msg.unwrap_or_else(|| {
                    "Existing rows violate the business-key index".to_string()
                })))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Try to add the strict business-key index, downgrading a conflict to a warning
    ///
    /// Returns whether the index is now in place.
    pub fn try_strict_business_key_index(&self) -> Result<bool> {
        match self.ensure_business_key_index() {
            Ok(()) => Ok(true),
            Err(Error::PersistenceConflict(msg)) => {
                warn!(
                    "Historical duplicates prevent the strict business-key index ({}); run the dedup sweep",
                    msg
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the strict business-key index exists
    pub fn has_business_key_index(&self) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_transactions_business_key_unique'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a hand-entered transaction (exempt from business-key dedup)
    pub fn insert_manual_transaction(&self, tx: &NewTransaction) -> Result<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO transactions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
                TXN_COLUMNS
            ),
            params![
                tx.identifier,
                tx.vendor.as_str(),
                tx.account_number,
                tx.date.to_string(),
                tx.processed_date.to_string(),
                tx.description,
                normalize_description(&tx.description),
                tx.memo,
                tx.amount,
                tx.currency,
                tx.original_amount,
                tx.original_currency,
                tx.category,
                tx.category_source.map(|s| s.as_str()),
                tx.installments_number,
                tx.installments_total,
                tx.txn_type.as_str(),
                tx.status.as_str(),
                EntrySource::Manual.as_str(),
                tx.credential_id,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(Error::Validation(format!(
                    "Transaction {} already exists for {}",
                    tx.identifier, tx.vendor
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a transaction (explicit user action)
    ///
    /// Returns whether a row was removed.
    pub fn delete_transaction(&self, identifier: &str, vendor: Vendor) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM transactions WHERE identifier = ? AND vendor = ?",
            params![identifier, vendor.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Get a transaction by primary key
    pub fn get_transaction(&self, identifier: &str, vendor: Vendor) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!(
                    "SELECT {} FROM transactions WHERE identifier = ? AND vendor = ?",
                    TXN_COLUMNS
                ),
                params![identifier, vendor.as_str()],
                Self::row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// List transactions matching a filter, oldest first
    pub fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let built = filter.build();
        let sql = format!(
            "SELECT {} FROM transactions {} ORDER BY date, identifier {}",
            TXN_COLUMNS, built.where_clause, built.limit_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            built.params.iter().map(|p| p.as_ref()).collect();
        let txs = stmt
            .query_map(params_refs.as_slice(), Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(txs)
    }

    /// Count all ledger rows
    pub fn count_transactions(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    pub(crate) fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        let vendor_str: String = row.get(1)?;
        let date_str: String = row.get(3)?;
        let processed_str: String = row.get(4)?;
        let category_source: Option<String> = row.get(13)?;
        let txn_type_str: String = row.get(16)?;
        let status_str: String = row.get(17)?;
        let source_str: String = row.get(18)?;
        let created_at_str: String = row.get(20)?;

        Ok(Transaction {
            identifier: row.get(0)?,
            vendor: parse_enum_column(1, &vendor_str)?,
            account_number: row.get(2)?,
            date: parse_date_column(3, &date_str)?,
            processed_date: parse_date_column(4, &processed_str)?,
            description: row.get(5)?,
            name_normalized: row.get(6)?,
            memo: row.get(7)?,
            amount: row.get(8)?,
            currency: row.get(9)?,
            original_amount: row.get(10)?,
            original_currency: row.get(11)?,
            category: row.get(12)?,
            category_source: category_source
                .as_deref()
                .map(|s| parse_enum_column(13, s))
                .transpose()?,
            installments_number: row.get(14)?,
            installments_total: row.get(15)?,
            txn_type: parse_enum_column(16, &txn_type_str)?,
            status: parse_enum_column(17, &status_str)?,
            source: parse_enum_column(18, &source_str)?,
            credential_id: row.get(19)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
