//! Offline duplicate sweep
//!
//! Re-collection sometimes stores the same purchase twice with dates one day
//! apart (the vendor shifted the timestamp across midnight between scrapes).
//! The sweep finds non-manual pairs that agree on vendor, normalized name,
//! |amount| and account, with dates at most one day apart, and deletes the
//! copy with the older `processed_date`. On a tie the lower identifier stays.
//!
//! The inline business-key check during ingestion is the primary guard; this
//! sweep only cleans up history it could not see.

use std::collections::HashSet;

use chrono::NaiveDate;
use rusqlite::params;
use serde::Serialize;
use tracing::info;

use crate::db::{parse_date_column, parse_enum_column, Database};
use crate::error::Result;
use crate::models::Vendor;

/// A row the sweep removed (or would remove, in a dry run)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedDuplicate {
    pub identifier: String,
    pub vendor: Vendor,
    pub kept_identifier: String,
    pub date: NaiveDate,
    pub kept_date: NaiveDate,
    pub description: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub pairs_found: usize,
    pub removed: Vec<RemovedDuplicate>,
    pub dry_run: bool,
}

/// One side of a candidate pair
struct Side {
    identifier: String,
    date: NaiveDate,
    processed_date: NaiveDate,
    description: String,
    amount: f64,
}

pub struct DedupSweep;

impl DedupSweep {
    /// Find and (unless `dry_run`) delete near-duplicate pairs in one SQLite transaction
    pub fn run(db: &Database, dry_run: bool) -> Result<SweepReport> {
        let mut conn = db.conn()?;
        let tx = conn.transaction()?;

        let pairs = {
            let mut stmt = tx.prepare(
                "SELECT a.vendor,
                        a.identifier, a.date, a.processed_date, a.description, a.amount,
                        b.identifier, b.date, b.processed_date, b.description, b.amount
                 FROM transactions a
                 JOIN transactions b
                   ON a.vendor = b.vendor
                  AND a.account_number = b.account_number
                  AND a.name_normalized = b.name_normalized
                  AND round(abs(a.amount), 2) = round(abs(b.amount), 2)
                  AND a.identifier < b.identifier
                  AND abs(julianday(a.date) - julianday(b.date)) <= 1
                 WHERE a.source != 'manual' AND b.source != 'manual'
                 ORDER BY a.vendor, a.identifier, b.identifier",
            )?;
            let rows = stmt.query_map([], |row| {
                let vendor: String = row.get(0)?;
                let side = |base: usize| -> rusqlite::Result<Side> {
                    let date: String = row.get(base + 1)?;
                    let processed: String = row.get(base + 2)?;
                    Ok(Side {
                        identifier: row.get(base)?,
                        date: parse_date_column(base + 1, &date)?,
                        processed_date: parse_date_column(base + 2, &processed)?,
                        description: row.get(base + 3)?,
                        amount: row.get(base + 4)?,
                    })
                };
                Ok((parse_enum_column::<Vendor>(0, &vendor)?, side(1)?, side(6)?))
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut report = SweepReport {
            pairs_found: pairs.len(),
            removed: Vec::new(),
            dry_run,
        };
        let mut gone: HashSet<(Vendor, String)> = HashSet::new();

        for (vendor, a, b) in pairs {
            if gone.contains(&(vendor, a.identifier.clone()))
                || gone.contains(&(vendor, b.identifier.clone()))
            {
                continue;
            }

            // `a` has the lower identifier, so it survives a tie
            let (keep, drop) = if b.processed_date > a.processed_date {
                (b, a)
            } else {
                (a, b)
            };

            if !dry_run {
                tx.execute(
                    "DELETE FROM transactions WHERE identifier = ? AND vendor = ?",
                    params![drop.identifier, vendor.as_str()],
                )?;
            }
            gone.insert((vendor, drop.identifier.clone()));
            report.removed.push(RemovedDuplicate {
                identifier: drop.identifier,
                vendor,
                kept_identifier: keep.identifier,
                date: drop.date,
                kept_date: keep.date,
                description: drop.description,
                amount: drop.amount,
            });
        }

        if dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }

        info!(
            "Dedup sweep: {} candidate pairs, {} {}",
            report.pairs_found,
            report.removed.len(),
            if dry_run { "would be removed" } else { "removed" }
        );
        Ok(report)
    }
}
