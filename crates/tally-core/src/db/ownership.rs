//! Account ownership operations
//!
//! A physical account (vendor, account_number) contributes transactions
//! through exactly one credential: whichever claimed it first.

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, parse_enum_column, Database};
use crate::error::Result;
use crate::models::{AccountOwnership, Vendor};

impl Database {
    /// Owner of an account if it is someone other than `requesting_credential_id`
    ///
    /// `None` means the requester may process the account (it owns it, or
    /// nobody does yet).
    pub fn check_ownership(
        &self,
        vendor: Vendor,
        account_number: &str,
        requesting_credential_id: i64,
    ) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let owner: Option<i64> = conn
            .query_row(
                "SELECT credential_id FROM account_ownership WHERE vendor = ? AND account_number = ?",
                params![vendor.as_str(), account_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner.filter(|&id| id != requesting_credential_id))
    }

    /// Claim an account for a credential; the first claimant wins permanently
    ///
    /// Returns the owning credential id after the claim. The balance is
    /// recorded only when the claimant is the owner.
    pub fn claim_ownership(
        &self,
        vendor: Vendor,
        account_number: &str,
        credential_id: i64,
        balance: Option<f64>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO account_ownership (vendor, account_number, credential_id) VALUES (?, ?, ?)",
            params![vendor.as_str(), account_number, credential_id],
        )?;

        let owner: i64 = conn.query_row(
            "SELECT credential_id FROM account_ownership WHERE vendor = ? AND account_number = ?",
            params![vendor.as_str(), account_number],
            |row| row.get(0),
        )?;

        if owner == credential_id {
            if let Some(balance) = balance {
                conn.execute(
                    "UPDATE account_ownership SET last_balance = ?, last_balance_at = datetime('now')
                     WHERE vendor = ? AND account_number = ?",
                    params![balance, vendor.as_str(), account_number],
                )?;
            }
        }

        Ok(owner)
    }

    /// Get the ownership record for an account
    pub fn get_ownership(
        &self,
        vendor: Vendor,
        account_number: &str,
    ) -> Result<Option<AccountOwnership>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT vendor, account_number, credential_id, last_balance, last_balance_at, created_at
                 FROM account_ownership WHERE vendor = ? AND account_number = ?",
                params![vendor.as_str(), account_number],
                Self::row_to_ownership,
            )
            .optional()?;
        Ok(record)
    }

    /// List all ownership records
    pub fn list_ownership(&self) -> Result<Vec<AccountOwnership>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT vendor, account_number, credential_id, last_balance, last_balance_at, created_at
             FROM account_ownership ORDER BY vendor, account_number",
        )?;
        let records = stmt
            .query_map([], Self::row_to_ownership)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn row_to_ownership(row: &rusqlite::Row) -> rusqlite::Result<AccountOwnership> {
        let vendor_str: String = row.get(0)?;
        let balance_at: Option<String> = row.get(4)?;
        let created_at_str: String = row.get(5)?;
        Ok(AccountOwnership {
            vendor: parse_enum_column(0, &vendor_str)?,
            account_number: row.get(1)?,
            credential_id: row.get(2)?,
            last_balance: row.get(3)?,
            last_balance_at: balance_at.as_deref().map(parse_datetime),
            created_at: parse_datetime(&created_at_str),
        })
    }
}
