//! Credential operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, parse_enum_column, Database};
use crate::credentials::VendorCredentials;
use crate::error::{Error, Result};
use crate::models::Credential;

impl Database {
    /// Store a new credential after validating its shape
    pub fn create_credential(
        &self,
        credentials: &VendorCredentials,
        nickname: Option<&str>,
    ) -> Result<i64> {
        credentials.validate()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO credentials (vendor, nickname, secret_json) VALUES (?, ?, ?)",
            params![
                credentials.vendor().as_str(),
                nickname,
                credentials.to_json()?
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List credentials (secrets are not loaded)
    pub fn list_credentials(&self, include_inactive: bool) -> Result<Vec<Credential>> {
        let conn = self.conn()?;
        let sql = if include_inactive {
            "SELECT id, vendor, nickname, active, created_at FROM credentials ORDER BY id"
        } else {
            "SELECT id, vendor, nickname, active, created_at FROM credentials WHERE active = 1 ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let creds = stmt
            .query_map([], Self::row_to_credential)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(creds)
    }

    /// Get a credential by ID
    pub fn get_credential(&self, id: i64) -> Result<Option<Credential>> {
        let conn = self.conn()?;
        let cred = conn
            .query_row(
                "SELECT id, vendor, nickname, active, created_at FROM credentials WHERE id = ?",
                params![id],
                Self::row_to_credential,
            )
            .optional()?;
        Ok(cred)
    }

    /// Load the stored secret for a credential
    pub fn get_credential_secret(&self, id: i64) -> Result<VendorCredentials> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT secret_json FROM credentials WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or_else(|| Error::NotFound(format!("Credential {}", id)))?;
        VendorCredentials::from_json(&json)
    }

    /// Logically deactivate a credential; it stays referenced by its rows
    pub fn deactivate_credential(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE credentials SET active = 0, updated_at = datetime('now') WHERE id = ?",
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Credential {}", id)));
        }
        Ok(())
    }

    fn row_to_credential(row: &rusqlite::Row) -> rusqlite::Result<Credential> {
        let vendor_str: String = row.get(1)?;
        let created_at_str: String = row.get(4)?;
        Ok(Credential {
            id: row.get(0)?,
            vendor: parse_enum_column(1, &vendor_str)?,
            nickname: row.get(2)?,
            active: row.get(3)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
