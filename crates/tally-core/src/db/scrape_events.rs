//! Ingestion audit rows and the single-flight guard
//!
//! One row per attempt-group: created `started` before the first attempt,
//! updated in place on every retry, and finished as `success` or `failed`.

use std::time::Duration;

use rusqlite::{params, OptionalExtension};

use super::{parse_date_column, parse_datetime, parse_enum_column, Database};
use crate::error::{Error, Result};
use crate::models::{NewScrapeEvent, ScrapeEvent, ScrapeStatus};

const EVENT_COLUMNS: &str = "id, triggered_by, vendor, credential_id, start_date, status, message, \
     retry_count, duration_ms, stats, created_at";

impl Database {
    /// Id of a `started` event younger than `staleness`, if any
    pub fn find_running_scrape(&self, staleness: Duration) -> Result<Option<i64>> {
        let conn = self.conn()?;
        let modifier = format!("-{} seconds", staleness.as_secs());
        let id = conn
            .query_row(
                "SELECT id FROM scrape_events
                 WHERE status = 'started' AND created_at > datetime('now', ?)
                 ORDER BY id DESC LIMIT 1",
                params![modifier],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Fail with `Concurrency` if another attempt-group is running
    ///
    /// Advisory only: this is a query, not a lock.
    pub fn check_concurrency_guard(&self, staleness: Duration) -> Result<()> {
        if let Some(id) = self.find_running_scrape(staleness)? {
            return Err(Error::Concurrency(format!(
                "scrape event {} is still running",
                id
            )));
        }
        Ok(())
    }

    pub fn create_scrape_event(&self, event: &NewScrapeEvent) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scrape_events (triggered_by, vendor, credential_id, start_date, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'started', datetime('now'), datetime('now'))",
            params![
                event.triggered_by,
                event.vendor.as_str(),
                event.credential_id,
                event.start_date.to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record a retry on the same audit row
    pub fn record_scrape_retry(&self, id: i64, retry_count: u32, message: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scrape_events SET retry_count = ?, message = ?, updated_at = datetime('now') WHERE id = ?",
            params![retry_count, message, id],
        )?;
        Ok(())
    }

    /// Move an audit row to its terminal status
    pub fn finish_scrape_event(
        &self,
        id: i64,
        status: ScrapeStatus,
        message: Option<&str>,
        duration: Duration,
        stats_json: Option<&str>,
    ) -> Result<()> {
        if status == ScrapeStatus::Started {
            return Err(Error::Validation(
                "A scrape event cannot finish in the started state".to_string(),
            ));
        }
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE scrape_events
             SET status = ?, message = COALESCE(?, message), duration_ms = ?, stats = ?, updated_at = datetime('now')
             WHERE id = ? AND status = 'started'",
            params![
                status.as_str(),
                message,
                duration.as_millis() as i64,
                stats_json,
                id
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Running scrape event {}", id)));
        }
        Ok(())
    }

    pub fn get_scrape_event(&self, id: i64) -> Result<Option<ScrapeEvent>> {
        let conn = self.conn()?;
        let event = conn
            .query_row(
                &format!("SELECT {} FROM scrape_events WHERE id = ?", EVENT_COLUMNS),
                params![id],
                Self::row_to_scrape_event,
            )
            .optional()?;
        Ok(event)
    }

    /// Most recent audit rows first
    pub fn list_scrape_events(&self, limit: i64) -> Result<Vec<ScrapeEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scrape_events ORDER BY id DESC LIMIT ?",
            EVENT_COLUMNS
        ))?;
        let events = stmt
            .query_map(params![limit], Self::row_to_scrape_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn row_to_scrape_event(row: &rusqlite::Row) -> rusqlite::Result<ScrapeEvent> {
        let vendor_str: String = row.get(2)?;
        let start_date_str: String = row.get(4)?;
        let status_str: String = row.get(5)?;
        let created_at_str: String = row.get(10)?;
        Ok(ScrapeEvent {
            id: row.get(0)?,
            triggered_by: row.get(1)?,
            vendor: parse_enum_column(2, &vendor_str)?,
            credential_id: row.get(3)?,
            start_date: parse_date_column(4, &start_date_str)?,
            status: parse_enum_column(5, &status_str)?,
            message: row.get(6)?,
            retry_count: row.get(7)?,
            duration_ms: row.get(8)?,
            stats: row.get(9)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
