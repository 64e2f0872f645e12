//! Database access layer with connection pooling and schema bootstrap
//!
//! This module is organized by domain:
//! - `credentials` - Data source credentials
//! - `ownership` - Account ownership claims
//! - `transactions` - Ledger writes, duplicate checks, and queries
//! - `categories` - Categorization rules, alias mappings, overrides, history
//! - `scrape_events` - Ingestion audit rows and the concurrency guard

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod categories;
mod credentials;
mod ownership;
mod scrape_events;
mod transaction_filter;
mod transactions;

pub use categories::CategoryUsage;
pub use transaction_filter::TransactionFilter;
pub use transactions::{UpsertOutcome, UpsertPolicy, UpsertResult};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "TALLY_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"tally-salt-v1-00";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Format a timestamp the way SQLite's `datetime()` does
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a stored `YYYY-MM-DD` column, surfacing bad data as a row error
pub(crate) fn parse_date_column(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a stored enum column through its `FromStr`
pub(crate) fn parse_enum_column<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(Error::InvalidData(e.to_string())),
        )
    })
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `TALLY_DB_KEY` to be set. The database is encrypted using
    /// SQLCipher with a key derived from the passphrase via Argon2.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// Only for development or testing.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Every pooled connection must be keyed before first use
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager = manager.with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a unique temporary file rather than `:memory:` because each pooled
    /// connection would otherwise see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tally_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Check if the database is encrypted
    pub fn is_encrypted(&self) -> Result<bool> {
        let conn = self.conn()?;
        let result: rusqlite::Result<String> =
            conn.query_row("PRAGMA cipher_version;", [], |row| row.get(0));
        Ok(result.is_ok() && std::env::var(DB_KEY_ENV).is_ok())
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Soft reset: clear ingested data but preserve configuration
    ///
    /// Clears: transactions, scrape_events, account_ownership
    /// Preserves: credentials, categorization_rules, category_mappings, category_overrides
    pub fn soft_reset(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            DELETE FROM transactions;
            DELETE FROM scrape_events;
            DELETE FROM account_ownership;
            "#,
        )?;

        info!("Database soft reset complete");
        Ok(())
    }

    /// Bootstrap the schema; safe to run on every open
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL: readers don't block the single ingestion writer
            PRAGMA journal_mode = WAL;
            PRAGMA cache_size = 2000;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Credentials (data sources); deactivated, never hard-deleted while referenced
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                vendor TEXT NOT NULL,
                nickname TEXT,
                secret_json TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_credentials_vendor ON credentials(vendor);

            -- Which credential owns a physical account; first claimant wins
            CREATE TABLE IF NOT EXISTS account_ownership (
                id INTEGER PRIMARY KEY,
                vendor TEXT NOT NULL,
                account_number TEXT NOT NULL,
                credential_id INTEGER NOT NULL REFERENCES credentials(id),
                last_balance REAL,
                last_balance_at DATETIME,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(vendor, account_number)
            );

            CREATE INDEX IF NOT EXISTS idx_ownership_credential ON account_ownership(credential_id);

            -- Ledger
            CREATE TABLE IF NOT EXISTS transactions (
                identifier TEXT NOT NULL,
                vendor TEXT NOT NULL,
                account_number TEXT NOT NULL,
                date DATE NOT NULL,
                processed_date DATE NOT NULL,
                description TEXT NOT NULL,
                name_normalized TEXT NOT NULL,
                memo TEXT,
                amount REAL NOT NULL,
                currency TEXT NOT NULL DEFAULT 'ILS',
                original_amount REAL,
                original_currency TEXT,
                category TEXT,
                category_source TEXT,                      -- cache, rule, scraper, NULL
                installments_number INTEGER,
                installments_total INTEGER,
                txn_type TEXT NOT NULL,                    -- bank, card
                status TEXT NOT NULL DEFAULT 'completed',  -- completed, pending
                source TEXT NOT NULL DEFAULT 'scrape',     -- scrape, manual
                credential_id INTEGER REFERENCES credentials(id),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (identifier, vendor)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_business_key
                ON transactions(vendor, date, name_normalized, account_number);
            CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
            CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(vendor, account_number);

            -- User-managed categorization rules, consulted in id order
            CREATE TABLE IF NOT EXISTS categorization_rules (
                id INTEGER PRIMARY KEY,
                name_pattern TEXT NOT NULL,
                target_category TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Category alias graph (may contain cycles)
            CREATE TABLE IF NOT EXISTS category_mappings (
                source_category TEXT PRIMARY KEY,
                target_category TEXT NOT NULL
            );

            -- Manual category per normalized description
            CREATE TABLE IF NOT EXISTS category_overrides (
                description_normalized TEXT PRIMARY KEY,
                category TEXT NOT NULL
            );

            -- One row per ingestion attempt-group
            CREATE TABLE IF NOT EXISTS scrape_events (
                id INTEGER PRIMARY KEY,
                triggered_by TEXT NOT NULL,
                vendor TEXT NOT NULL,
                credential_id INTEGER REFERENCES credentials(id),
                start_date DATE NOT NULL,
                status TEXT NOT NULL DEFAULT 'started',    -- started, success, failed
                message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER,
                stats TEXT,                                -- JSON IngestionStats
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_scrape_events_status ON scrape_events(status, created_at);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
