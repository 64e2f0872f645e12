//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `settings_file` - Resolve the ingestion settings file
//! - `parse_date` - Parse a YYYY-MM-DD argument
//! - `cmd_init` - Initialize the database and default settings

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tally_core::settings::SettingsSource;
use tracing::debug;
use tally_core::{Database, IngestSettings, TomlSettingsFile};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    debug!("Opening database at {} (encrypted: {})", path_str, !no_encrypt);
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Settings file from --settings, or the platform default location
pub fn settings_file(path: Option<&Path>) -> Result<TomlSettingsFile> {
    match path {
        Some(path) => Ok(TomlSettingsFile::new(path)),
        None => TomlSettingsFile::default_path()
            .map(TomlSettingsFile::new)
            .context("Could not determine a data directory; pass --settings"),
    }
}

/// Parse a YYYY-MM-DD command-line date
pub fn parse_date(value: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid {} date '{}' (use YYYY-MM-DD)", flag, value))
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool, settings: &TomlSettingsFile) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    if db.is_encrypted()? {
        println!("   🔒 Encryption: ENABLED");
    } else {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    }

    if settings.path().exists() {
        // Surface a broken settings file now rather than on the first ingest
        let current = settings
            .load()
            .with_context(|| format!("Invalid settings file {}", settings.path().display()))?;
        println!(
            "   Settings: {} (retries {}, billing cycle starts on day {})",
            settings.path().display(),
            current.max_retries,
            current.billing_cycle_start_day
        );
    } else {
        settings
            .save(&IngestSettings::default())
            .with_context(|| format!("Failed to write {}", settings.path().display()))?;
        println!("   Wrote default settings to {}", settings.path().display());
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Add a credential: tally credentials add --json '{{\"vendor\":\"max\",...}}'");
    println!("  2. Ingest: tally ingest <credential-id> --from 2024-01-01");

    Ok(())
}
