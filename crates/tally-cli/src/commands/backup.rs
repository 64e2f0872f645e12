//! Ledger export and restore commands

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{Database, LedgerBackup};

/// Export the whole ledger as JSON to a file, or stdout when no file is given
pub fn cmd_export(db: &Database, output: Option<&Path>) -> Result<()> {
    let backup = db.export_ledger().context("Failed to export ledger")?;
    let json = serde_json::to_string_pretty(&backup)?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Exported {} records to {}", backup.metadata.total_records, path.display());
            println!("   Credentials: {}", backup.credentials.len());
            println!("   Transactions: {}", backup.transactions.len());
            println!("   Ingestion runs: {}", backup.scrape_events.len());
            println!("   ⚠️  The file contains credential secrets in plain text");
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}

/// Restore a ledger export into the open database
pub fn cmd_restore(db: &Database, file: &Path, clear: bool) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let backup: LedgerBackup = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a ledger export", file.display()))?;

    println!(
        "Restoring {} records exported {} (version {})...",
        backup.metadata.total_records, backup.metadata.created_at, backup.metadata.version
    );
    if clear {
        println!("   ⚠️  Existing data will be replaced");
    }

    let stats = db
        .restore_ledger(&backup, clear)
        .context("Failed to restore ledger (nothing was written)")?;

    println!("✅ Restored {} records", stats.total());
    println!("   Credentials: {}", stats.credentials);
    println!("   Account owners: {}", stats.ownership);
    println!("   Transactions: {}", stats.transactions);
    println!("   Rules: {}", stats.rules);
    println!("   Aliases: {}", stats.mappings);
    println!("   Overrides: {}", stats.overrides);
    println!("   Ingestion runs: {}", stats.scrape_events);

    Ok(())
}
