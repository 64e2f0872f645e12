//! Credential command implementations

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{Database, VendorCredentials};

use super::truncate;

pub fn cmd_credentials_list(db: &Database, include_inactive: bool) -> Result<()> {
    let creds = db.list_credentials(include_inactive)?;

    if creds.is_empty() {
        println!("No credentials yet. Add one with:");
        println!("  tally credentials add --json '{{\"vendor\":\"max\",\"username\":\"...\",\"password\":\"...\"}}'");
        return Ok(());
    }

    println!();
    println!("🔑 Credentials");
    println!("   ─────────────────────────────────────────────────────");
    for cred in creds {
        let status = if cred.active { "✅" } else { "⏸️ " };
        println!(
            "   {} {:>4} │ {:14} │ {:20} │ added {}",
            status,
            cred.id,
            cred.vendor,
            truncate(cred.nickname.as_deref().unwrap_or("-"), 20),
            cred.created_at.format("%Y-%m-%d")
        );
    }

    Ok(())
}

pub fn cmd_credentials_add(
    db: &Database,
    json: Option<&str>,
    file: Option<&Path>,
    nickname: Option<&str>,
) -> Result<()> {
    let raw = match (json, file) {
        (Some(json), _) => json.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) => anyhow::bail!("Pass the credential with --json or --file"),
    };

    let creds = VendorCredentials::from_json(&raw)?;
    let id = db
        .create_credential(&creds, nickname)
        .with_context(|| format!("Failed to store {} credential", creds.vendor()))?;

    println!("✅ Added {} credential (ID: {})", creds.vendor(), id);
    println!("   Ingest with: tally ingest {}", id);
    Ok(())
}

pub fn cmd_credentials_deactivate(db: &Database, id: i64) -> Result<()> {
    db.deactivate_credential(id)
        .with_context(|| format!("Failed to deactivate credential {}", id))?;
    println!("✅ Credential {} deactivated (its transactions are kept)", id);
    Ok(())
}
