//! Account ownership commands

use anyhow::{Context, Result};
use tally_core::models::Vendor;
use tally_core::Database;

pub fn cmd_ownership_list(db: &Database) -> Result<()> {
    let records = db.list_ownership()?;

    if records.is_empty() {
        println!("No accounts claimed yet. Accounts are claimed on first ingest.");
        return Ok(());
    }

    println!();
    println!("🔗 Account Ownership");
    println!("   ─────────────────────────────────────────────────────");
    for record in records {
        let balance = record
            .last_balance
            .map(|b| format!("{:.2}", b))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {:14} │ {:10} │ credential {:>4} │ balance {:>10}",
            record.vendor.to_string(),
            record.account_number,
            record.credential_id,
            balance
        );
    }

    Ok(())
}

pub fn cmd_ownership_check(
    db: &Database,
    vendor: &str,
    account: &str,
    credential: i64,
) -> Result<()> {
    let vendor: Vendor = vendor.parse()?;

    match db.check_ownership(vendor, account, credential)? {
        Some(owner) => println!(
            "🔗 {} account {} is owned by credential {}; credential {} would skip it",
            vendor, account, owner, credential
        ),
        None => println!(
            "✅ Credential {} may process {} account {}",
            credential, vendor, account
        ),
    }

    Ok(())
}

pub fn cmd_ownership_claim(
    db: &Database,
    vendor: &str,
    account: &str,
    credential: i64,
) -> Result<()> {
    let vendor: Vendor = vendor.parse()?;

    db.get_credential(credential)?
        .with_context(|| format!("Credential {} not found", credential))?;

    let owner = db.claim_ownership(vendor, account, credential, None)?;
    if owner == credential {
        println!(
            "✅ {} account {} is owned by credential {}",
            vendor, account, credential
        );
    } else {
        println!(
            "⚠️  Not claimed: {} account {} already belongs to credential {}",
            vendor, account, owner
        );
    }

    Ok(())
}
