//! Recurring payment and duplicate sweep commands

use anyhow::Result;
use tally_core::models::Vendor;
use tally_core::{Database, DedupSweep, RecurringDetector, RecurringFilter};

use super::{parse_date, truncate};

pub fn cmd_recurring(
    db: &Database,
    vendor: Option<&str>,
    account: Option<&str>,
    since: Option<&str>,
    json: bool,
) -> Result<()> {
    let filter = RecurringFilter {
        vendor: vendor.map(|v| v.parse::<Vendor>()).transpose()?,
        account_number: account.map(String::from),
        since: since.map(|s| parse_date(s, "--since")).transpose()?,
    };

    let report = RecurringDetector::new(db).detect(&filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.installments.is_empty() && report.recurring.is_empty() {
        println!("No installment plans or recurring charges found.");
        return Ok(());
    }

    if !report.installments.is_empty() {
        println!();
        println!("💳 Installment Plans");
        println!("   ─────────────────────────────────────────────────────────────");
        for plan in &report.installments {
            println!(
                "   {:24} │ {:>9.2} │ {:>2}/{:<2} │ {} left │ next {} │ last {}",
                truncate(&plan.name, 24),
                plan.installment_amount,
                plan.installments_number,
                plan.installments_total,
                plan.remaining_payments,
                plan.next_payment_date,
                plan.last_payment_date
            );
        }
    }

    if !report.recurring.is_empty() {
        println!();
        println!("🔁 Recurring Charges");
        println!("   ─────────────────────────────────────────────────────────────");
        for payment in &report.recurring {
            println!(
                "   {:24} │ {:>9.2} │ {:10} │ {} months │ next {}",
                truncate(&payment.name, 24),
                payment.monthly_amount,
                payment.frequency.to_string(),
                payment.month_count,
                payment.next_payment_date
            );
        }
    }

    Ok(())
}

pub fn cmd_dedup_sweep(db: &Database, dry_run: bool) -> Result<()> {
    println!("🔍 Looking for near-duplicate transactions...");

    let report = DedupSweep::run(db, dry_run)?;

    if report.removed.is_empty() {
        println!("✅ No duplicates found.");
        return Ok(());
    }

    for dup in &report.removed {
        println!(
            "   {} {} {:24} {:>9.2} (keeping {} from {})",
            if dry_run { "would remove" } else { "removed" },
            dup.date,
            truncate(&dup.description, 24),
            dup.amount,
            dup.kept_identifier,
            dup.kept_date
        );
    }

    println!();
    if dry_run {
        println!(
            "⚠️  {} duplicate(s) found. Run without --dry-run to remove them.",
            report.removed.len()
        );
    } else {
        println!("✅ Removed {} duplicate(s).", report.removed.len());
    }

    Ok(())
}
