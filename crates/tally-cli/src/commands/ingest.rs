//! Ingestion command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, Local};
use tally_core::models::{DateRange, ScrapeStatus};
use tally_core::scrape::SCRAPER_URL_ENV;
use tally_core::settings::SettingsSource;
use tally_core::{Database, FileScraper, HttpScraper, IngestRequest, Ingestor, Scraper};

use tracing::warn;

use super::{parse_date, truncate};

/// Days collected when --from is not given
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Arguments of `tally ingest`
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub credential_id: i64,
    pub from: Option<String>,
    pub to: Option<String>,
    pub replay: Option<PathBuf>,
    pub max_retries: Option<u32>,
    pub strict_index: bool,
}

pub async fn cmd_ingest(
    db: &Database,
    settings: &dyn SettingsSource,
    options: IngestOptions,
) -> Result<()> {
    let end = match options.to.as_deref() {
        Some(to) => parse_date(to, "--to")?,
        None => Local::now().date_naive(),
    };
    let start = match options.from.as_deref() {
        Some(from) => parse_date(from, "--from")?,
        None => end - Duration::days(DEFAULT_LOOKBACK_DAYS),
    };
    let range = DateRange::new(start, end)?;

    let scraper: Box<dyn Scraper> = match options.replay {
        Some(path) => {
            println!("📼 Replaying {}", path.display());
            Box::new(FileScraper::new(path))
        }
        None => {
            let http = HttpScraper::from_env().with_context(|| {
                format!(
                    "No scraping service configured. Set {} or pass --replay <file>",
                    SCRAPER_URL_ENV
                )
            })?;
            println!("🌐 Scraping via {}", http.base_url());
            Box::new(http)
        }
    };

    println!(
        "📥 Ingesting credential {} for {} to {}...",
        options.credential_id, range.start, range.end
    );

    let mut request = IngestRequest::new(options.credential_id, range, "cli");
    request.max_retries = options.max_retries;

    let report = Ingestor::new(db, scraper.as_ref(), settings)
        .with_strict_business_key_index(options.strict_index)
        .run(request)
        .await
        .context("Ingestion could not start")?;

    if !report.succeeded() {
        warn!(
            "Run #{} for credential {} failed after {} attempt(s)",
            report.audit_id, options.credential_id, report.attempts
        );
        anyhow::bail!(
            "Ingestion failed after {} attempt(s): {}",
            report.attempts,
            report.message.as_deref().unwrap_or("unknown error")
        );
    }

    let stats = &report.stats;
    println!();
    println!("📊 Ingestion Results");
    println!("   ─────────────────────────────");
    println!("   Accounts processed: {}", stats.accounts_processed);
    println!("   New transactions: {}", stats.transactions_saved);
    println!("   Updated: {}", stats.transactions_updated);
    println!("   Duplicates skipped: {}", stats.duplicates_skipped);
    if stats.cards_skipped > 0 {
        println!(
            "   🔗 Accounts owned by another credential: {}",
            stats.cards_skipped
        );
    }
    if stats.alias_limit_warnings > 0 {
        println!(
            "   ⚠️  Category alias loops hit: {} (run 'tally mappings list')",
            stats.alias_limit_warnings
        );
    }
    println!();
    println!(
        "✅ Done in {:.1}s ({} attempt(s), run #{})",
        report.duration.as_secs_f64(),
        report.attempts,
        report.audit_id
    );

    Ok(())
}

pub fn cmd_history(db: &Database, limit: i64) -> Result<()> {
    let events = db.list_scrape_events(limit)?;

    if events.is_empty() {
        println!("No ingestion runs yet.");
        return Ok(());
    }

    println!();
    println!("🕑 Ingestion History");
    println!("   ─────────────────────────────────────────────────────────────");
    for event in events {
        let icon = match event.status {
            ScrapeStatus::Started => "⏳",
            ScrapeStatus::Success => "✅",
            ScrapeStatus::Failed => "❌",
        };
        let duration = event
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {} #{:<4} {} │ {:12} │ retries {} │ {:>7} │ {}",
            icon,
            event.id,
            event.created_at.format("%Y-%m-%d %H:%M"),
            event.vendor,
            event.retry_count,
            duration,
            truncate(event.message.as_deref().unwrap_or(""), 40)
        );
    }

    Ok(())
}
