//! Tally CLI - exactly-once ledger of scraped transactions
//!
//! Usage:
//!   tally init                          Initialize database and settings
//!   tally credentials add --json '...'  Store a vendor credential
//!   tally ingest 1 --from 2024-01-01    Scrape and merge one credential
//!   tally recurring                     Show installments and subscriptions

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => {
            let settings = commands::settings_file(cli.settings.as_deref())?;
            commands::cmd_init(&cli.db, cli.no_encrypt, &settings)
        }
        Commands::Credentials { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_credentials_list(&db, false),
                Some(CredentialsAction::List { all }) => commands::cmd_credentials_list(&db, all),
                Some(CredentialsAction::Add {
                    json,
                    file,
                    nickname,
                }) => commands::cmd_credentials_add(
                    &db,
                    json.as_deref(),
                    file.as_deref(),
                    nickname.as_deref(),
                ),
                Some(CredentialsAction::Deactivate { id }) => {
                    commands::cmd_credentials_deactivate(&db, id)
                }
            }
        }
        Commands::Ingest {
            credential,
            from,
            to,
            replay,
            max_retries,
            strict_index,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let settings = commands::settings_file(cli.settings.as_deref())?;
            let options = commands::IngestOptions {
                credential_id: credential,
                from,
                to,
                replay,
                max_retries,
                strict_index,
            };
            commands::cmd_ingest(&db, &settings, options).await
        }
        Commands::Recurring {
            vendor,
            account,
            since,
            json,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_recurring(
                &db,
                vendor.as_deref(),
                account.as_deref(),
                since.as_deref(),
                json,
            )
        }
        Commands::DedupSweep { dry_run } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_dedup_sweep(&db, dry_run)
        }
        Commands::Rules { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(RulesAction::List) => commands::cmd_rules_list(&db),
                Some(RulesAction::Add { pattern, category }) => {
                    commands::cmd_rules_add(&db, &pattern, &category)
                }
                Some(RulesAction::Enable { id }) => commands::cmd_rules_set_active(&db, id, true),
                Some(RulesAction::Disable { id }) => {
                    commands::cmd_rules_set_active(&db, id, false)
                }
                Some(RulesAction::Remove { id }) => commands::cmd_rules_remove(&db, id),
            }
        }
        Commands::Mappings { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(MappingsAction::List) => commands::cmd_mappings_list(&db),
                Some(MappingsAction::Set { source, target }) => {
                    commands::cmd_mappings_set(&db, &source, &target)
                }
                Some(MappingsAction::Remove { source }) => {
                    commands::cmd_mappings_remove(&db, &source)
                }
            }
        }
        Commands::Overrides { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(OverridesAction::List) => commands::cmd_overrides_list(&db),
                Some(OverridesAction::Set {
                    description,
                    category,
                }) => commands::cmd_overrides_set(&db, &description, &category),
                Some(OverridesAction::Remove { description }) => {
                    commands::cmd_overrides_remove(&db, &description)
                }
            }
        }
        Commands::Ownership { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(OwnershipAction::List) => commands::cmd_ownership_list(&db),
                Some(OwnershipAction::Check {
                    vendor,
                    account,
                    credential,
                }) => commands::cmd_ownership_check(&db, &vendor, &account, credential),
                Some(OwnershipAction::Claim {
                    vendor,
                    account,
                    credential,
                }) => commands::cmd_ownership_claim(&db, &vendor, &account, credential),
            }
        }
        Commands::History { limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_history(&db, limit)
        }
        Commands::Export { output } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_export(&db, output.as_deref())
        }
        Commands::Restore { file, clear } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_restore(&db, &file, clear)
        }
    }
}
