//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - exactly-once ledger of scraped bank and card transactions
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Ingest scraped bank and credit card transactions into a local ledger", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Ingestion settings file (TOML)
    ///
    /// Defaults to settings.toml in the platform data directory
    /// (~/.local/share/tally on Linux). Re-read on every run.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and write default settings
    Init,

    /// Manage vendor credentials (data sources)
    Credentials {
        #[command(subcommand)]
        action: Option<CredentialsAction>,
    },

    /// Scrape one credential and merge the result into the ledger
    Ingest {
        /// Credential ID
        credential: i64,

        /// First day to collect (YYYY-MM-DD, default: 30 days ago)
        #[arg(long)]
        from: Option<String>,

        /// Last day to collect (YYYY-MM-DD, default: today)
        #[arg(long)]
        to: Option<String>,

        /// Replay a recorded scrape result instead of calling the scraping service
        ///
        /// Without this flag the service at TALLY_SCRAPER_URL is used.
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Override the configured retry count (0-10)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Try to add the unique business-key index before writing
        #[arg(long)]
        strict_index: bool,
    },

    /// Show installment plans and recurring charges
    Recurring {
        /// Only this vendor
        #[arg(long)]
        vendor: Option<String>,

        /// Only this account number
        #[arg(long)]
        account: Option<String>,

        /// Only transactions on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Remove near-duplicate transactions left by earlier scrapes
    DedupSweep {
        /// Show what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage categorization rules
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },

    /// Manage category aliases (source category -> target category)
    Mappings {
        #[command(subcommand)]
        action: Option<MappingsAction>,
    },

    /// Manage manual categories for specific descriptions
    Overrides {
        #[command(subcommand)]
        action: Option<OverridesAction>,
    },

    /// Inspect and claim account ownership
    Ownership {
        #[command(subcommand)]
        action: Option<OwnershipAction>,
    },

    /// Show recent ingestion runs
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Export the whole ledger as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Restore a ledger exported with `tally export`
    Restore {
        /// Backup file
        file: PathBuf,

        /// Delete existing data first
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand)]
pub enum CredentialsAction {
    /// List credentials
    List {
        /// Include deactivated credentials
        #[arg(long)]
        all: bool,
    },

    /// Add a credential from its JSON form
    ///
    /// Example: --json '{"vendor":"max","username":"me","password":"..."}'
    Add {
        /// Credential JSON
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,

        /// Read the credential JSON from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Display name
        #[arg(short, long)]
        nickname: Option<String>,
    },

    /// Deactivate a credential (its transactions are kept)
    Deactivate {
        /// Credential ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules in the order they are consulted
    List,

    /// Add a rule: descriptions containing PATTERN get CATEGORY
    Add {
        /// Case-insensitive substring of the description
        pattern: String,

        /// Category to assign
        category: String,
    },

    /// Enable a rule
    Enable { id: i64 },

    /// Disable a rule without deleting it
    Disable { id: i64 },

    /// Delete a rule
    Remove { id: i64 },
}

#[derive(Subcommand)]
pub enum MappingsAction {
    /// List aliases
    List,

    /// Map SOURCE to TARGET (replaces an existing alias for SOURCE)
    Set { source: String, target: String },

    /// Remove the alias for SOURCE
    Remove { source: String },
}

#[derive(Subcommand)]
pub enum OverridesAction {
    /// List overrides
    List,

    /// Always categorize DESCRIPTION as CATEGORY
    Set {
        description: String,
        category: String,
    },

    /// Remove the override for DESCRIPTION
    Remove { description: String },
}

#[derive(Subcommand)]
pub enum OwnershipAction {
    /// List owned accounts
    List,

    /// Show whether CREDENTIAL may ingest an account
    Check {
        vendor: String,
        account: String,
        credential: i64,
    },

    /// Claim an account for CREDENTIAL (first claimant wins)
    Claim {
        vendor: String,
        account: String,
        credential: i64,
    },
}
