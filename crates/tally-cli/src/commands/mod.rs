//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Init and shared utilities (open_db, settings_file, parse_date)
//! - `credentials` - Credential management (list, add, deactivate)
//! - `ingest` - Ingestion runs and their history
//! - `analysis` - Recurring payments and the dedup sweep
//! - `categories` - Rules, category aliases, and manual overrides
//! - `ownership` - Account ownership inspection and claims
//! - `backup` - Ledger export and restore

pub mod analysis;
pub mod backup;
pub mod categories;
pub mod core;
pub mod credentials;
pub mod ingest;
pub mod ownership;

// Re-export command functions for main.rs
pub use analysis::*;
pub use backup::*;
pub use categories::*;
pub use core::*;
pub use credentials::*;
pub use ingest::*;
pub use ownership::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
