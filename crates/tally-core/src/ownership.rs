//! Card ownership resolution
//!
//! Several credentials can see the same physical card (a joint account login
//! and a personal login, say). Only the credential that claimed the account
//! first contributes its transactions; every other credential skips the whole
//! account.

use tracing::info;

use crate::db::Database;
use crate::error::Result;
use crate::models::Vendor;

/// Whether a credential's scrape of an account should be ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipDecision {
    Process,
    /// Another credential owns the account
    Skip { owner: i64 },
}

impl OwnershipDecision {
    pub fn should_process(&self) -> bool {
        matches!(self, Self::Process)
    }
}

/// Check, then claim, an account for a credential
///
/// An unowned account is claimed on the spot, so the decision is final for
/// the rest of the batch.
pub fn resolve_ownership(
    db: &Database,
    vendor: Vendor,
    account_number: &str,
    credential_id: i64,
    balance: Option<f64>,
) -> Result<OwnershipDecision> {
    if let Some(owner) = db.check_ownership(vendor, account_number, credential_id)? {
        info!(
            "Skipping {} account {}: owned by credential {}",
            vendor, account_number, owner
        );
        return Ok(OwnershipDecision::Skip { owner });
    }

    let owner = db.claim_ownership(vendor, account_number, credential_id, balance)?;
    if owner != credential_id {
        // Lost a race between the check and the claim
        info!(
            "Skipping {} account {}: claimed by credential {}",
            vendor, account_number, owner
        );
        return Ok(OwnershipDecision::Skip { owner });
    }

    Ok(OwnershipDecision::Process)
}
