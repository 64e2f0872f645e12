//! Description normalization and derived identifiers

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use sha2::{Digest, Sha256};

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Normalize a transaction description for matching
///
/// Trims, collapses whitespace runs, and lowercases. The result is the key for
/// the category cache, the business-key duplicate check, and recurring grouping.
pub fn normalize_description(description: &str) -> String {
    whitespace()
        .replace_all(description.trim(), " ")
        .to_lowercase()
}

/// Derive a stable identifier for a transaction the vendor did not identify
pub fn derive_identifier(
    date: &NaiveDate,
    description: &str,
    amount: f64,
    account_number: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(date.to_string().as_bytes());
    hasher.update(description.as_bytes());
    hasher.update(amount.to_be_bytes());
    hasher.update(account_number.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_description() {
        assert_eq!(normalize_description("  NETFLIX.COM   Los Gatos "), "netflix.com los gatos");
        assert_eq!(normalize_description("Shufersal\tDeal"), "shufersal deal");
        assert_eq!(normalize_description(""), "");
    }

    #[test]
    fn test_derive_identifier_is_stable() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let a = derive_identifier(&date, "Coffee", -12.5, "1234");
        let b = derive_identifier(&date, "Coffee", -12.5, "1234");
        let c = derive_identifier(&date, "Coffee", -12.5, "5678");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
