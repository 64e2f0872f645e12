//! Wire types exchanged with the scraping collaborator
//!
//! Field names follow the collaborator's camelCase JSON.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

use crate::credentials::CredentialRecord;
use crate::error::{Error, Result};
use crate::models::{DateRange, TxnStatus, Vendor};

/// One collection request
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub vendor: Vendor,
    pub date_range: DateRange,
    pub credentials: CredentialRecord,
    pub fetch_categories: bool,
}

/// Error tag reported by the collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScrapeErrorType {
    InvalidPassword,
    ChangePassword,
    AccountBlocked,
    TwoFactorRetrieverMissing,
    Timeout,
    Generic,
    GeneralError,
    Unknown(String),
}

impl ScrapeErrorType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InvalidPassword => "INVALID_PASSWORD",
            Self::ChangePassword => "CHANGE_PASSWORD",
            Self::AccountBlocked => "ACCOUNT_BLOCKED",
            Self::TwoFactorRetrieverMissing => "TWO_FACTOR_RETRIEVER_MISSING",
            Self::Timeout => "TIMEOUT",
            Self::Generic => "GENERIC",
            Self::GeneralError => "GENERAL_ERROR",
            Self::Unknown(tag) => tag,
        }
    }

    /// Failures that a retry cannot fix (credentials, blocked account)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidPassword
                | Self::ChangePassword
                | Self::AccountBlocked
                | Self::TwoFactorRetrieverMissing
        )
    }
}

impl From<String> for ScrapeErrorType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "INVALID_PASSWORD" => Self::InvalidPassword,
            "CHANGE_PASSWORD" => Self::ChangePassword,
            "ACCOUNT_BLOCKED" => Self::AccountBlocked,
            "TWO_FACTOR_RETRIEVER_MISSING" => Self::TwoFactorRetrieverMissing,
            "TIMEOUT" => Self::Timeout,
            "GENERIC" => Self::Generic,
            "GENERAL_ERROR" => Self::GeneralError,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<ScrapeErrorType> for String {
    fn from(t: ScrapeErrorType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for ScrapeErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one collection attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ScrapeErrorType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub accounts: Vec<ScrapedAccount>,
}

impl ScrapeResult {
    pub fn success(accounts: Vec<ScrapedAccount>) -> Self {
        Self {
            success: true,
            error_type: None,
            error_message: None,
            accounts,
        }
    }

    pub fn failure(error_type: ScrapeErrorType, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_type: Some(error_type),
            error_message: Some(message.into()),
            accounts: Vec::new(),
        }
    }

    /// Convert an unsuccessful result into the matching collection error
    pub fn into_error(self) -> Error {
        let message = match (&self.error_type, &self.error_message) {
            (Some(t), Some(m)) => format!("{}: {}", t, m),
            (Some(t), None) => t.to_string(),
            (None, Some(m)) => m.clone(),
            (None, None) => "collaborator reported failure without details".to_string(),
        };
        match self.error_type {
            Some(t) if t.is_terminal() => Error::TerminalCollection(message),
            _ => Error::TransientCollection(message),
        }
    }
}

/// One account as enumerated by the collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedAccount {
    pub account_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(default)]
    pub txns: Vec<ScrapedTransaction>,
}

/// Installment position reported for a split purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedInstallments {
    pub number: i64,
    pub total: i64,
}

/// One raw transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedTransaction {
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub identifier: Option<String>,
    pub description: String,
    /// `YYYY-MM-DD` or RFC 3339 timestamp
    pub date: String,
    /// Ignored: the billing cycle calculator decides the processed date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_date: Option<String>,
    pub original_amount: f64,
    pub original_currency: String,
    pub charged_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charged_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installments: Option<ScrapedInstallments>,
    #[serde(default)]
    pub status: TxnStatus,
    /// Collaborator's own type tag (`normal`, `installments`)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Present when categories were requested and the vendor supplies them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ScrapedTransaction {
    /// Occurrence date as the vendor reported it
    pub fn occurrence_date(&self) -> Result<NaiveDate> {
        parse_scraped_date(&self.date)
    }
}

/// Accept a bare date or an RFC 3339 timestamp (date taken in its own offset)
pub fn parse_scraped_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.date_naive())
        .map_err(|_| Error::InvalidData(format!("Unparseable transaction date: {}", s)))
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_classification() {
        assert!(ScrapeErrorType::from("INVALID_PASSWORD".to_string()).is_terminal());
        assert!(ScrapeErrorType::from("ACCOUNT_BLOCKED".to_string()).is_terminal());
        assert!(!ScrapeErrorType::from("TIMEOUT".to_string()).is_terminal());
        assert!(!ScrapeErrorType::from("GENERIC".to_string()).is_terminal());
        assert_eq!(
            ScrapeErrorType::from("SOMETHING_NEW".to_string()),
            ScrapeErrorType::Unknown("SOMETHING_NEW".to_string())
        );
    }

    #[test]
    fn test_into_error() {
        let err = ScrapeResult::failure(ScrapeErrorType::InvalidPassword, "bad login").into_error();
        assert!(matches!(err, Error::TerminalCollection(_)));

        let err = ScrapeResult::failure(ScrapeErrorType::Timeout, "slow").into_error();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_collaborator_json() {
        let json = r#"{
            "success": true,
            "accounts": [{
                "accountNumber": "1234",
                "balance": -1500.5,
                "txns": [{
                    "identifier": 987654,
                    "description": "NETFLIX.COM",
                    "date": "2024-03-01T22:00:00.000+02:00",
                    "processedDate": "2024-04-10T00:00:00.000Z",
                    "originalAmount": -50,
                    "originalCurrency": "ILS",
                    "chargedAmount": -50,
                    "installments": {"number": 2, "total": 12},
                    "status": "completed",
                    "type": "installments"
                }]
            }]
        }"#;
        let result: ScrapeResult = serde_json::from_str(json).unwrap();
        assert!(result.success);
        let txn = &result.accounts[0].txns[0];
        assert_eq!(txn.identifier.as_deref(), Some("987654"));
        assert_eq!(
            txn.occurrence_date().unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(txn.installments, Some(ScrapedInstallments { number: 2, total: 12 }));
        assert_eq!(txn.status, TxnStatus::Completed);
    }

    #[test]
    fn test_failure_json() {
        let json = r#"{"success": false, "errorType": "CHANGE_PASSWORD", "errorMessage": "expired"}"#;
        let result: ScrapeResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.error_type, Some(ScrapeErrorType::ChangePassword));
        assert!(result.accounts.is_empty());
    }

    #[test]
    fn test_bad_date() {
        assert!(matches!(
            parse_scraped_date("yesterday"),
            Err(Error::InvalidData(_))
        ));
    }
}
