//! Domain models for Tally

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A bank or card issuer integration supported by the scraping collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Hapoalim,
    Leumi,
    Mizrahi,
    Discount,
    Mercantile,
    OtsarHahayal,
    Beinleumi,
    Massad,
    Union,
    Yahav,
    OneZero,
    Isracard,
    Amex,
    Max,
    VisaCal,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hapoalim => "hapoalim",
            Self::Leumi => "leumi",
            Self::Mizrahi => "mizrahi",
            Self::Discount => "discount",
            Self::Mercantile => "mercantile",
            Self::OtsarHahayal => "otsar_hahayal",
            Self::Beinleumi => "beinleumi",
            Self::Massad => "massad",
            Self::Union => "union",
            Self::Yahav => "yahav",
            Self::OneZero => "one_zero",
            Self::Isracard => "isracard",
            Self::Amex => "amex",
            Self::Max => "max",
            Self::VisaCal => "visa_cal",
        }
    }

    /// Whether this vendor exposes bank accounts or credit cards
    pub fn kind(&self) -> AccountKind {
        match self {
            Self::Isracard | Self::Amex | Self::Max | Self::VisaCal => AccountKind::Card,
            _ => AccountKind::Bank,
        }
    }

    pub fn all() -> &'static [Vendor] {
        &[
            Self::Hapoalim,
            Self::Leumi,
            Self::Mizrahi,
            Self::Discount,
            Self::Mercantile,
            Self::OtsarHahayal,
            Self::Beinleumi,
            Self::Massad,
            Self::Union,
            Self::Yahav,
            Self::OneZero,
            Self::Isracard,
            Self::Amex,
            Self::Max,
            Self::VisaCal,
        ]
    }
}

impl std::str::FromStr for Vendor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase().replace('-', "_");
        Self::all()
            .iter()
            .copied()
            .find(|v| v.as_str() == key || v.as_str().replace('_', "") == key)
            .ok_or_else(|| Error::Validation(format!("Unknown vendor: {}", s)))
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction type, derived from the vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Bank,
    Card,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Card => "card",
        }
    }
}

impl std::str::FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bank" => Ok(Self::Bank),
            "card" => Ok(Self::Card),
            _ => Err(format!("Unknown account kind: {}", s)),
        }
    }
}

/// Where a transaction's category came from
///
/// Ordered by authority: a higher rank may replace a lower one on rescrape,
/// never the other way around. A missing source (`None`) ranks below all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    /// Historical majority or manual override for the same description
    Cache,
    /// User-defined categorization rule
    Rule,
    /// Category supplied by the scraping collaborator
    Scraper,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Rule => "rule",
            Self::Scraper => "scraper",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Cache => 3,
            Self::Rule => 2,
            Self::Scraper => 1,
        }
    }
}

impl std::str::FromStr for CategorySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cache" => Ok(Self::Cache),
            "rule" => Ok(Self::Rule),
            "scraper" => Ok(Self::Scraper),
            _ => Err(format!("Unknown category source: {}", s)),
        }
    }
}

impl std::fmt::Display for CategorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rank of an optional category source (null ranks lowest)
pub fn source_rank(source: Option<CategorySource>) -> u8 {
    source.map(|s| s.rank()).unwrap_or(0)
}

/// Settlement status reported by the vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TxnStatus {
    #[default]
    Completed,
    Pending,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Pending => "pending",
        }
    }
}

impl std::str::FromStr for TxnStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            "pending" => Ok(Self::Pending),
            _ => Err(format!("Unknown transaction status: {}", s)),
        }
    }
}

/// How a ledger row was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Ingested from a scrape
    #[default]
    Scrape,
    /// Entered by hand; exempt from business-key deduplication
    Manual,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for EntrySource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scrape" => Ok(Self::Scrape),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown entry source: {}", s)),
        }
    }
}

/// Inclusive date range requested from the collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(Error::Validation(format!(
                "Date range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }
}

/// A stored credential (data source)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub vendor: Vendor,
    pub nickname: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Binding of a physical account to the credential that owns it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountOwnership {
    pub vendor: Vendor,
    pub account_number: String,
    pub credential_id: i64,
    pub last_balance: Option<f64>,
    pub last_balance_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub identifier: String,
    pub vendor: Vendor,
    pub account_number: String,
    pub date: NaiveDate,
    pub processed_date: NaiveDate,
    pub description: String,
    pub name_normalized: String,
    pub memo: Option<String>,
    /// Signed charged amount (negative = expense)
    pub amount: f64,
    pub currency: String,
    pub original_amount: Option<f64>,
    pub original_currency: Option<String>,
    pub category: Option<String>,
    pub category_source: Option<CategorySource>,
    pub installments_number: Option<i64>,
    pub installments_total: Option<i64>,
    pub txn_type: AccountKind,
    pub status: TxnStatus,
    pub source: EntrySource,
    pub credential_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A transaction ready to be written, with derived fields already computed
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub identifier: String,
    pub vendor: Vendor,
    pub account_number: String,
    pub date: NaiveDate,
    pub processed_date: NaiveDate,
    pub description: String,
    pub memo: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub original_amount: Option<f64>,
    pub original_currency: Option<String>,
    pub category: Option<String>,
    pub category_source: Option<CategorySource>,
    pub installments_number: Option<i64>,
    pub installments_total: Option<i64>,
    pub txn_type: AccountKind,
    pub status: TxnStatus,
    pub credential_id: Option<i64>,
}

/// A user-managed categorization rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizationRule {
    pub id: i64,
    pub name_pattern: String,
    pub target_category: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Category alias edge (source → target)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMapping {
    pub source_category: String,
    pub target_category: String,
}

/// Explicit manual category for a normalized description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOverride {
    pub description_normalized: String,
    pub category: String,
}

/// Status of an ingestion attempt-group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Started,
    Success,
    Failed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ScrapeStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "started" => Ok(Self::Started),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown scrape status: {}", s)),
        }
    }
}

impl std::fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit row for one ingestion attempt-group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeEvent {
    pub id: i64,
    pub triggered_by: String,
    pub vendor: Vendor,
    pub credential_id: Option<i64>,
    pub start_date: NaiveDate,
    pub status: ScrapeStatus,
    pub message: Option<String>,
    pub retry_count: i64,
    pub duration_ms: Option<i64>,
    /// JSON-encoded `IngestionStats`
    pub stats: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New audit row, created before the first attempt
#[derive(Debug, Clone)]
pub struct NewScrapeEvent {
    pub triggered_by: String,
    pub vendor: Vendor,
    pub credential_id: Option<i64>,
    pub start_date: NaiveDate,
}

/// Detected cadence of a recurring payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Monthly,
    BiMonthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::BiMonthly => "bi-monthly",
        }
    }

    /// Number of months between charges
    pub fn months(&self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::BiMonthly => 2,
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_parse() {
        assert_eq!("hapoalim".parse::<Vendor>().unwrap(), Vendor::Hapoalim);
        assert_eq!("VISA_CAL".parse::<Vendor>().unwrap(), Vendor::VisaCal);
        assert_eq!("visa-cal".parse::<Vendor>().unwrap(), Vendor::VisaCal);
        assert_eq!("onezero".parse::<Vendor>().unwrap(), Vendor::OneZero);
        assert!(matches!(
            "nosuchbank".parse::<Vendor>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_vendor_kind() {
        assert_eq!(Vendor::Isracard.kind(), AccountKind::Card);
        assert_eq!(Vendor::Max.kind(), AccountKind::Card);
        assert_eq!(Vendor::Leumi.kind(), AccountKind::Bank);
    }

    #[test]
    fn test_category_source_ranking() {
        assert!(CategorySource::Cache.rank() > CategorySource::Rule.rank());
        assert!(CategorySource::Rule.rank() > CategorySource::Scraper.rank());
        assert!(source_rank(Some(CategorySource::Scraper)) > source_rank(None));
    }

    #[test]
    fn test_date_range_order() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(DateRange::new(a, b).is_ok());
        assert!(DateRange::new(b, a).is_err());
    }

    #[test]
    fn test_frequency_serialization() {
        let json = serde_json::to_string(&Frequency::BiMonthly).unwrap();
        assert_eq!(json, "\"bi-monthly\"");
        assert_eq!(Frequency::Monthly.months(), 1);
    }
}
