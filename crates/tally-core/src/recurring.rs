//! Recurring payment detection
//!
//! Read-only analysis over the ledger with two independent paths:
//! - Installment plans come straight from the vendor-reported
//!   `(installments_number, installments_total)` fields.
//! - Recurring charges (subscriptions, memberships) are inferred from
//!   history: same normalized name on the same account, consistent amount,
//!   and a steady monthly or bi-monthly cadence.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::db::{Database, TransactionFilter};
use crate::error::Result;
use crate::models::{Frequency, Transaction, Vendor};

/// Detection configuration
#[derive(Debug, Clone)]
pub struct RecurringConfig {
    /// Each charge must be within this fraction of the running average
    pub amount_tolerance: f64,
    /// Categories that are never subscriptions (compared case-insensitively)
    pub excluded_categories: Vec<String>,
    /// Minimum distinct calendar months a group must span
    pub min_distinct_months: usize,
}

impl Default for RecurringConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: 0.05,
            excluded_categories: ["bank", "income", "salary", "transfers", "savings"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_distinct_months: 2,
        }
    }
}

/// Narrows the rows scanned
#[derive(Debug, Clone, Default)]
pub struct RecurringFilter {
    pub vendor: Option<Vendor>,
    pub account_number: Option<String>,
    pub since: Option<NaiveDate>,
}

/// A detected periodic charge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringPayment {
    pub name: String,
    pub vendor: Vendor,
    pub account_number: String,
    /// Average charge size (positive)
    pub monthly_amount: f64,
    pub frequency: Frequency,
    pub month_count: usize,
    pub occurrences: usize,
    pub last_charge_date: NaiveDate,
    pub next_payment_date: NaiveDate,
}

/// An installment plan with payments still outstanding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallmentPlan {
    pub name: String,
    pub vendor: Vendor,
    pub account_number: String,
    /// Size of one installment (positive)
    pub installment_amount: f64,
    pub installments_number: i64,
    pub installments_total: i64,
    pub remaining_payments: i64,
    pub original_purchase_date: NaiveDate,
    pub last_charge_date: NaiveDate,
    pub next_payment_date: NaiveDate,
    pub last_payment_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecurringReport {
    pub installments: Vec<InstallmentPlan>,
    pub recurring: Vec<RecurringPayment>,
}

/// Recurring payment detector
pub struct RecurringDetector<'a> {
    db: &'a Database,
    config: RecurringConfig,
}

impl<'a> RecurringDetector<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: RecurringConfig::default(),
        }
    }

    pub fn with_config(db: &'a Database, config: RecurringConfig) -> Self {
        Self { db, config }
    }

    pub fn detect(&self, filter: &RecurringFilter) -> Result<RecurringReport> {
        let rows = self.db.list_transactions(
            &TransactionFilter::new()
                .vendor(filter.vendor)
                .account_number(filter.account_number.as_deref())
                .since(filter.since)
                .expenses_only(true),
        )?;

        let installments = detect_installments(&rows);
        let recurring = self.detect_recurring(&rows);

        debug!(
            "Recurring detection over {} rows: {} installment plans, {} recurring",
            rows.len(),
            installments.len(),
            recurring.len()
        );

        Ok(RecurringReport {
            installments,
            recurring,
        })
    }

    fn detect_recurring(&self, rows: &[Transaction]) -> Vec<RecurringPayment> {
        let excluded: HashSet<String> = self
            .config
            .excluded_categories
            .iter()
            .map(|c| c.to_lowercase())
            .collect();

        let mut groups: BTreeMap<(String, Vendor, String), Vec<&Transaction>> = BTreeMap::new();
        for tx in rows {
            if tx.amount >= 0.0 || is_multi_installment(tx) {
                continue;
            }
            if tx
                .category
                .as_deref()
                .is_some_and(|c| excluded.contains(&c.trim().to_lowercase()))
            {
                continue;
            }
            groups
                .entry((
                    tx.name_normalized.clone(),
                    tx.vendor,
                    tx.account_number.clone(),
                ))
                .or_default()
                .push(tx);
        }

        let mut found: Vec<RecurringPayment> = groups
            .into_values()
            .filter_map(|mut group| {
                group.sort_by(|a, b| a.date.cmp(&b.date).then(a.identifier.cmp(&b.identifier)));
                self.classify_group(&group)
            })
            .collect();

        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.account_number.cmp(&b.account_number)));
        found
    }

    fn classify_group(&self, group: &[&Transaction]) -> Option<RecurringPayment> {
        let first = group.first()?;
        let last = group.last()?;

        let amounts: Vec<f64> = group.iter().map(|t| t.amount.abs()).collect();
        let average = consistent_average(&amounts, self.config.amount_tolerance)?;

        let months = distinct_months(group.iter().map(|t| t.date));
        if months.len() < self.config.min_distinct_months {
            return None;
        }

        let deltas: Vec<i32> = months.windows(2).map(|w| w[1] - w[0]).collect();
        let frequency = match modal_delta(&deltas)? {
            1 => Frequency::Monthly,
            2 => Frequency::BiMonthly,
            _ => return None,
        };

        Some(RecurringPayment {
            name: last.description.clone(),
            vendor: first.vendor,
            account_number: first.account_number.clone(),
            monthly_amount: round_cents(average),
            frequency,
            month_count: months.len(),
            occurrences: group.len(),
            last_charge_date: last.date,
            next_payment_date: add_months(last.date, frequency.months()),
        })
    }
}

fn is_multi_installment(tx: &Transaction) -> bool {
    tx.installments_total.is_some_and(|total| total > 1)
}

/// Average of `amounts` if each one is within `tolerance` of the running
/// average of the amounts before it
fn consistent_average(amounts: &[f64], tolerance: f64) -> Option<f64> {
    let (&first, rest) = amounts.split_first()?;
    let mut sum = first;
    let mut count = 1.0;
    for &amount in rest {
        let average = sum / count;
        if (amount - average).abs() > average * tolerance {
            return None;
        }
        sum += amount;
        count += 1.0;
    }
    Some(sum / count)
}

/// Sorted, de-duplicated month indices (`year * 12 + month0`)
fn distinct_months(dates: impl Iterator<Item = NaiveDate>) -> Vec<i32> {
    let mut months: Vec<i32> = dates.map(|d| d.year() * 12 + d.month0() as i32).collect();
    months.sort_unstable();
    months.dedup();
    months
}

/// Most frequent delta, if it accounts for at least half of all deltas
///
/// Ties go to the smaller delta.
fn modal_delta(deltas: &[i32]) -> Option<i32> {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for &d in deltas {
        *counts.entry(d).or_insert(0) += 1;
    }
    let (delta, count) = counts
        .into_iter()
        .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(db.cmp(da)))?;
    (count * 2 >= deltas.len()).then_some(delta)
}

fn detect_installments(rows: &[Transaction]) -> Vec<InstallmentPlan> {
    // One plan per (name, account, total, installment size); keep the latest position
    let mut plans: HashMap<(String, Vendor, String, i64, i64), &Transaction> = HashMap::new();
    for tx in rows {
        let (Some(number), Some(total)) = (tx.installments_number, tx.installments_total) else {
            continue;
        };
        if total <= 1 || number < 1 {
            continue;
        }
        let key = (
            tx.name_normalized.clone(),
            tx.vendor,
            tx.account_number.clone(),
            total,
            (tx.amount.abs() * 100.0).round() as i64,
        );
        let newer = plans
            .get(&key)
            .map_or(true, |current| number > current.installments_number.unwrap_or(0));
        if newer {
            plans.insert(key, tx);
        }
    }

    let mut found: Vec<InstallmentPlan> = plans
        .into_values()
        .filter_map(|tx| {
            let number = tx.installments_number?;
            let total = tx.installments_total?;
            let remaining = total - number;
            if remaining <= 0 {
                return None;
            }
            let original = sub_months(tx.date, (number - 1) as u32);
            Some(InstallmentPlan {
                name: tx.description.clone(),
                vendor: tx.vendor,
                account_number: tx.account_number.clone(),
                installment_amount: round_cents(tx.amount.abs()),
                installments_number: number,
                installments_total: total,
                remaining_payments: remaining,
                original_purchase_date: original,
                last_charge_date: tx.date,
                next_payment_date: add_months(original, number as u32),
                last_payment_date: add_months(original, (total - 1) as u32),
            })
        })
        .collect();

    found.sort_by(|a, b| {
        a.next_payment_date
            .cmp(&b.next_payment_date)
            .then(a.name.cmp(&b.name))
    });
    found
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months)).unwrap_or(date)
}

fn sub_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months)).unwrap_or(date)
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_consistent_average() {
        assert_eq!(consistent_average(&[50.0, 50.0, 50.0], 0.05), Some(50.0));
        assert!(consistent_average(&[50.0, 52.0, 51.0], 0.05).is_some());
        assert_eq!(consistent_average(&[50.0, 80.0], 0.05), None);
        assert_eq!(consistent_average(&[], 0.05), None);
    }

    #[test]
    fn test_distinct_months_across_years() {
        let months = distinct_months([d(2023, 12, 5), d(2024, 1, 5), d(2024, 1, 20)].into_iter());
        assert_eq!(months.len(), 2);
        assert_eq!(months[1] - months[0], 1);
    }

    #[test]
    fn test_modal_delta() {
        assert_eq!(modal_delta(&[1, 1, 1]), Some(1));
        assert_eq!(modal_delta(&[2, 2]), Some(2));
        assert_eq!(modal_delta(&[1, 2]), Some(1));
        assert_eq!(modal_delta(&[1, 3, 5]), None);
        assert_eq!(modal_delta(&[]), None);
    }

    #[test]
    fn test_with_config_widens_tolerance() {
        use crate::db::UpsertPolicy;
        use crate::models::{AccountKind, NewTransaction, TxnStatus};

        let db = Database::in_memory().unwrap();
        for (i, (date, amount)) in [(d(2024, 1, 3), -50.0), (d(2024, 2, 3), -54.0), (d(2024, 3, 3), -57.0)]
            .into_iter()
            .enumerate()
        {
            let tx = NewTransaction {
                identifier: format!("el-{}", i),
                vendor: Vendor::Isracard,
                account_number: "4321".to_string(),
                date,
                processed_date: date,
                description: "Electra Power".to_string(),
                memo: None,
                amount,
                currency: "ILS".to_string(),
                original_amount: Some(amount),
                original_currency: Some("ILS".to_string()),
                category: None,
                category_source: None,
                installments_number: None,
                installments_total: None,
                txn_type: AccountKind::Card,
                status: TxnStatus::Completed,
                credential_id: None,
            };
            db.upsert_transaction(&tx, &UpsertPolicy::default()).unwrap();
        }

        let strict = RecurringDetector::new(&db).detect(&RecurringFilter::default()).unwrap();
        assert!(strict.recurring.is_empty());

        let config = RecurringConfig {
            amount_tolerance: 0.1,
            ..RecurringConfig::default()
        };
        let relaxed = RecurringDetector::with_config(&db, config)
            .detect(&RecurringFilter::default())
            .unwrap();
        assert_eq!(relaxed.recurring.len(), 1);
        assert_eq!(relaxed.recurring[0].frequency, Frequency::Monthly);
        assert_eq!(relaxed.recurring[0].monthly_amount, 53.67);
    }

    #[test]
    fn test_month_arithmetic_clips() {
        assert_eq!(add_months(d(2024, 1, 31), 1), d(2024, 2, 29));
        assert_eq!(sub_months(d(2024, 3, 31), 1), d(2024, 2, 29));
    }
}
