//! Transaction filter builder for constructing dynamic SQL queries

use chrono::NaiveDate;

use crate::models::{EntrySource, Vendor};

/// Builder for constructing transaction query filters
///
/// The lifetime `'query` is how long borrowed filter values (account number,
/// search text) must remain valid.
#[derive(Debug, Default, Clone)]
pub struct TransactionFilter<'query> {
    pub vendor: Option<Vendor>,
    pub account_number: Option<&'query str>,
    pub search: Option<&'query str>,
    pub source: Option<EntrySource>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    /// Only rows dated on or after this day
    pub since: Option<NaiveDate>,
    /// Only rows with a negative amount
    pub expenses_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// WHERE/LIMIT clauses and their parameters
pub(crate) struct FilterResult {
    pub where_clause: String,
    pub limit_clause: String,
    pub params: Vec<Box<dyn rusqlite::ToSql>>,
}

impl<'query> TransactionFilter<'query> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vendor(mut self, vendor: Option<Vendor>) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn account_number(mut self, account: Option<&'query str>) -> Self {
        self.account_number = account;
        self
    }

    /// Case-insensitive substring match on the description
    pub fn search(mut self, query: Option<&'query str>) -> Self {
        self.search = query;
        self
    }

    pub fn source(mut self, source: Option<EntrySource>) -> Self {
        self.source = source;
        self
    }

    pub fn date_range(mut self, range: Option<(NaiveDate, NaiveDate)>) -> Self {
        self.date_range = range;
        self
    }

    pub fn since(mut self, since: Option<NaiveDate>) -> Self {
        self.since = since;
        self
    }

    pub fn expenses_only(mut self, value: bool) -> Self {
        self.expenses_only = value;
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: Option<i64>) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn build(&self) -> FilterResult {
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(vendor) = self.vendor {
            conditions.push("vendor = ?");
            params.push(Box::new(vendor.as_str()));
        }

        if let Some(account) = self.account_number {
            conditions.push("account_number = ?");
            params.push(Box::new(account.to_string()));
        }

        if let Some(search) = self.search {
            conditions.push("LOWER(description) LIKE ?");
            params.push(Box::new(format!("%{}%", search.to_lowercase())));
        }

        if let Some(source) = self.source {
            conditions.push("source = ?");
            params.push(Box::new(source.as_str()));
        }

        if let Some((start, end)) = self.date_range {
            conditions.push("date >= ? AND date <= ?");
            params.push(Box::new(start.to_string()));
            params.push(Box::new(end.to_string()));
        }

        if let Some(since) = self.since {
            conditions.push("date >= ?");
            params.push(Box::new(since.to_string()));
        }

        if self.expenses_only {
            conditions.push("amount < 0");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!("LIMIT {}", limit),
            // SQLite requires a LIMIT before OFFSET
            (None, Some(offset)) => format!("LIMIT -1 OFFSET {}", offset),
            (None, None) => String::new(),
        };

        FilterResult {
            where_clause,
            limit_clause,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        let result = TransactionFilter::new().build();
        assert!(result.where_clause.is_empty());
        assert!(result.limit_clause.is_empty());
        assert!(result.params.is_empty());
    }

    #[test]
    fn test_combined_filter() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let result = TransactionFilter::new()
            .vendor(Some(Vendor::Max))
            .account_number(Some("1234"))
            .date_range(Some((start, end)))
            .expenses_only(true)
            .limit(Some(10))
            .build();

        assert_eq!(
            result.where_clause,
            "WHERE vendor = ? AND account_number = ? AND date >= ? AND date <= ? AND amount < 0"
        );
        assert_eq!(result.limit_clause, "LIMIT 10");
        assert_eq!(result.params.len(), 4);
    }

    #[test]
    fn test_offset_without_limit() {
        let result = TransactionFilter::new().offset(Some(5)).build();
        assert_eq!(result.limit_clause, "LIMIT -1 OFFSET 5");
    }
}
