//! Categorization rules, category alias mappings, manual overrides,
//! and the historical category counts that warm the category cache

use rusqlite::{params, OptionalExtension};

use super::{parse_date_column, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{CategorizationRule, CategoryMapping, CategoryOverride};
use crate::normalize::normalize_description;

/// How often a category was used for one normalized description
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryUsage {
    pub name_normalized: String,
    pub category: String,
    pub count: i64,
    pub last_seen: chrono::NaiveDate,
}

impl Database {
    // ========== Rules ==========

    /// Add a categorization rule; new rules are consulted after existing ones
    pub fn create_rule(&self, name_pattern: &str, target_category: &str) -> Result<i64> {
        let pattern = name_pattern.trim();
        let target = target_category.trim();
        if pattern.is_empty() || target.is_empty() {
            return Err(Error::Validation(
                "Rule pattern and target category must not be empty".to_string(),
            ));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO categorization_rules (name_pattern, target_category) VALUES (?, ?)",
            params![pattern, target],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// List rules in consultation order
    pub fn list_rules(&self, active_only: bool) -> Result<Vec<CategorizationRule>> {
        let conn = self.conn()?;
        let sql = if active_only {
            "SELECT id, name_pattern, target_category, active, created_at
             FROM categorization_rules WHERE active = 1 ORDER BY id"
        } else {
            "SELECT id, name_pattern, target_category, active, created_at
             FROM categorization_rules ORDER BY id"
        };
        let mut stmt = conn.prepare(sql)?;
        let rules = stmt
            .query_map([], |row| {
                let created_at_str: String = row.get(4)?;
                Ok(CategorizationRule {
                    id: row.get(0)?,
                    name_pattern: row.get(1)?,
                    target_category: row.get(2)?,
                    active: row.get(3)?,
                    created_at: parse_datetime(&created_at_str),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn set_rule_active(&self, id: i64, active: bool) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE categorization_rules SET active = ? WHERE id = ?",
            params![active, id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Rule {}", id)));
        }
        Ok(())
    }

    pub fn delete_rule(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM categorization_rules WHERE id = ?", params![id])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Rule {}", id)));
        }
        Ok(())
    }

    // ========== Mappings ==========

    /// Set (or replace) the alias target for a source category
    pub fn set_category_mapping(&self, source_category: &str, target_category: &str) -> Result<()> {
        let source = source_category.trim();
        let target = target_category.trim();
        if source.is_empty() || target.is_empty() {
            return Err(Error::Validation(
                "Mapping categories must not be empty".to_string(),
            ));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO category_mappings (source_category, target_category) VALUES (?, ?)
             ON CONFLICT(source_category) DO UPDATE SET target_category = excluded.target_category",
            params![source, target],
        )?;
        Ok(())
    }

    pub fn get_category_mapping(&self, source_category: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let target = conn
            .query_row(
                "SELECT target_category FROM category_mappings WHERE source_category = ?",
                params![source_category],
                |row| row.get(0),
            )
            .optional()?;
        Ok(target)
    }

    pub fn list_category_mappings(&self) -> Result<Vec<CategoryMapping>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_category, target_category FROM category_mappings ORDER BY source_category",
        )?;
        let mappings = stmt
            .query_map([], |row| {
                Ok(CategoryMapping {
                    source_category: row.get(0)?,
                    target_category: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    /// Returns whether a mapping was removed
    pub fn delete_category_mapping(&self, source_category: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM category_mappings WHERE source_category = ?",
            params![source_category],
        )?;
        Ok(changed > 0)
    }

    // ========== Overrides ==========

    /// Pin a category for a description (stored by normalized description)
    pub fn set_category_override(&self, description: &str, category: &str) -> Result<()> {
        let key = normalize_description(description);
        let category = category.trim();
        if key.is_empty() || category.is_empty() {
            return Err(Error::Validation(
                "Override description and category must not be empty".to_string(),
            ));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO category_overrides (description_normalized, category) VALUES (?, ?)
             ON CONFLICT(description_normalized) DO UPDATE SET category = excluded.category",
            params![key, category],
        )?;
        Ok(())
    }

    pub fn list_category_overrides(&self) -> Result<Vec<CategoryOverride>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT description_normalized, category FROM category_overrides ORDER BY description_normalized",
        )?;
        let overrides = stmt
            .query_map([], |row| {
                Ok(CategoryOverride {
                    description_normalized: row.get(0)?,
                    category: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(overrides)
    }

    /// Returns whether an override was removed
    pub fn delete_category_override(&self, description: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM category_overrides WHERE description_normalized = ?",
            params![normalize_description(description)],
        )?;
        Ok(changed > 0)
    }

    // ========== History ==========

    /// Per (normalized description, category) usage counts across the ledger
    pub fn category_usage(&self) -> Result<Vec<CategoryUsage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name_normalized, category, COUNT(*), MAX(date)
             FROM transactions
             WHERE category IS NOT NULL AND TRIM(category) != ''
             GROUP BY name_normalized, category
             ORDER BY name_normalized",
        )?;
        let usage = stmt
            .query_map([], |row| {
                let last_seen: String = row.get(3)?;
                Ok(CategoryUsage {
                    name_normalized: row.get(0)?,
                    category: row.get(1)?,
                    count: row.get(2)?,
                    last_seen: parse_date_column(3, &last_seen)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(usage)
    }
}
