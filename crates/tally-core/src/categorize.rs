//! Category resolution engine
//!
//! Assigns each transaction a category through a fixed cascade:
//! 1. Cache - manual override or historical majority for the normalized description
//! 2. Rule - first active rule whose pattern is a case-insensitive substring of the description
//! 3. Scraper - whatever category the collaborator supplied
//!
//! The winner is then passed through the alias mapping graph. The graph may
//! contain cycles, so traversal stops after `MAX_ALIAS_HOPS` substitutions.
//!
//! The cache is an explicit object built once per ingestion batch and passed
//! by reference; nothing here is process-global.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::Result;
use crate::models::{source_rank, CategorizationRule, CategorySource};
use crate::normalize::normalize_description;

/// Maximum alias substitutions before giving up on a chain
pub const MAX_ALIAS_HOPS: usize = 10;

/// Whether a newly resolved category may replace a stored one on rescrape
///
/// Only a strictly higher-ranked source wins (cache > rule > scraper > none),
/// so a cache or rule category is never downgraded by a scraper value.
pub fn should_replace(stored: Option<CategorySource>, new: Option<CategorySource>) -> bool {
    source_rank(new) > source_rank(stored)
}

/// Normalized description → category, warmed from history and overrides
#[derive(Debug, Clone, Default)]
pub struct CategoryCache {
    entries: HashMap<String, String>,
}

impl CategoryCache {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the cache from the ledger's history and the manual overrides
    ///
    /// History contributes the majority category per normalized description
    /// (ties: most recent use, then alphabetical). Overrides replace history.
    pub fn load(db: &Database) -> Result<Self> {
        let mut best: HashMap<String, (i64, NaiveDate, String)> = HashMap::new();

        for usage in db.category_usage()? {
            let candidate = (usage.count, usage.last_seen, usage.category);
            let replace = best
                .get(&usage.name_normalized)
                .map_or(true, |current| beats(&candidate, current));
            if replace {
                best.insert(usage.name_normalized, candidate);
            }
        }

        let mut cache = Self {
            entries: best
                .into_iter()
                .map(|(name, (_, _, category))| (name, category))
                .collect(),
        };

        for o in db.list_category_overrides()? {
            cache.entries.insert(o.description_normalized, o.category);
        }

        debug!("Category cache loaded with {} entries", cache.len());
        Ok(cache)
    }

    /// Discard the current contents and reload from the database
    pub fn rebuild(&mut self, db: &Database) -> Result<()> {
        *self = Self::load(db)?;
        Ok(())
    }

    pub fn insert(&mut self, description: &str, category: &str) {
        self.entries
            .insert(normalize_description(description), category.to_string());
    }

    /// Case-insensitive exact match on the normalized description
    pub fn lookup(&self, description: &str) -> Option<&str> {
        self.entries
            .get(&normalize_description(description))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Majority ordering: count, then recency, then the alphabetically first name
fn beats(a: &(i64, NaiveDate, String), b: &(i64, NaiveDate, String)) -> bool {
    match a.0.cmp(&b.0).then(a.1.cmp(&b.1)) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => a.2 < b.2,
    }
}

/// Category decided for one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryResolution {
    pub category: Option<String>,
    pub source: Option<CategorySource>,
    /// Alias traversal stopped at the hop limit
    pub alias_limit_hit: bool,
}

/// Resolves categories against one batch's cache, rules, and mappings
pub struct CategoryResolver<'c> {
    cache: &'c CategoryCache,
    /// Active rules in consultation order, patterns lowercased
    rules: Vec<(String, String)>,
    mappings: HashMap<String, String>,
}

impl<'c> CategoryResolver<'c> {
    /// Snapshot active rules and mappings for this batch
    pub fn load(db: &Database, cache: &'c CategoryCache) -> Result<Self> {
        let rules = db.list_rules(true)?;
        let mappings = db
            .list_category_mappings()?
            .into_iter()
            .map(|m| (m.source_category, m.target_category))
            .collect();
        Ok(Self::new(cache, &rules, mappings))
    }

    pub fn new(
        cache: &'c CategoryCache,
        rules: &[CategorizationRule],
        mappings: HashMap<String, String>,
    ) -> Self {
        let rules = rules
            .iter()
            .filter(|r| r.active)
            .map(|r| (r.name_pattern.to_lowercase(), r.target_category.clone()))
            .collect();
        Self {
            cache,
            rules,
            mappings,
        }
    }

    pub fn resolve(&self, description: &str, source_category: Option<&str>) -> CategoryResolution {
        let (category, source) = match self.select(description, source_category) {
            Some((category, source)) => (category, Some(source)),
            None => {
                return CategoryResolution {
                    category: None,
                    source: None,
                    alias_limit_hit: false,
                }
            }
        };

        let (category, alias_limit_hit) = self.follow_aliases(category);
        if alias_limit_hit {
            warn!(
                "Category alias chain for '{}' exceeded {} hops, keeping '{}'",
                description, MAX_ALIAS_HOPS, category
            );
        }

        CategoryResolution {
            category: Some(category),
            source,
            alias_limit_hit,
        }
    }

    fn select(
        &self,
        description: &str,
        source_category: Option<&str>,
    ) -> Option<(String, CategorySource)> {
        if let Some(category) = self.cache.lookup(description) {
            return Some((category.to_string(), CategorySource::Cache));
        }

        let lower = description.to_lowercase();
        if let Some((_, target)) = self
            .rules
            .iter()
            .find(|(pattern, _)| !pattern.is_empty() && lower.contains(pattern.as_str()))
        {
            return Some((target.clone(), CategorySource::Rule));
        }

        source_category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| (c.to_string(), CategorySource::Scraper))
    }

    fn follow_aliases(&self, mut category: String) -> (String, bool) {
        for _ in 0..MAX_ALIAS_HOPS {
            match self.mappings.get(&category) {
                Some(next) => category = next.clone(),
                None => return (category, false),
            }
        }
        let exhausted = self.mappings.contains_key(&category);
        (category, exhausted)
    }
}
