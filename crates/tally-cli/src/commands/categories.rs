//! Categorization rule, alias, and override commands

use anyhow::{Context, Result};
use tally_core::Database;

use super::truncate;

// ========== Rules ==========

pub fn cmd_rules_list(db: &Database) -> Result<()> {
    let rules = db.list_rules(false)?;

    if rules.is_empty() {
        println!("No rules yet. Add one with:");
        println!("  tally rules add netflix Streaming");
        return Ok(());
    }

    println!();
    println!("📏 Categorization Rules (first match wins)");
    println!("   ─────────────────────────────────────────────");
    for rule in rules {
        let status = if rule.active { "✅" } else { "⏸️ " };
        println!(
            "   {} {:>4} │ {:24} → {}",
            status,
            rule.id,
            truncate(&rule.name_pattern, 24),
            rule.target_category
        );
    }

    Ok(())
}

pub fn cmd_rules_add(db: &Database, pattern: &str, category: &str) -> Result<()> {
    let id = db
        .create_rule(pattern, category)
        .context("Failed to add rule")?;
    println!("✅ Rule {} added: '{}' → {}", id, pattern.trim(), category.trim());
    Ok(())
}

pub fn cmd_rules_set_active(db: &Database, id: i64, active: bool) -> Result<()> {
    db.set_rule_active(id, active)?;
    println!(
        "✅ Rule {} {}",
        id,
        if active { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub fn cmd_rules_remove(db: &Database, id: i64) -> Result<()> {
    db.delete_rule(id)?;
    println!("✅ Rule {} removed", id);
    Ok(())
}

// ========== Mappings ==========

pub fn cmd_mappings_list(db: &Database) -> Result<()> {
    let mappings = db.list_category_mappings()?;

    if mappings.is_empty() {
        println!("No category aliases.");
        return Ok(());
    }

    println!();
    println!("🔀 Category Aliases");
    println!("   ─────────────────────────────────────────────");
    for m in mappings {
        println!("   {:24} → {}", truncate(&m.source_category, 24), m.target_category);
    }

    Ok(())
}

pub fn cmd_mappings_set(db: &Database, source: &str, target: &str) -> Result<()> {
    db.set_category_mapping(source, target)
        .context("Failed to set alias")?;
    println!("✅ {} → {}", source.trim(), target.trim());
    Ok(())
}

pub fn cmd_mappings_remove(db: &Database, source: &str) -> Result<()> {
    if db.delete_category_mapping(source)? {
        println!("✅ Alias for '{}' removed", source);
    } else {
        println!("No alias for '{}'", source);
    }
    Ok(())
}

// ========== Overrides ==========

pub fn cmd_overrides_list(db: &Database) -> Result<()> {
    let overrides = db.list_category_overrides()?;

    if overrides.is_empty() {
        println!("No category overrides.");
        return Ok(());
    }

    println!();
    println!("📌 Category Overrides");
    println!("   ─────────────────────────────────────────────");
    for o in overrides {
        println!(
            "   {:32} → {}",
            truncate(&o.description_normalized, 32),
            o.category
        );
    }

    Ok(())
}

pub fn cmd_overrides_set(db: &Database, description: &str, category: &str) -> Result<()> {
    db.set_category_override(description, category)
        .context("Failed to set override")?;
    println!("✅ '{}' will always be categorized as {}", description.trim(), category.trim());
    Ok(())
}

pub fn cmd_overrides_remove(db: &Database, description: &str) -> Result<()> {
    if db.delete_category_override(description)? {
        println!("✅ Override for '{}' removed", description);
    } else {
        println!("No override for '{}'", description);
    }
    Ok(())
}
