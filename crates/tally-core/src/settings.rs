//! Ingestion settings
//!
//! Settings are read fresh on every ingestion run so a changed settings file
//! takes effect on the next run without a restart. Durations in the TOML file
//! are given in seconds.
//!
//! ```toml
//! max_retries = 3
//! attempt_timeout_secs = 600
//! fetch_categories = true
//! billing_cycle_start_day = 10
//! update_category_on_rescrape = false
//! guard_staleness_secs = 3600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::billing::{BillingCycle, DEFAULT_CYCLE_START_DAY};
use crate::error::{Error, Result};

/// Upper bound on retries per attempt-group
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Settings consulted by the ingestion orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub fetch_categories: bool,
    pub billing_cycle_start_day: u32,
    pub update_category_on_rescrape: bool,
    /// A `started` audit row older than this no longer blocks a new run
    pub guard_staleness: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(600),
            fetch_categories: true,
            billing_cycle_start_day: DEFAULT_CYCLE_START_DAY,
            update_category_on_rescrape: false,
            guard_staleness: Duration::from_secs(3600),
        }
    }
}

impl IngestSettings {
    /// Clamp retries and reject values the pipeline cannot use
    pub fn validate(mut self) -> Result<Self> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            warn!(
                "max_retries {} exceeds limit, clamping to {}",
                self.max_retries, MAX_RETRIES_LIMIT
            );
            self.max_retries = MAX_RETRIES_LIMIT;
        }
        BillingCycle::new(self.billing_cycle_start_day)?;
        if self.attempt_timeout.is_zero() {
            return Err(Error::Validation(
                "attempt_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn billing_cycle(&self) -> Result<BillingCycle> {
        BillingCycle::new(self.billing_cycle_start_day)
    }
}

/// Something that can produce the current settings
pub trait SettingsSource {
    fn load(&self) -> Result<IngestSettings>;
}

impl SettingsSource for IngestSettings {
    fn load(&self) -> Result<IngestSettings> {
        self.clone().validate()
    }
}

/// On-disk representation; every key is optional
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    max_retries: Option<u32>,
    attempt_timeout_secs: Option<u64>,
    fetch_categories: Option<bool>,
    billing_cycle_start_day: Option<u32>,
    update_category_on_rescrape: Option<bool>,
    guard_staleness_secs: Option<u64>,
}

impl From<SettingsFile> for IngestSettings {
    fn from(file: SettingsFile) -> Self {
        let defaults = IngestSettings::default();
        Self {
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            attempt_timeout: file
                .attempt_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.attempt_timeout),
            fetch_categories: file.fetch_categories.unwrap_or(defaults.fetch_categories),
            billing_cycle_start_day: file
                .billing_cycle_start_day
                .unwrap_or(defaults.billing_cycle_start_day),
            update_category_on_rescrape: file
                .update_category_on_rescrape
                .unwrap_or(defaults.update_category_on_rescrape),
            guard_staleness: file
                .guard_staleness_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.guard_staleness),
        }
    }
}

/// Settings backed by a TOML file, re-read on every load
#[derive(Debug, Clone)]
pub struct TomlSettingsFile {
    path: PathBuf,
}

impl TomlSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/tally/settings.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("tally").join("settings.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write settings back in file form
    pub fn save(&self, settings: &IngestSettings) -> Result<()> {
        let file = SettingsFile {
            max_retries: Some(settings.max_retries),
            attempt_timeout_secs: Some(settings.attempt_timeout.as_secs()),
            fetch_categories: Some(settings.fetch_categories),
            billing_cycle_start_day: Some(settings.billing_cycle_start_day),
            update_category_on_rescrape: Some(settings.update_category_on_rescrape),
            guard_staleness_secs: Some(settings.guard_staleness.as_secs()),
        };
        let content = toml::to_string_pretty(&file)
            .map_err(|e| Error::InvalidData(format!("Failed to encode settings: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl SettingsSource for TomlSettingsFile {
    fn load(&self) -> Result<IngestSettings> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", self.path.display());
                return IngestSettings::default().validate();
            }
            Err(e) => return Err(e.into()),
        };
        let file: SettingsFile = toml::from_str(&content)?;
        IngestSettings::from(file).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let s = IngestSettings::default();
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.billing_cycle_start_day, 10);
        assert!(s.fetch_categories);
        assert!(!s.update_category_on_rescrape);
        assert_eq!(s.attempt_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_validate_clamps_retries() {
        let s = IngestSettings {
            max_retries: 25,
            ..Default::default()
        };
        assert_eq!(s.validate().unwrap().max_retries, 10);
    }

    #[test]
    fn test_validate_rejects_bad_start_day() {
        let s = IngestSettings {
            billing_cycle_start_day: 0,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let source = TomlSettingsFile::new(dir.path().join("absent.toml"));
        assert_eq!(source.load().unwrap(), IngestSettings::default());
    }

    #[test]
    fn test_file_is_reread_on_each_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "max_retries = 1\n").unwrap();

        let source = TomlSettingsFile::new(&path);
        assert_eq!(source.load().unwrap().max_retries, 1);

        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "max_retries = 5").unwrap();
        writeln!(f, "billing_cycle_start_day = 15").unwrap();
        drop(f);

        let s = source.load().unwrap();
        assert_eq!(s.max_retries, 5);
        assert_eq!(s.billing_cycle_start_day, 15);
        assert_eq!(s.attempt_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "retries = 1\n").unwrap();
        assert!(matches!(
            TomlSettingsFile::new(&path).load(),
            Err(Error::Settings(_))
        ));
    }

    #[test]
    fn test_save_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let source = TomlSettingsFile::new(dir.path().join("nested").join("settings.toml"));
        let settings = IngestSettings {
            max_retries: 0,
            update_category_on_rescrape: true,
            ..Default::default()
        };
        source.save(&settings).unwrap();
        assert_eq!(source.load().unwrap(), settings);
    }
}
