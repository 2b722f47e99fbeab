use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::snapshot::SnapshotPolicy;

pub const APP_NAME: &str = "investrack";
pub const CONFIG_NAME: &str = "config";

const ALPHA_VANTAGE_KEY_VAR: &str = "ALPHA_VANTAGE_API_KEY";
const DATABASE_VAR: &str = "INVESTRACK_DB";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub currency: String,
    /// Database directory. Empty means `database` next to the config file.
    pub database: String,
    /// `daily` or `<n>h`.
    pub snapshot_policy: String,
    pub price_cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    pub alpha_vantage_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            currency: "GHS".to_string(),
            database: String::new(),
            snapshot_policy: "daily".to_string(),
            price_cache_ttl_secs: 60,
            request_timeout_secs: 10,
            refresh_interval_secs: 30,
            alpha_vantage_api_key: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn load() -> Result<Config, confy::ConfyError> {
        confy::load(APP_NAME, CONFIG_NAME)
    }

    pub fn file_path() -> Result<PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }

    /// The environment wins over the config file.
    pub fn alpha_vantage_key(&self) -> Option<String> {
        non_empty(std::env::var(ALPHA_VANTAGE_KEY_VAR).ok())
            .or_else(|| non_empty(self.alpha_vantage_api_key.clone()))
    }

    pub fn snapshot_policy(&self) -> Result<SnapshotPolicy, ValidationError> {
        self.snapshot_policy.parse()
    }

    pub fn database_path(&self) -> Result<PathBuf, confy::ConfyError> {
        if let Some(path) = non_empty(std::env::var(DATABASE_VAR).ok()) {
            return Ok(PathBuf::from(path));
        }
        if !self.database.trim().is_empty() {
            return Ok(PathBuf::from(self.database.trim()));
        }
        let config_file = Config::file_path()?;
        Ok(config_file
            .parent()
            .map(|dir| dir.join("database"))
            .unwrap_or_else(|| PathBuf::from("database")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.currency, "GHS");
        assert_eq!(cfg.snapshot_policy().unwrap(), SnapshotPolicy::Daily);
        assert_eq!(cfg.price_cache_ttl_secs, 60);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"currency": "EUR", "snapshot_policy": "8h"}"#).unwrap();
        assert_eq!(cfg.currency, "EUR");
        assert_eq!(cfg.snapshot_policy().unwrap(), SnapshotPolicy::Every(8));
        assert_eq!(cfg.request_timeout_secs, 10);
    }

    #[test]
    fn test_bad_policy_is_rejected() {
        let cfg = Config {
            snapshot_policy: "weekly".to_string(),
            ..Config::default()
        };
        assert!(cfg.snapshot_policy().is_err());
    }

    #[test]
    fn test_explicit_database_path() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            database: dir.path().to_string_lossy().to_string(),
            ..Config::default()
        };
        if std::env::var(DATABASE_VAR).is_err() {
            assert_eq!(cfg.database_path().unwrap(), dir.path());
        }
    }

    #[test]
    fn test_blank_key_is_none() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some(" abc ".to_string())), Some("abc".to_string()));
    }
}
