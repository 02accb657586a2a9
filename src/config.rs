//! ferry configuration from ferry.toml

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FerryError, Result};

pub const CONFIG_FILE_NAME: &str = "ferry.toml";

const SOURCE_API_KEY_ENV: &str = "FERRY_SOURCE_API_KEY";
const DESTINATION_API_KEY_ENV: &str = "FERRY_DESTINATION_API_KEY";

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct FerryConfig {
    #[serde(default)]
    pub source: IndexConfig,
    #[serde(default)]
    pub destination: IndexConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    /// Extra transport headers, sent by both the source and destination clients
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Identity of one side of the migration
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct IndexConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub index: String,
    /// Override for the API host (defaults to `{app_id}-dsn.algolia.net`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl IndexConfig {
    fn validate(&self, side: &str) -> Result<()> {
        for (field, value) in [
            ("app_id", &self.app_id),
            ("api_key", &self.api_key),
            ("index", &self.index),
        ] {
            if value.trim().is_empty() {
                return Err(FerryError::Config(format!("{side}.{field} is required")));
            }
        }
        Ok(())
    }
}

/// When the Settings Replicator runs relative to the record pipeline
#[derive(Debug, Deserialize, Serialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettingsTiming {
    /// After upload for `map`, concurrently for every other operation
    #[default]
    PerOperation,
    Concurrent,
    AfterUpload,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RunConfig {
    /// Soft floor on extracted records; see `pipeline::extractor`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub copy_settings: bool,
    #[serde(default)]
    pub settings_timing: SettingsTiming,
    /// Extra attempts per destination batch before the upload stalls
    #[serde(default)]
    pub upload_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Passed through verbatim to the source browse request
    #[serde(default)]
    pub request_options: Map<String, Value>,
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            limit: None,
            copy_settings: false,
            settings_timing: SettingsTiming::default(),
            upload_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            request_options: Map::new(),
        }
    }
}

impl RunConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("ferry-staging")
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

impl FerryConfig {
    /// Load config from an explicit path, or from the first default location
    /// that exists, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        for candidate in Self::default_paths() {
            if candidate.exists() {
                tracing::debug!("Loading config from {}", candidate.display());
                return Self::from_file(&candidate);
            }
        }

        Ok(Self::default())
    }

    /// Candidate config locations, most specific first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("ferry").join("config.toml"));
        }
        paths
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FerryError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| FerryError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FerryError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| FerryError::Config(e.to_string()))
    }

    /// Replace API keys with values from `FERRY_SOURCE_API_KEY` /
    /// `FERRY_DESTINATION_API_KEY` when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(SOURCE_API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.source.api_key = key;
        }
        if let Some(key) = lookup(DESTINATION_API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.destination.api_key = key;
        }
    }

    /// Both sides must name an application, a key and an index.
    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        self.destination.validate("destination")
    }
}

pub const DEFAULT_CONFIG: &str = r#"# ferry configuration
# See: ferry config --help

[source]
app_id = ""
api_key = ""
index = ""

[destination]
app_id = ""
api_key = ""
index = ""

[run]
copy_settings = false
# per_operation | concurrent | after_upload
settings_timing = "per_operation"
upload_retries = 0
retry_backoff_ms = 500

[run.request_options]
attributesToRetrieve = "*"

[staging]
dir = "ferry-staging"

[headers]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = FerryConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.run.settings_timing, SettingsTiming::PerOperation);
        assert_eq!(config.run.upload_retries, 0);
        assert_eq!(config.staging.dir, PathBuf::from("ferry-staging"));
        assert_eq!(
            config.run.request_options.get("attributesToRetrieve"),
            Some(&Value::String("*".into()))
        );
        assert!(config.run.limit.is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = FerryConfig::from_toml("").unwrap();
        assert!(!config.run.copy_settings);
        assert_eq!(config.run.retry_backoff_ms, 500);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = FerryConfig::from_toml(
            r#"
            [source]
            app_id = "SRC"
            api_key = "src-key"
            index = "products"

            [destination]
            app_id = "DST"
            api_key = "dst-key"
            index = "products_v2"
            host = "localhost:8080"

            [run]
            limit = 10000
            copy_settings = true
            settings_timing = "after_upload"

            [run.request_options]
            attributesToRetrieve = ["objectID", "title"]

            [headers]
            "X-Forwarded-For" = "10.0.0.1"
            "#,
        )
        .unwrap();

        assert_eq!(config.source.index, "products");
        assert_eq!(config.destination.host.as_deref(), Some("localhost:8080"));
        assert_eq!(config.run.limit, Some(10000));
        assert!(config.run.copy_settings);
        assert_eq!(config.run.settings_timing, SettingsTiming::AfterUpload);
        assert_eq!(
            config.run.request_options["attributesToRetrieve"],
            serde_json::json!(["objectID", "title"])
        );
        assert_eq!(config.headers["X-Forwarded-For"], "10.0.0.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_timing_rejected() {
        let result = FerryConfig::from_toml("[run]\nsettings_timing = \"sometimes\"\n");
        assert!(matches!(result, Err(FerryError::Config(_))));
    }

    #[test]
    fn test_validate_reports_missing_field() {
        let mut config = FerryConfig::default();
        config.source = IndexConfig {
            app_id: "A".into(),
            api_key: "k".into(),
            index: "i".into(),
            host: None,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("destination.app_id"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = FerryConfig::default();
        config.source.api_key = "from-file".into();
        config.apply_overrides_from(|key| match key {
            DESTINATION_API_KEY_ENV => Some("from-env".into()),
            SOURCE_API_KEY_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.source.api_key, "from-file");
        assert_eq!(config.destination.api_key, "from-env");
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.toml");
        std::fs::write(&path, "[run]\nlimit = 42\n").unwrap();

        let config = FerryConfig::load(Some(&path)).unwrap();
        assert_eq!(config.run.limit, Some(42));

        let missing = dir.path().join("missing.toml");
        assert!(FerryConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = FerryConfig::from_toml(DEFAULT_CONFIG).unwrap();
        config.run.limit = Some(5);
        let rendered = config.to_toml().unwrap();
        let parsed = FerryConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.run.limit, Some(5));
    }
}
