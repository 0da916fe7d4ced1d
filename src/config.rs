use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::constants::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_MASTER_LIST_URL, DEFAULT_TARGET_TABLE};
use crate::error::{EtlError, Result};
use crate::infra::sqlite_sink::{is_valid_table_name, LoadMode};
use crate::pipeline::orchestrator::OrchestratorSettings;
use crate::pipeline::processing::parser::SchemaDescriptor;
use crate::pipeline::processing::quality_gate::QualityConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub regions: RegionsConfig,
    pub schema: SchemaDescriptor,
    pub quality: QualityConfig,
    pub quarantine: QuarantineConfig,
    pub alert: AlertConfig,
    pub load: LoadConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// GDELT "last update" list naming the newest export
    pub master_list_url: String,
    /// Read this file instead of downloading
    pub local_path: Option<PathBuf>,
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            master_list_url: DEFAULT_MASTER_LIST_URL.to_string(),
            local_path: None,
            timeout_seconds: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionsConfig {
    /// GeoJSON path or http(s) URL
    pub location: String,
    pub id_property: String,
    pub name_property: String,
}

impl Default for RegionsConfig {
    fn default() -> Self {
        Self {
            location: "data/regions.geojson".to_string(),
            id_property: "GEOID".to_string(),
            name_property: "NAME".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    pub root: PathBuf,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/quarantine"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Alerts are only logged when unset
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub database_path: PathBuf,
    pub table: String,
    pub mode: LoadMode,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/gdelt_etl.db"),
            table: DEFAULT_TARGET_TABLE.to_string(),
            mode: LoadMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub pushgateway_url: Option<String>,
    pub instance: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pushgateway_url: None,
            instance: "default".to_string(),
        }
    }
}

impl Config {
    /// Read the config file, apply environment overrides and validate.
    ///
    /// An explicit path must exist. Without one, `config.toml` is used when
    /// present and the built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Overlay environment variables. `lookup` is injected so tests do not
    /// touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("GDELT_DATA_URL") {
            self.source.master_list_url = url;
        }
        if let Some(path) = get("ETL_INPUT_PATH") {
            self.source.local_path = Some(PathBuf::from(path));
        }
        if let Some(location) = get("GEO_DATA_URL") {
            self.regions.location = location;
        }
        if let Some(path) = get("ETL_DATABASE_PATH") {
            self.load.database_path = PathBuf::from(path);
        }
        if let Some(root) = get("ETL_QUARANTINE_ROOT") {
            self.quarantine.root = PathBuf::from(root);
        }
        if let Some(url) = get("ETL_ALERT_WEBHOOK_URL") {
            self.alert.webhook_url = Some(url);
        }
        if let Some(url) = get("ETL_PUSHGATEWAY_URL") {
            self.metrics.pushgateway_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.schema
            .validate()
            .map_err(|e| EtlError::Config(format!("schema: {}", e)))?;

        let fraction = self.quality.max_unresolved_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(EtlError::Config(format!(
                "quality.max_unresolved_fraction must be within [0, 1], got {}",
                fraction
            )));
        }
        if self.source.timeout_seconds == 0 {
            return Err(EtlError::Config(
                "source.timeout_seconds must be positive".to_string(),
            ));
        }
        if let Some(field) = self.quality.value_domains.keys().find(|f| !f.is_textual()) {
            return Err(EtlError::Config(format!(
                "quality.value_domains cannot constrain non-text field {:?}",
                field
            )));
        }
        if !is_valid_table_name(&self.load.table) {
            return Err(EtlError::Config(format!(
                "load.table '{}' is not a plain identifier",
                self.load.table
            )));
        }
        if self.source.local_path.is_none() && self.source.master_list_url.trim().is_empty() {
            return Err(EtlError::Config(
                "either source.local_path or source.master_list_url is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn orchestrator_settings(&self, dry_run: bool) -> OrchestratorSettings {
        OrchestratorSettings {
            schema: self.schema.clone(),
            quality: self.quality.clone(),
            target_table: self.load.table.clone(),
            dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Field;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.load.table, "base_data");
        assert_eq!(config.quality.max_unresolved_fraction, 0.10);
        assert_eq!(config.schema.expected_columns, 61);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            [source]
            local_path = "fixtures/export.CSV"
            timeout_seconds = 5

            [quality]
            max_unresolved_fraction = 0.25
            min_records = 10
            min_event_date = "2000-01-01"

            [quality.value_domains]
            event_root_code = ["14", "19"]

            [load]
            table = "events"
            mode = "upsert"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.local_path, Some(PathBuf::from("fixtures/export.CSV")));
        assert_eq!(config.source.timeout(), Duration::from_secs(5));
        assert_eq!(config.quality.max_unresolved_fraction, 0.25);
        assert_eq!(config.quality.min_records, 10);
        assert_eq!(
            config.quality.value_domains.get(&Field::EventRootCode),
            Some(&vec!["14".to_string(), "19".to_string()])
        );
        assert_eq!(config.load.mode, LoadMode::Upsert);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_win_over_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GDELT_DATA_URL", "http://mirror/lastupdate.txt"),
            ("GEO_DATA_URL", "https://example.org/counties.geojson"),
            ("ETL_DATABASE_PATH", "/tmp/etl.db"),
            ("ETL_ALERT_WEBHOOK_URL", "https://hooks.example.org/x"),
            ("ETL_PUSHGATEWAY_URL", ""),
        ]);
        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.source.master_list_url, "http://mirror/lastupdate.txt");
        assert_eq!(config.regions.location, "https://example.org/counties.geojson");
        assert_eq!(config.load.database_path, PathBuf::from("/tmp/etl.db"));
        assert_eq!(config.alert.webhook_url.as_deref(), Some("https://hooks.example.org/x"));
        assert_eq!(config.metrics.pushgateway_url, None, "blank values are ignored");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.quality.max_unresolved_fraction = 1.5;
        assert!(matches!(config.validate(), Err(EtlError::Config(_))));

        let mut config = Config::default();
        config.load.table = "base data".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.schema.fields.retain(|f| f.field != Field::EventId);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("GLOBALEVENTID"));

        let mut config = Config::default();
        config.schema.expected_columns = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.load.table = "1events".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn value_domains_only_accept_text_fields() {
        let config = Config::from_toml_str(
            r#"
            [quality.value_domains]
            event_id = ["1", "2"]
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("EventId"));

        let config = Config::from_toml_str(
            r#"
            [quality.value_domains]
            action_geo_country_code = ["US", "CA"]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_explicit_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/config.toml"))).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }
}
