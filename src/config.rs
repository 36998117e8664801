//! Configuration for the forecast merge engine
//!
//! Loaded from a JSON document and/or environment variables. Every field has
//! a default matching the production deployment, so an empty document is a
//! valid configuration.
//!
//! # Example
//!
//! ```rust
//! use solar_forecast_merge::config::{ForecastConfig, SourceKind};
//!
//! let config = ForecastConfig::from_json_str(r#"{
//!     "data_root": "/home/Forecast",
//!     "source": "table",
//!     "revision_count": 42
//! }"#).unwrap();
//!
//! assert_eq!(config.source, SourceKind::Table);
//! assert_eq!(config.revision_count, 42);
//! assert_eq!(config.demo_site, "Demo-Site");
//! ```

use std::path::PathBuf;

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;

use crate::error::ForecastError;
use crate::transformations::fixed_offset;

/// Environment variable holding the path of a JSON config document
pub const ENV_CONFIG_PATH: &str = "FORECAST_CONFIG";

const MAX_REVISIONS: usize = 64;
const MAX_OFFSET_MINUTES: i32 = 18 * 60;

/// Which Row Source Adapter serves forecast merges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// One CSV file per calendar day
    File,
    /// One pivoted range query against the long-format forecast table
    Table,
}

impl SourceKind {
    fn parse(value: &str) -> Result<Self, ForecastError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(SourceKind::File),
            "table" | "db" => Ok(SourceKind::Table),
            other => Err(ForecastError::Config(format!(
                "Unknown source kind: '{}' (expected 'file' or 'table')",
                other
            ))),
        }
    }
}

/// Multiplicative jitter band `[low, high]` for demo perturbation
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct JitterBand {
    pub low: f64,
    pub high: f64,
}

impl JitterBand {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Check that a factor lies inside the band
    pub fn contains(&self, factor: f64) -> bool {
        factor >= self.low && factor <= self.high
    }

    fn validate(&self, name: &str) -> Result<(), ForecastError> {
        if !(self.low > 0.0 && self.low <= self.high && self.high.is_finite()) {
            return Err(ForecastError::Config(format!(
                "Invalid {} band [{}, {}] (expected 0 < low <= high)",
                name, self.low, self.high
            )));
        }
        Ok(())
    }
}

/// Forecast merge configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Filesystem root for day files, historical files and site feeds
    pub data_root: PathBuf,

    /// Row Source Adapter used for forecast merges
    pub source: SourceKind,

    /// Day-file path template relative to `data_root`
    ///
    /// Placeholders: `{client} {site} {granularity} {granularity_lower} {folder} {date}`
    pub forecast_layout: String,

    /// Historical file path template relative to `data_root`
    pub historical_layout: String,

    /// Site feed path template relative to `data_root` (placeholder `{site_id}`)
    pub feed_layout: String,

    /// Folder for day files other than today's live forecast
    pub default_forecast_folder: String,

    /// Company substituted for the "Demo" client
    pub demo_company: String,

    /// Site substituted for the "Demo-Site" site
    pub demo_site: String,

    /// Fixed offset of site wall-clock time from UTC, in minutes
    pub utc_offset_minutes: i32,

    /// Number of revision slots per variable (`Rev0..Rev{n-1}`)
    pub revision_count: usize,

    /// Variables pivoted out of the long-format forecast table
    pub forecast_variables: Vec<String>,

    /// Variables whose revision and final columns are perturbed for demo callers
    pub masked_variables: Vec<String>,

    /// Ground-truth measurement columns perturbed for demo callers
    pub ground_columns: Vec<String>,

    /// Jitter band for forecast merges
    pub forecast_jitter: JitterBand,

    /// Jitter band for historical exports
    pub historical_jitter: JitterBand,

    /// Postgres connection string for the table source
    pub database_url: Option<String>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/home/Forecast"),
            source: SourceKind::File,
            forecast_layout: "{client}/{folder}/{client}_{site}_{granularity}_{date}.csv"
                .to_string(),
            historical_layout: "{client}/{granularity_lower}/{client}_{site}_{granularity}.csv"
                .to_string(),
            feed_layout: "feeds/site_{site_id}.csv".to_string(),
            default_forecast_folder: "ml_forecasts".to_string(),
            demo_company: "Demo".to_string(),
            demo_site: "Demo-Site".to_string(),
            utc_offset_minutes: 330,
            revision_count: 10,
            forecast_variables: vec!["GHI".to_string(), "Gen".to_string()],
            masked_variables: vec!["GHI".to_string(), "POA".to_string(), "Gen".to_string()],
            ground_columns: vec![
                "AC_POWER_SUM".to_string(),
                "Ground GHI".to_string(),
                "Ground POA".to_string(),
            ],
            forecast_jitter: JitterBand::new(0.9, 1.1),
            historical_jitter: JitterBand::new(0.95, 1.05),
            database_url: None,
        }
    }
}

impl ForecastConfig {
    /// Parse and validate a JSON config document
    pub fn from_json_str(json: &str) -> Result<Self, ForecastError> {
        let config: ForecastConfig = serde_json::from_str(json)
            .map_err(|e| ForecastError::Config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `FORECAST_CONFIG` (if set) then apply environment overrides
    ///
    /// # Environment
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `FORECAST_DATA_ROOT` | `data_root` |
    /// | `FORECAST_SOURCE` | `source` |
    /// | `DEMO_COMPANY` | `demo_company` |
    /// | `DEMO_SITE` | `demo_site` |
    /// | `FORECAST_UTC_OFFSET_MINUTES` | `utc_offset_minutes` |
    /// | `FORECAST_REVISION_COUNT` | `revision_count` |
    /// | `DATABASE_URL` | `database_url` |
    pub fn from_env() -> Result<Self, ForecastError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ForecastConfig::from_env`] with an injectable variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ForecastError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG_PATH) {
            Some(path) => {
                let json = std::fs::read_to_string(&path).map_err(|e| {
                    ForecastError::Config(format!("Failed to read config '{}': {}", path, e))
                })?;
                serde_json::from_str(&json)
                    .map_err(|e| ForecastError::Config(format!("Invalid config JSON: {}", e)))?
            }
            None => ForecastConfig::default(),
        };

        if let Some(root) = lookup("FORECAST_DATA_ROOT") {
            config.data_root = PathBuf::from(root);
        }
        if let Some(source) = lookup("FORECAST_SOURCE") {
            config.source = SourceKind::parse(&source)?;
        }
        if let Some(company) = lookup("DEMO_COMPANY") {
            config.demo_company = company;
        }
        if let Some(site) = lookup("DEMO_SITE") {
            config.demo_site = site;
        }
        if let Some(minutes) = lookup("FORECAST_UTC_OFFSET_MINUTES") {
            config.utc_offset_minutes = parse_env_number("FORECAST_UTC_OFFSET_MINUTES", &minutes)?;
        }
        if let Some(count) = lookup("FORECAST_REVISION_COUNT") {
            config.revision_count = parse_env_number("FORECAST_REVISION_COUNT", &count)?;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check ranges and internal consistency
    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.revision_count == 0 || self.revision_count > MAX_REVISIONS {
            return Err(ForecastError::Config(format!(
                "revision_count must be within 1..={}, got {}",
                MAX_REVISIONS, self.revision_count
            )));
        }
        if self.utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(ForecastError::Config(format!(
                "utc_offset_minutes must be within ±{}, got {}",
                MAX_OFFSET_MINUTES, self.utc_offset_minutes
            )));
        }
        self.forecast_jitter.validate("forecast_jitter")?;
        self.historical_jitter.validate("historical_jitter")?;
        if !self.forecast_layout.contains("{date}") {
            return Err(ForecastError::Config(
                "forecast_layout must contain the {date} placeholder".to_string(),
            ));
        }
        Ok(())
    }

    /// Site wall-clock offset
    pub fn offset(&self) -> FixedOffset {
        fixed_offset(self.utc_offset_minutes).unwrap_or_else(|| Utc.fix())
    }
}

fn parse_env_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ForecastError> {
    value.trim().parse::<T>().map_err(|_| {
        ForecastError::Config(format!("{} must be a number, got '{}'", name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ForecastConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.offset().local_minus_utc(), 19_800);
        assert_eq!(config.default_forecast_folder, "ml_forecasts");
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = ForecastConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ForecastConfig::default());
    }

    #[test]
    fn test_json_jitter_band() {
        let config = ForecastConfig::from_json_str(
            r#"{"forecast_jitter": {"low": 0.95, "high": 1.05}}"#,
        )
        .unwrap();
        assert_eq!(config.forecast_jitter, JitterBand::new(0.95, 1.05));
    }

    #[test]
    fn test_invalid_jitter_band_rejected() {
        let result =
            ForecastConfig::from_json_str(r#"{"forecast_jitter": {"low": 1.2, "high": 1.1}}"#);
        assert!(matches!(result, Err(ForecastError::Config(_))));
    }

    #[test]
    fn test_revision_count_bounds() {
        assert!(ForecastConfig::from_json_str(r#"{"revision_count": 0}"#).is_err());
        assert!(ForecastConfig::from_json_str(r#"{"revision_count": 42}"#).is_ok());
        assert!(ForecastConfig::from_json_str(r#"{"revision_count": 65}"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ForecastConfig::from_lookup(lookup_from(&[
            ("FORECAST_DATA_ROOT", "/srv/forecast"),
            ("FORECAST_SOURCE", "table"),
            ("DEMO_COMPANY", "AcmeSolar"),
            ("DEMO_SITE", "Plant-7"),
            ("FORECAST_REVISION_COUNT", "42"),
            ("FORECAST_UTC_OFFSET_MINUTES", "0"),
            ("DATABASE_URL", "postgres://localhost/forecast"),
        ]))
        .unwrap();

        assert_eq!(config.data_root, PathBuf::from("/srv/forecast"));
        assert_eq!(config.source, SourceKind::Table);
        assert_eq!(config.demo_company, "AcmeSolar");
        assert_eq!(config.demo_site, "Plant-7");
        assert_eq!(config.revision_count, 42);
        assert_eq!(config.utc_offset_minutes, 0);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/forecast")
        );
    }

    #[test]
    fn test_env_invalid_number() {
        let result =
            ForecastConfig::from_lookup(lookup_from(&[("FORECAST_REVISION_COUNT", "many")]));
        assert!(matches!(result, Err(ForecastError::Config(_))));
    }

    #[test]
    fn test_env_unknown_source() {
        let result = ForecastConfig::from_lookup(lookup_from(&[("FORECAST_SOURCE", "s3")]));
        assert!(matches!(result, Err(ForecastError::Config(_))));
    }

    #[test]
    fn test_config_file_then_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"demo_site": "FromFile", "revision_count": 12}}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = ForecastConfig::from_lookup(lookup_from(&[
            (ENV_CONFIG_PATH, path.as_str()),
            ("DEMO_SITE", "FromEnv"),
        ]))
        .unwrap();

        assert_eq!(config.demo_site, "FromEnv");
        assert_eq!(config.revision_count, 12);
    }
}
